//! Shared application state handed to every handler

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use crate::config::ServerConfig;
use crate::errors::AppError;
use crate::experiments::{ExperimentError, ExperimentService};
use crate::storage::{ExperimentStore, RocksDbExperimentStore};

/// Everything a request handler needs
pub struct AppContext {
    service: ExperimentService,
    started_at: Instant,
}

impl AppContext {
    pub fn new(service: ExperimentService) -> Self {
        Self {
            service,
            started_at: Instant::now(),
        }
    }

    /// Open the RocksDB store at the configured path and build the service on it
    pub fn open(config: ServerConfig) -> anyhow::Result<Self> {
        let store = RocksDbExperimentStore::new(&config.storage_path, config.write_mode)
            .with_context(|| {
                format!(
                    "Failed to open experiment store at {}",
                    config.storage_path.display()
                )
            })?;
        let store: Arc<dyn ExperimentStore> = Arc::new(store);
        let service = ExperimentService::new(store, config.analysis);
        Ok(Self::new(service))
    }

    pub fn service(&self) -> &ExperimentService {
        &self.service
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Application state type alias
pub type AppState = Arc<AppContext>;

/// Run a service call on the blocking pool; store reads, writes and scans
/// must not stall the async workers.
pub async fn run_blocking<T, F>(state: &AppState, f: F) -> Result<T, AppError>
where
    F: FnOnce(&ExperimentService) -> Result<T, ExperimentError> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(state.service()))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Blocking task panicked: {e}")))?
        .map_err(AppError::from)
}
