//! Configuration management for the growth A/B server
//!
//! All configurable parameters in one place with environment variable overrides.
//! Sensible defaults, configurable in production.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

use crate::experiments::{AnalysisConfig, PValueMethod};
use crate::storage::WriteMode;

/// Parse an environment variable, warning (not failing) on malformed values
fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid value '{}' for {}", raw, name);
            None
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn is_production_env() -> bool {
    env::var("GROWTH_AB_ENV")
        .map(|v| {
            let v = v.to_lowercase();
            v == "production" || v == "prod"
        })
        .unwrap_or(false)
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl LogFormat {
    pub fn from_env() -> Self {
        env_parse("GROWTH_AB_LOG_FORMAT").unwrap_or_default()
    }
}

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins (empty = allow all)
    pub allowed_origins: Vec<String>,
    /// Allowed HTTP methods
    pub allowed_methods: Vec<String>,
    /// Allowed headers
    pub allowed_headers: Vec<String>,
    /// Whether to allow credentials
    pub allow_credentials: bool,
    /// Max age for preflight cache (seconds)
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "PUT".to_string(),
                "DELETE".to_string(),
                "OPTIONS".to_string(),
            ],
            allowed_headers: vec!["Content-Type".to_string(), "X-Request-ID".to_string()],
            allow_credentials: false,
            max_age_seconds: 86400,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl CorsConfig {
    /// Load from environment variables
    ///
    /// In production mode, warns if CORS origins are not configured.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(origins) = env::var("GROWTH_AB_CORS_ORIGINS") {
            config.allowed_origins = split_list(&origins);
        }

        if let Ok(methods) = env::var("GROWTH_AB_CORS_METHODS") {
            config.allowed_methods = split_list(&methods)
                .into_iter()
                .map(|m| m.to_uppercase())
                .collect();
        }

        if let Ok(headers) = env::var("GROWTH_AB_CORS_HEADERS") {
            config.allowed_headers = split_list(&headers);
        }

        if let Some(flag) = env_flag("GROWTH_AB_CORS_CREDENTIALS") {
            config.allow_credentials = flag;
        }

        if let Some(n) = env_parse("GROWTH_AB_CORS_MAX_AGE") {
            config.max_age_seconds = n;
        }

        if is_production_env() && config.allowed_origins.is_empty() {
            tracing::warn!(
                "PRODUCTION WARNING: CORS allows all origins. Set GROWTH_AB_CORS_ORIGINS."
            );
        }

        config
    }

    /// Check if any origin restrictions are configured
    pub fn is_restricted(&self) -> bool {
        !self.allowed_origins.is_empty()
    }

    /// Convert to tower-http CorsLayer
    pub fn to_layer(&self) -> tower_http::cors::CorsLayer {
        use tower_http::cors::{AllowOrigin, Any, CorsLayer};

        let mut layer = CorsLayer::new();

        if self.allowed_origins.is_empty() {
            layer = layer.allow_origin(Any);
        } else {
            let mut valid_origins = Vec::new();
            for origin_str in &self.allowed_origins {
                match origin_str.parse::<axum::http::HeaderValue>() {
                    Ok(origin) => valid_origins.push(origin),
                    Err(_) => tracing::warn!("CORS: Invalid origin '{}' - skipping", origin_str),
                }
            }

            if valid_origins.is_empty() {
                // Never fall back to permissive on a broken origin list
                tracing::error!(
                    "CORS: All {} configured origin(s) failed to parse. \
                     Rejecting all cross-origin requests. Fix GROWTH_AB_CORS_ORIGINS.",
                    self.allowed_origins.len()
                );
            }
            layer = layer.allow_origin(AllowOrigin::list(valid_origins));
        }

        let methods: Vec<axum::http::Method> = self
            .allowed_methods
            .iter()
            .filter_map(|m| m.parse().ok())
            .collect();
        if methods.is_empty() {
            layer = layer.allow_methods(Any);
        } else {
            layer = layer.allow_methods(methods);
        }

        let headers: Vec<axum::http::HeaderName> = self
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        if headers.is_empty() {
            layer = layer.allow_headers(Any);
        } else {
            layer = layer.allow_headers(headers);
        }

        if self.allow_credentials {
            layer = layer.allow_credentials(true);
        }

        layer.max_age(std::time::Duration::from_secs(self.max_age_seconds))
    }
}

/// Server configuration loaded from environment with defaults
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 127.0.0.1; 0.0.0.0 for containers)
    pub host: String,

    /// Server port (default: 3040)
    pub port: u16,

    /// Storage path for RocksDB (default: ./growth_ab_data)
    pub storage_path: PathBuf,

    /// fsync every write or buffer in the page cache (default: async)
    pub write_mode: WriteMode,

    /// Rate limit: requests per second (default: 2000; 0 disables)
    pub rate_limit_per_second: u64,

    /// Rate limit: burst size (default: 4000)
    pub rate_limit_burst: u32,

    /// Maximum concurrent requests (default: 200)
    pub max_concurrent_requests: usize,

    /// Request timeout in seconds (default: 30)
    pub request_timeout_secs: u64,

    /// Whether running in production mode
    pub is_production: bool,

    /// Log output format
    pub log_format: LogFormat,

    /// CORS configuration
    pub cors: CorsConfig,

    /// Results aggregation settings
    pub analysis: AnalysisConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3040,
            storage_path: PathBuf::from("./growth_ab_data"),
            write_mode: WriteMode::default(),
            rate_limit_per_second: 2000,
            rate_limit_burst: 4000,
            max_concurrent_requests: 200,
            request_timeout_secs: 30,
            is_production: false,
            log_format: LogFormat::default(),
            cors: CorsConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults
    #[allow(clippy::field_reassign_with_default)]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.is_production = is_production_env();

        if let Ok(val) = env::var("GROWTH_AB_HOST") {
            config.host = val;
        }

        if let Some(port) = env_parse("GROWTH_AB_PORT") {
            config.port = port;
        }

        if let Ok(val) = env::var("GROWTH_AB_DATA_PATH") {
            config.storage_path = PathBuf::from(val);
        }

        if let Some(mode) = env_parse::<WriteMode>("GROWTH_AB_WRITE_MODE") {
            config.write_mode = mode;
        }

        // Rate limiting
        if let Some(n) = env_parse("GROWTH_AB_RATE_LIMIT") {
            config.rate_limit_per_second = n;
        }

        if let Some(n) = env_parse("GROWTH_AB_RATE_BURST") {
            config.rate_limit_burst = n;
        }

        // Concurrency
        if let Some(n) = env_parse::<usize>("GROWTH_AB_MAX_CONCURRENT") {
            config.max_concurrent_requests = n.max(1);
        }

        if let Some(n) = env_parse::<u64>("GROWTH_AB_REQUEST_TIMEOUT") {
            config.request_timeout_secs = n.max(1);
        }

        config.log_format = LogFormat::from_env();
        config.cors = CorsConfig::from_env();

        // Analysis
        if let Some(n) = env_parse("GROWTH_AB_MIN_SAMPLE") {
            config.analysis.min_sample_for_significance = n;
        }

        if let Some(n) = env_parse("GROWTH_AB_RECOMMENDED_SAMPLE") {
            config.analysis.recommended_sample_size = n;
        }

        if let Some(method) = env_parse::<PValueMethod>("GROWTH_AB_P_VALUE_METHOD") {
            config.analysis.p_value_method = method;
        }

        config
    }

    /// Socket address string to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Log the current configuration
    pub fn log(&self) {
        info!("📋 Configuration:");
        info!(
            "   Mode: {}",
            if self.is_production {
                "PRODUCTION"
            } else {
                "Development"
            }
        );
        info!("   Bind: {}", self.bind_addr());
        info!(
            "   Storage: {:?} (write mode: {})",
            self.storage_path, self.write_mode
        );
        if self.rate_limit_per_second > 0 {
            info!(
                "   Rate limit: {} req/sec (burst: {})",
                self.rate_limit_per_second, self.rate_limit_burst
            );
        } else {
            info!("   Rate limit: disabled");
        }
        info!("   Max concurrent: {}", self.max_concurrent_requests);
        info!("   Request timeout: {}s", self.request_timeout_secs);
        if self.cors.is_restricted() {
            info!("   CORS origins: {:?}", self.cors.allowed_origins);
        } else {
            info!("   CORS: Permissive (all origins allowed)");
        }
        info!(
            "   Analysis: min sample {} per variant, recommended {}, p-value method {}",
            self.analysis.min_sample_for_significance,
            self.analysis.recommended_sample_size,
            self.analysis.p_value_method
        );
    }
}

/// Environment variable documentation
pub fn print_env_help() {
    println!("growth-ab Configuration Environment Variables:");
    println!();
    println!("  GROWTH_AB_ENV              - Set to 'production' or 'prod' for production mode");
    println!("  GROWTH_AB_HOST             - Bind address (default: 127.0.0.1)");
    println!("  GROWTH_AB_PORT             - Server port (default: 3040)");
    println!("  GROWTH_AB_DATA_PATH        - Storage directory (default: ./growth_ab_data)");
    println!("  GROWTH_AB_WRITE_MODE       - sync or async (default: async)");
    println!("  GROWTH_AB_RATE_LIMIT       - Requests per second, 0 disables (default: 2000)");
    println!("  GROWTH_AB_RATE_BURST       - Burst size (default: 4000)");
    println!("  GROWTH_AB_MAX_CONCURRENT   - Max concurrent requests (default: 200)");
    println!("  GROWTH_AB_REQUEST_TIMEOUT  - Request timeout in seconds (default: 30)");
    println!("  GROWTH_AB_LOG_FORMAT       - pretty or json (default: pretty)");
    println!();
    println!("Analysis:");
    println!("  GROWTH_AB_MIN_SAMPLE          - Sessions per variant required before significance is tested (default: 30)");
    println!("  GROWTH_AB_RECOMMENDED_SAMPLE  - Sessions per variant before results are trusted (default: 100)");
    println!("  GROWTH_AB_P_VALUE_METHOD      - chi_square_df1 or legacy_exponential (default: chi_square_df1)");
    println!();
    println!("CORS Configuration:");
    println!("  GROWTH_AB_CORS_ORIGINS     - Comma-separated allowed origins (default: all)");
    println!("  GROWTH_AB_CORS_METHODS     - Comma-separated allowed methods (default: GET,POST,PUT,DELETE,OPTIONS)");
    println!("  GROWTH_AB_CORS_HEADERS     - Comma-separated allowed headers (default: Content-Type,X-Request-ID)");
    println!("  GROWTH_AB_CORS_CREDENTIALS - Allow credentials true/false (default: false)");
    println!("  GROWTH_AB_CORS_MAX_AGE     - Preflight cache seconds (default: 86400)");
    println!();
    println!("  RUST_LOG                   - Log filter (e.g., info, growth_ab=debug)");
    println!();
}
