//! HTTP request tracking middleware

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use std::time::Instant;

/// Track HTTP request latency and counts
pub async fn track_metrics(req: Request, next: Next) -> Result<Response, StatusCode> {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    // Group dynamic ids to keep label cardinality bounded
    let normalized_path = normalize_path(&path);

    crate::metrics::HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &normalized_path, &status])
        .observe(duration);

    crate::metrics::HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &normalized_path, &status])
        .inc();

    Ok(response)
}

/// Normalize path to prevent metric cardinality explosion
/// /api/tests/homepage-hero/assign -> /api/tests/{id}/assign
fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let mut normalized = Vec::with_capacity(parts.len());

    for (i, part) in parts.iter().enumerate() {
        // Test ids are caller-chosen, so the segment after /api/tests is always an id
        let is_test_id = i == 2 && parts[..2] == ["api", "tests"] && *part != "summary";
        if is_test_id || is_id(part) {
            normalized.push("{id}");
        } else {
            normalized.push(part);
        }
    }

    format!("/{}", normalized.join("/"))
}

/// Check if a path segment looks like an ID (UUID, numeric, hash)
fn is_id(segment: &str) -> bool {
    // UUID pattern
    if segment.contains('-') && segment.len() >= 32 {
        return true;
    }

    // Numeric ID
    if !segment.is_empty() && segment.chars().all(|c| c.is_numeric()) {
        return true;
    }

    // Looks like a hash or long alphanumeric
    segment.len() > 20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path("/api/tests/homepage-hero/assign"),
            "/api/tests/{id}/assign"
        );
        assert_eq!(
            normalize_path("/api/tests/550e8400-e29b-41d4-a716-446655440000"),
            "/api/tests/{id}"
        );
        assert_eq!(normalize_path("/api/tests/summary"), "/api/tests/summary");
        assert_eq!(normalize_path("/api/tests"), "/api/tests");
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
    }
}
