use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Last measured machine round-trip in milliseconds.
    pub latency_ms: u64,
}

impl HealthResponse {
    /// The machine link is up.
    pub fn ok(latency_ms: u64) -> Self {
        Self {
            status: "ok".to_string(),
            latency_ms,
        }
    }

    /// The machine link is down.
    pub fn degraded(latency_ms: u64) -> Self {
        Self {
            status: "degraded".to_string(),
            latency_ms,
        }
    }
}
