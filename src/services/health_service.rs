use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report link health, logging when the machine is unreachable.
pub fn health_status(state: &SharedState) -> HealthResponse {
    let machine = state.machine();
    let latency_ms = machine.latency_ms();

    if machine.is_connected() {
        HealthResponse::ok(latency_ms)
    } else {
        warn!(machine = %state.config().machine.name, "machine link down (degraded mode)");
        HealthResponse::degraded(latency_ms)
    }
}
