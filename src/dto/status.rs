use serde::Serialize;
use utoipa::ToSchema;

use crate::{protocol::MachineKind, services::round_service::TurnSnapshot};

/// Machine and turn status returned by `/status`.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// Configured machine name.
    pub machine: String,
    /// Hardware family.
    pub kind: MachineKind,
    /// Whether the link is up.
    pub connected: bool,
    /// Last measured round-trip in milliseconds.
    pub latency_ms: u64,
    /// Whether the machine lights are on.
    pub lit: bool,
    /// Whether the hardware is still playing out a shot or drop.
    pub play_active: bool,
    /// Commands waiting for the drainer.
    pub pending_commands: usize,
    /// Turn lifecycle.
    pub turn: TurnSnapshot,
}
