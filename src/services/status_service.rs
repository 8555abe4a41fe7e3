use crate::{dto::status::StatusResponse, state::SharedState};

/// Machine link and turn lifecycle at a glance.
pub fn status(state: &SharedState) -> StatusResponse {
    let machine = state.machine();
    StatusResponse {
        machine: state.config().machine.name.clone(),
        kind: machine.kind(),
        connected: machine.is_connected(),
        latency_ms: machine.latency_ms(),
        lit: machine.is_lit(),
        play_active: machine.is_play_active(),
        pending_commands: state.scheduler().len(),
        turn: state.turns().snapshot(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig, protocol::MachineKind, state::AppState, state::TurnPhase,
        testing::RecordingMachine,
    };

    #[tokio::test(start_paused = true)]
    async fn reflects_queue_and_machine() {
        let state = AppState::new(
            AppConfig::default(),
            RecordingMachine::new(MachineKind::Skeeball),
        );
        let idle = status(&state);
        assert_eq!(idle.turn.phase, TurnPhase::WaitingForPlayer);
        assert!(idle.connected);

        state.turns().join("ada").unwrap();
        let busy = status(&state);
        assert_eq!(busy.turn.current_player.as_deref(), Some("ada"));
        assert_eq!(busy.turn.round, 1);
        assert_eq!(busy.latency_ms, 3);
    }
}
