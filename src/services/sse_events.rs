use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    protocol::MachineEvent,
    services::round_service::TurnNotification,
    state::{SharedState, SseHub},
};

const EVENT_MACHINE: &str = "machine";
const EVENT_TURN: &str = "turn";
const EVENT_HANDSHAKE: &str = "handshake";

/// Forward machine notifications and turn notifications onto the SSE stream.
pub fn bridge(state: &SharedState) {
    let hub = state.sse().clone();
    state.machine().events().subscribe(move |event: &MachineEvent| {
        broadcast_machine_event(&hub, event);
    });

    let hub = state.sse().clone();
    state
        .turns()
        .events()
        .subscribe(move |notification: &TurnNotification| {
            broadcast_turn_event(&hub, notification);
        });
}

/// Broadcast a machine notification; heartbeat round-trips stay off the stream.
pub fn broadcast_machine_event(hub: &SseHub, event: &MachineEvent) {
    if let MachineEvent::PingSuccess { latency_ms } = event {
        debug!(latency_ms, "heartbeat");
        return;
    }
    send_event(hub, EVENT_MACHINE, event);
}

/// Broadcast a turn lifecycle notification.
pub fn broadcast_turn_event(hub: &SseHub, notification: &TurnNotification) {
    send_event(hub, EVENT_TURN, notification);
}

/// First event delivered to a new SSE subscriber.
pub fn handshake(state: &SharedState) -> Option<ServerEvent> {
    let payload = Handshake {
        message: "subscribed".to_string(),
        machine: state.config().machine.name.clone(),
        connected: state.machine().is_connected(),
    };
    match ServerEvent::json(Some(EVENT_HANDSHAKE.to_string()), &payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(error = %err, "failed to serialize SSE handshake");
            None
        }
    }
}

fn send_event(hub: &SseHub, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => hub.broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize SSE payload"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig, controller::MachineControl, protocol::MachineKind, state::AppState,
        testing::RecordingMachine,
    };

    #[tokio::test(start_paused = true)]
    async fn machine_and_turn_events_reach_subscribers() {
        let machine = RecordingMachine::new(MachineKind::Skeeball);
        let state = AppState::new(AppConfig::default(), machine.clone());
        bridge(&state);
        let mut receiver = state.sse().subscribe();

        machine.events().dispatch(&MachineEvent::PingSuccess { latency_ms: 4 });
        machine.events().dispatch(&MachineEvent::BallReleased);
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some(EVENT_MACHINE));
        assert_eq!(event.data, r#"{"type":"ball_released"}"#);

        state.turns().join("ada").unwrap();
        let mut names = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            names.push(event.event.unwrap_or_default());
        }
        assert!(names.iter().any(|name| name == EVENT_TURN));
    }

    #[test]
    fn handshake_names_the_machine() {
        let state = AppState::new(
            AppConfig::default(),
            RecordingMachine::new(MachineKind::Claw),
        );
        let event = handshake(&state).unwrap();
        assert_eq!(event.event.as_deref(), Some(EVENT_HANDSHAKE));
        assert!(event.data.contains(r#""connected":true"#));
    }
}
