//! Turn lifecycle phases and the per-round shooter record.

use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Where the turn lifecycle currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TurnPhase {
    /// Nobody is queued; the machine is idle.
    WaitingForPlayer,
    /// A player holds the machine.
    RoundActive {
        /// Player holding the turn.
        player: String,
        /// Round counter value of this round.
        round: u64,
    },
    /// The player's turn ended normally.
    TurnEnded {
        /// Player whose turn ended.
        player: String,
    },
    /// The player was removed (idle or left).
    PlayerRemoved {
        /// Player who was removed.
        player: String,
    },
}

/// Inputs that move the lifecycle between phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// A round starts for `player`.
    RoundStarted {
        /// Player receiving the turn.
        player: String,
        /// New round counter value.
        round: u64,
    },
    /// The current turn ended without removing the player.
    TurnEnded,
    /// The current player was removed from the queue.
    PlayerRemoved,
    /// Nobody is left to play.
    QueueEmptied,
}

/// Error returned when an event does not apply to the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Phase when the event arrived.
    pub from: TurnPhase,
    /// Rejected event.
    pub event: TurnEvent,
}

/// Turn lifecycle with a version bumped on every accepted transition.
#[derive(Debug, Clone)]
pub struct TurnStateMachine {
    phase: TurnPhase,
    version: usize,
}

impl Default for TurnStateMachine {
    fn default() -> Self {
        Self {
            phase: TurnPhase::WaitingForPlayer,
            version: 0,
        }
    }
}

impl TurnStateMachine {
    /// Start out waiting for a player.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn phase(&self) -> TurnPhase {
        self.phase.clone()
    }

    /// Number of transitions applied so far.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Apply `event`, returning the new phase.
    pub fn apply(&mut self, event: TurnEvent) -> Result<TurnPhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        self.version += 1;
        Ok(self.phase.clone())
    }

    fn compute_transition(&self, event: TurnEvent) -> Result<TurnPhase, InvalidTransition> {
        let next = match (&self.phase, event) {
            (TurnPhase::RoundActive { .. }, event @ TurnEvent::RoundStarted { .. }) => {
                return Err(InvalidTransition {
                    from: self.phase.clone(),
                    event,
                });
            }
            (_, TurnEvent::RoundStarted { player, round }) => {
                TurnPhase::RoundActive { player, round }
            }
            (TurnPhase::RoundActive { player, .. }, TurnEvent::TurnEnded) => TurnPhase::TurnEnded {
                player: player.clone(),
            },
            (TurnPhase::RoundActive { player, .. }, TurnEvent::PlayerRemoved)
            | (TurnPhase::TurnEnded { player }, TurnEvent::PlayerRemoved) => {
                TurnPhase::PlayerRemoved {
                    player: player.clone(),
                }
            }
            (_, TurnEvent::QueueEmptied) => TurnPhase::WaitingForPlayer,
            (from, event) => {
                return Err(InvalidTransition {
                    from: from.clone(),
                    event,
                });
            }
        };

        Ok(next)
    }
}

/// The player holding the current round and how their shots are going.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveShooter {
    /// Player who shot last this round.
    pub username: Option<String>,
    /// Round the shot belongs to.
    pub round: u64,
    /// Shots taken this round.
    pub balls_shot: u32,
    /// Token of the unresolved shot; cleared once the machine resolves it.
    pub shot: Option<Uuid>,
    /// The ball came back.
    pub ball_return_triggered: bool,
    /// The flap re-armed.
    pub flap_set_triggered: bool,
}

impl ActiveShooter {
    /// Forget any in-flight shot signals.
    pub fn clear_shot(&mut self) {
        self.shot = None;
        self.ball_return_triggered = false;
        self.flap_set_triggered = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(player: &str, round: u64) -> TurnEvent {
        TurnEvent::RoundStarted {
            player: player.into(),
            round,
        }
    }

    #[test]
    fn initial_state_is_waiting() {
        let sm = TurnStateMachine::new();
        assert_eq!(sm.phase(), TurnPhase::WaitingForPlayer);
        assert_eq!(sm.version(), 0);
    }

    #[test]
    fn full_turn_cycle() {
        let mut sm = TurnStateMachine::new();

        assert_eq!(
            sm.apply(started("ada", 1)).unwrap(),
            TurnPhase::RoundActive {
                player: "ada".into(),
                round: 1
            }
        );
        assert_eq!(
            sm.apply(TurnEvent::TurnEnded).unwrap(),
            TurnPhase::TurnEnded {
                player: "ada".into()
            }
        );
        assert_eq!(
            sm.apply(TurnEvent::PlayerRemoved).unwrap(),
            TurnPhase::PlayerRemoved {
                player: "ada".into()
            }
        );
        assert_eq!(
            sm.apply(started("bob", 2)).unwrap(),
            TurnPhase::RoundActive {
                player: "bob".into(),
                round: 2
            }
        );
        assert_eq!(
            sm.apply(TurnEvent::QueueEmptied).unwrap(),
            TurnPhase::WaitingForPlayer
        );
        assert_eq!(sm.version(), 5);
    }

    #[test]
    fn round_cannot_start_over_an_active_round() {
        let mut sm = TurnStateMachine::new();
        sm.apply(started("ada", 1)).unwrap();

        let err = sm.apply(started("bob", 2)).unwrap_err();
        assert_eq!(err.event, started("bob", 2));
        match err.from {
            TurnPhase::RoundActive { player, round } => {
                assert_eq!(player, "ada");
                assert_eq!(round, 1);
            }
            other => panic!("unexpected phase {other:?}"),
        }
        assert_eq!(sm.version(), 1);
    }

    #[test]
    fn ending_requires_an_active_round() {
        let mut sm = TurnStateMachine::new();
        assert!(sm.apply(TurnEvent::TurnEnded).is_err());
        assert!(sm.apply(TurnEvent::PlayerRemoved).is_err());
        assert_eq!(
            sm.apply(TurnEvent::QueueEmptied).unwrap(),
            TurnPhase::WaitingForPlayer
        );
    }
}
