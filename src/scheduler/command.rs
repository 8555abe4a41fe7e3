use serde::Serialize;
use tokio::time::Instant;
use utoipa::ToSchema;

use crate::protocol::Axis;

/// What a queued command asks the machine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Relative move left.
    MoveLeft,
    /// Relative move right.
    MoveRight,
    /// Gantry forward (claw).
    MoveForward,
    /// Gantry backward (claw).
    MoveBackward,
    /// Pan left.
    TurnLeft,
    /// Pan right.
    TurnRight,
    /// Absolute carriage position.
    MoveTo,
    /// Absolute pan position.
    PanTo,
    /// Wheel id and raw speed.
    WheelSpeed,
    /// Release the ball or drop the claw; flushes everything queued behind it.
    Shoot,
    /// Placeholder that does nothing.
    NoOp,
}

impl CommandKind {
    /// Stepper axis whose completion gates this command, if any.
    pub fn axis(self) -> Option<Axis> {
        match self {
            CommandKind::MoveLeft | CommandKind::MoveRight | CommandKind::MoveTo => {
                Some(Axis::LeftRight)
            }
            CommandKind::TurnLeft | CommandKind::TurnRight | CommandKind::PanTo => Some(Axis::Pan),
            _ => None,
        }
    }
}

/// A parsed player command waiting for the drainer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    /// Operation.
    pub kind: CommandKind,
    /// Steps, duration, position or wheel id depending on `kind`.
    pub argument1: i32,
    /// Wheel speed for [`CommandKind::WheelSpeed`].
    pub argument2: i32,
    /// Player that issued it.
    pub username: String,
    /// Round the command was queued in.
    pub round: u64,
    /// When it was queued.
    pub enqueued_at: Instant,
}

impl QueuedCommand {
    /// Build a command stamped with the current time.
    pub fn new(
        kind: CommandKind,
        argument1: i32,
        argument2: i32,
        username: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            argument1,
            argument2,
            username: username.into(),
            round: 0,
            enqueued_at: Instant::now(),
        }
    }

    /// Stamp the command with the round it belongs to.
    pub fn in_round(mut self, round: u64) -> Self {
        self.round = round;
        self
    }
}
