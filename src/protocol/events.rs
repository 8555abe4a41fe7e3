//! Typed notifications decoded from the numeric event codes of each machine kind.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::codec::{DecodeError, InboundLine};

/// Pong code shared by every machine kind; consumed by the heartbeat, never dispatched.
pub const PONG_CODE: u16 = 101;
/// Informational text, also used as the reply code for synchronous queries.
pub const INFO_CODE: u16 = 900;

/// Sensor reporting that a ball went back to the return tray.
pub const SENSOR_BALL_RETURN: u8 = 8;

/// Hardware family driven over a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MachineKind {
    /// Skeeball lane with two steppers and two launch wheels.
    #[default]
    Skeeball,
    /// Claw crane with a full event vocabulary.
    Claw,
    /// Claw crane running the reduced firmware that never reports centering.
    SimpleClaw,
}

impl MachineKind {
    /// Whether movements on this kind report completion per axis.
    pub fn tracks_axis_completion(self) -> bool {
        matches!(self, MachineKind::Skeeball)
    }

    /// Whether this kind speaks the claw event table.
    pub fn is_claw(self) -> bool {
        matches!(self, MachineKind::Claw | MachineKind::SimpleClaw)
    }
}

/// Stepper axis of a skeeball lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Left-right carriage.
    LeftRight,
    /// Pan (aim) rotation.
    Pan,
}

impl Axis {
    /// Both axes, in hardware order.
    pub const ALL: [Axis; 2] = [Axis::LeftRight, Axis::Pan];

    /// Identifier used on the wire.
    pub fn id(self) -> u8 {
        match self {
            Axis::LeftRight => 1,
            Axis::Pan => 2,
        }
    }

    /// Resolve a wire identifier.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Axis::LeftRight),
            2 => Some(Axis::Pan),
            _ => None,
        }
    }
}

/// Direction of a relative movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    /// Toward the left.
    Left,
    /// Toward the right.
    Right,
    /// Away from the player (claw gantry).
    Forward,
    /// Toward the player (claw gantry).
    Backward,
    /// Claw hoist up.
    Up,
    /// Claw hoist down.
    Down,
    /// Rotate the pan axis left.
    TurnLeft,
    /// Rotate the pan axis right.
    TurnRight,
}

/// Which end of a stepper rail was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RailEnd {
    /// Home (left) limit switch.
    Home,
    /// Far (right) limit switch.
    End,
}

/// Flipper motion reported or commanded on claw machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlipperDirection {
    /// Not moving.
    #[default]
    Stopped,
    /// Pushing forward.
    Forward,
    /// Returning home.
    Home,
}

impl FlipperDirection {
    /// Wire value for `flip <n>`.
    pub fn code(self) -> u8 {
        match self {
            FlipperDirection::Stopped => 0,
            FlipperDirection::Forward => 1,
            FlipperDirection::Home => 2,
        }
    }
}

/// Failsafe timers exposed by claw firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailsafeKind {
    /// Maximum time a gantry motor may run.
    Motor,
    /// Maximum time the claw may stay open.
    ClawOpened,
    /// Maximum belt run time.
    Belt,
    /// Maximum flipper travel time.
    Flipper,
}

impl FailsafeKind {
    /// Wire identifier for `sfs`/`gfs`.
    pub fn code(self) -> u8 {
        match self {
            FailsafeKind::Motor => 0,
            FailsafeKind::ClawOpened => 1,
            FailsafeKind::Belt => 2,
            FailsafeKind::Flipper => 3,
        }
    }
}

/// Notification raised by a machine link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MachineEvent {
    /// Socket established and heartbeat started.
    Connected,
    /// Socket closed, by either side.
    Disconnected,
    /// A keepalive round-trip completed.
    PingSuccess {
        /// Measured round-trip in milliseconds.
        latency_ms: u64,
    },
    /// A keepalive went unanswered; the link is about to be torn down.
    PingTimeout,
    /// Free-form text from the firmware.
    Info {
        /// Message text.
        message: String,
    },

    /// Skeeball score or ball sensor tripped.
    ScoreSensor {
        /// Sensor number.
        sensor: u8,
    },
    /// Skeeball game reset button.
    GameReset,
    /// Ball left the release gate.
    BallReleased,
    /// Ball came back to the tray.
    BallReturned,
    /// Ball flap tripped.
    FlapTripped,
    /// Ball flap re-armed.
    FlapSet,
    /// A stepper reached its target.
    MoveComplete {
        /// Axis that finished moving.
        axis: Axis,
        /// Final absolute position.
        position: i32,
    },
    /// A stepper rail limit switch fired.
    StepperLimit {
        /// Rail end that was hit.
        end: RailEnd,
    },
    /// Position report text.
    PositionReport {
        /// Raw report.
        report: String,
    },
    /// Wheel speed report text.
    WheelSpeedReport {
        /// Raw report.
        report: String,
    },
    /// Homing began on an axis.
    HomingStarted {
        /// Axis being homed.
        axis: Axis,
    },
    /// Homing finished on an axis.
    HomingComplete {
        /// Axis that finished homing.
        axis: Axis,
    },
    /// A stepper started moving.
    MoveStarted,
    /// Controller rebooted and needs its settings again.
    ControllerStartup,

    /// Prize belt sensor tripped.
    BeltSensor,
    /// Claw reset button pressed.
    ResetButton,
    /// Claw started dropping.
    ClawDropping,
    /// Claw reached the bottom.
    ClawDropped,
    /// Claw finished recoiling.
    ClawRecoiled,
    /// Gantry back at home.
    ReturnedHome,
    /// Claw back over the center; the play is over.
    ClawCentered,
    /// Gantry limit switch hit.
    LimitHit {
        /// Direction of the limit.
        direction: MoveDirection,
    },
    /// Flipper reached its forward stop.
    FlipperForward,
    /// Flipper reached home.
    FlipperHome,
    /// Flipper reported a fault.
    FlipperError {
        /// Fault text.
        message: String,
    },
    /// Gantry motor ran past its failsafe.
    MotorFailsafe {
        /// Direction that was running.
        direction: MoveDirection,
    },
    /// Claw stayed open past its failsafe.
    ClawFailsafe,
    /// Flipper ran past its failsafe.
    FlipperTimeout,
}

/// Decode a non-pong line into a typed event for the given machine kind.
///
/// Unknown codes yield `Ok(None)`; known codes with unusable payloads are errors.
pub fn decode(kind: MachineKind, line: &InboundLine) -> Result<Option<MachineEvent>, DecodeError> {
    if line.code == INFO_CODE {
        return Ok(Some(MachineEvent::Info {
            message: line.payload.clone(),
        }));
    }

    if kind.is_claw() {
        decode_claw(line)
    } else {
        decode_skeeball(line)
    }
}

fn decode_skeeball(line: &InboundLine) -> Result<Option<MachineEvent>, DecodeError> {
    let event = match line.code {
        100 => MachineEvent::ScoreSensor {
            sensor: first_number(line)?,
        },
        102 => MachineEvent::GameReset,
        103 => MachineEvent::BallReleased,
        104 => MachineEvent::BallReturned,
        105 => MachineEvent::FlapTripped,
        106 => MachineEvent::FlapSet,
        400 => {
            let mut fields = line.fields();
            let axis = fields.next().and_then(|value| value.parse::<u8>().ok());
            let position = fields.next().and_then(|value| value.parse::<i32>().ok());
            match (axis.and_then(Axis::from_id), position) {
                (Some(axis), Some(position)) => MachineEvent::MoveComplete { axis, position },
                _ => return Err(invalid_payload(line)),
            }
        }
        401 => MachineEvent::StepperLimit { end: RailEnd::Home },
        402 => MachineEvent::StepperLimit { end: RailEnd::End },
        403 => MachineEvent::PositionReport {
            report: line.payload.clone(),
        },
        404 => MachineEvent::WheelSpeedReport {
            report: line.payload.clone(),
        },
        405 => MachineEvent::HomingStarted {
            axis: axis_payload(line)?,
        },
        406 => MachineEvent::HomingComplete {
            axis: axis_payload(line)?,
        },
        407 => MachineEvent::MoveStarted,
        408 => MachineEvent::ControllerStartup,
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn decode_claw(line: &InboundLine) -> Result<Option<MachineEvent>, DecodeError> {
    const DIRECTIONS: [MoveDirection; 6] = [
        MoveDirection::Left,
        MoveDirection::Right,
        MoveDirection::Forward,
        MoveDirection::Backward,
        MoveDirection::Up,
        MoveDirection::Down,
    ];

    let event = match line.code {
        100 => MachineEvent::BeltSensor,
        102 => MachineEvent::ResetButton,
        103 => MachineEvent::ClawDropping,
        104 => MachineEvent::ClawDropped,
        105 => MachineEvent::ClawRecoiled,
        106 => MachineEvent::ReturnedHome,
        107 => MachineEvent::ClawCentered,
        code @ 200..=205 => MachineEvent::LimitHit {
            direction: DIRECTIONS[usize::from(code - 200)],
        },
        206 => MachineEvent::FlipperForward,
        207 => MachineEvent::FlipperHome,
        208 => MachineEvent::FlipperError {
            message: line.payload.clone(),
        },
        code @ 300..=305 => MachineEvent::MotorFailsafe {
            direction: DIRECTIONS[usize::from(code - 300)],
        },
        306 => MachineEvent::ClawFailsafe,
        307 => MachineEvent::FlipperTimeout,
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn first_number(line: &InboundLine) -> Result<u8, DecodeError> {
    line.fields()
        .next()
        .and_then(|value| value.parse::<u8>().ok())
        .ok_or_else(|| invalid_payload(line))
}

fn axis_payload(line: &InboundLine) -> Result<Axis, DecodeError> {
    Axis::from_id(first_number(line)?).ok_or_else(|| invalid_payload(line))
}

fn invalid_payload(line: &InboundLine) -> DecodeError {
    DecodeError::InvalidPayload {
        code: line.code,
        payload: line.payload.clone(),
    }
}
