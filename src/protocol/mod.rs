//! Wire format spoken with the machine controllers.

pub mod codec;
pub mod events;

pub use codec::{DecodeError, InboundLine, LineAccumulator, SequenceCounter, encode_command};
pub use events::{
    Axis, FailsafeKind, FlipperDirection, MachineEvent, MachineKind, MoveDirection, RailEnd,
};
