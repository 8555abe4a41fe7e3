use std::io;

use thiserror::Error;

use crate::protocol::MachineKind;

/// Result alias for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors raised while talking to a machine.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// No link is open.
    #[error("machine is not connected")]
    NotConnected,
    /// Opening the socket failed.
    #[error("failed to connect to {address}")]
    Connect {
        /// Target address.
        address: String,
        #[source]
        source: io::Error,
    },
    /// Opening the socket took longer than the comms timeout.
    #[error("timed out connecting to {address}")]
    ConnectTimeout {
        /// Target address.
        address: String,
    },
    /// Writing to an open socket failed.
    #[error("machine link I/O failed")]
    Io(#[from] io::Error),
    /// No reply arrived for a synchronous request.
    #[error("no reply to `{command}` (sequence {sequence})")]
    Timeout {
        /// Sequence the request was sent with.
        sequence: u32,
        /// Command text.
        command: String,
    },
    /// The link closed while a reply was awaited.
    #[error("machine link closed while waiting for a reply")]
    Disconnected,
    /// A reply arrived but could not be interpreted.
    #[error("unexpected reply to `{command}`: `{response}`")]
    InvalidResponse {
        /// Command text.
        command: String,
        /// Reply payload.
        response: String,
    },
    /// The machine kind has no such capability.
    #[error("{operation} is not supported by {kind:?} machines")]
    Unsupported {
        /// Kind of the machine asked.
        kind: MachineKind,
        /// Name of the rejected operation.
        operation: &'static str,
    },
}

impl ControllerError {
    /// Build an [`ControllerError::Unsupported`] error.
    pub fn unsupported(kind: MachineKind, operation: &'static str) -> Self {
        ControllerError::Unsupported { kind, operation }
    }
}
