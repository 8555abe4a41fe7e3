//! Outbound seams: chat replies and persisted movement records.

use std::time::SystemTime;

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    dto::{format_system_time, sse::ServerEvent},
    error::ServiceError,
    state::SseHub,
};

const EVENT_CHAT: &str = "chat";

/// Destination for messages addressed to players.
pub trait ChatSink: Send + Sync {
    /// Post `message` to `channel`.
    fn send_message(&self, channel: &str, message: &str);
}

/// Store for accepted player commands.
pub trait RecordSink: Send + Sync {
    /// Persist one record.
    fn persist(&self, record: MovementRecord) -> BoxFuture<'static, Result<(), ServiceError>>;
}

/// One accepted command, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRecord {
    /// Player who sent the command.
    pub username: String,
    /// Command text as typed.
    pub command: String,
    /// Machine the command was queued for.
    pub machine: String,
    /// When the command was accepted.
    pub at: SystemTime,
}

impl MovementRecord {
    /// Record stamped with the current time.
    pub fn new(username: &str, command: &str, machine: &str) -> Self {
        Self {
            username: username.to_string(),
            command: command.to_string(),
            machine: machine.to_string(),
            at: SystemTime::now(),
        }
    }
}

/// Chat reply as seen on the SSE stream.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChatReply {
    /// Channel the reply was addressed to.
    pub channel: String,
    /// Reply text.
    pub message: String,
}

/// Publishes chat replies on the SSE stream.
pub struct SseChatSink {
    hub: SseHub,
}

impl SseChatSink {
    /// Sink broadcasting on `hub`.
    pub fn new(hub: SseHub) -> Self {
        Self { hub }
    }
}

impl ChatSink for SseChatSink {
    fn send_message(&self, channel: &str, message: &str) {
        info!(%channel, %message, "chat reply");
        let payload = ChatReply {
            channel: channel.to_string(),
            message: message.to_string(),
        };
        match ServerEvent::json(Some(EVENT_CHAT.to_string()), &payload) {
            Ok(event) => self.hub.broadcast(event),
            Err(err) => warn!(error = %err, "failed to serialise chat reply"),
        }
    }
}

/// Writes movement records to the log.
#[derive(Debug, Default)]
pub struct TracingRecordSink;

impl RecordSink for TracingRecordSink {
    fn persist(&self, record: MovementRecord) -> BoxFuture<'static, Result<(), ServiceError>> {
        Box::pin(async move {
            info!(
                username = %record.username,
                command = %record.command,
                machine = %record.machine,
                at = %format_system_time(record.at),
                "movement recorded"
            );
            Ok(())
        })
    }
}
