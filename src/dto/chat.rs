use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::dto::validation::validate_username;

/// A chat line relayed from the stream chat.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ChatMessageRequest {
    /// Chat nickname of the sender.
    #[validate(length(min = 1, max = 25), custom(function = validate_username))]
    pub username: String,
    /// Raw message text; a leading command prefix marks a chat command.
    #[validate(length(min = 1, max = 500))]
    pub message: String,
}

/// What happened to a relayed chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ChatResponse {
    /// Movement input; `commands` were queued for the machine.
    Queued {
        /// Number of queued commands.
        commands: usize,
    },
    /// The sender is in the player queue.
    Joined {
        /// Zero-based queue position.
        position: usize,
        /// The sender was already queued.
        already_queued: bool,
    },
    /// The sender left the queue.
    Left,
    /// The sender handed their turn over.
    Gifted {
        /// New holder of the turn.
        to: String,
    },
    /// The machine lights were toggled.
    Lights {
        /// Whether the lights are now on.
        on: bool,
    },
    /// The configured light show ran.
    Strobe,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validation() {
        let ok = ChatMessageRequest {
            username: "ada_99".into(),
            message: "l l s".into(),
        };
        assert!(ok.validate().is_ok());

        let blank = ChatMessageRequest {
            username: "ada".into(),
            message: String::new(),
        };
        assert!(blank.validate().is_err());

        let spaced = ChatMessageRequest {
            username: "ada lovelace".into(),
            message: "l".into(),
        };
        assert!(spaced.validate().is_err());
    }

    #[test]
    fn response_is_tagged_by_action() {
        let json = serde_json::to_value(ChatResponse::Queued { commands: 3 }).unwrap();
        assert_eq!(json["action"], "queued");
        assert_eq!(json["commands"], 3);
    }
}
