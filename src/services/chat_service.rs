//! Routes relayed chat lines to the turn lifecycle.

use tracing::debug;

use crate::{dto::chat::ChatResponse, error::ServiceError, state::SharedState};

/// Handle one chat line: prefixed text is a chat command, anything else is movement input.
pub async fn handle_chat(
    state: &SharedState,
    username: &str,
    message: &str,
) -> Result<ChatResponse, ServiceError> {
    let username = username.trim().to_lowercase();
    let turns = state.turns();
    let message = message.trim();

    let Some(command) = message.strip_prefix(turns.command_prefix()) else {
        let commands = turns.handle_message(&username, message)?;
        return Ok(ChatResponse::Queued { commands });
    };

    let mut words = command.split_whitespace();
    let verb = words.next().unwrap_or_default().to_lowercase();
    debug!(%username, %verb, "chat command");

    match verb.as_str() {
        "play" => {
            let outcome = turns.join(&username)?;
            Ok(ChatResponse::Joined {
                position: outcome.position,
                already_queued: outcome.already_queued,
            })
        }
        "quit" | "leave" => {
            if turns.leave(&username) {
                Ok(ChatResponse::Left)
            } else {
                Err(ServiceError::NotFound(format!("{username} is not queued")))
            }
        }
        "gift" => {
            let Some(nickname) = words.next() else {
                return Err(ServiceError::InvalidInput("usage: gift <nickname>".into()));
            };
            let nickname = nickname.to_lowercase();
            turns.gift_turn(&username, Some(&nickname))?;
            Ok(ChatResponse::Gifted { to: nickname })
        }
        "lights" => {
            let on = turns.toggle_lights(&username).await?;
            Ok(ChatResponse::Lights { on })
        }
        "strobe" => {
            turns.strobe_lights(&username).await?;
            Ok(ChatResponse::Strobe)
        }
        other => Err(ServiceError::InvalidInput(format!(
            "unknown command `{other}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig, protocol::MachineKind, state::AppState, testing::RecordingMachine,
    };

    fn state() -> SharedState {
        let machine = RecordingMachine::new(MachineKind::Skeeball);
        AppState::new(AppConfig::default(), machine)
    }

    #[tokio::test(start_paused = true)]
    async fn prefixed_commands_drive_the_queue() {
        let state = state();

        assert_eq!(
            handle_chat(&state, "Ada", "!play").await.unwrap(),
            ChatResponse::Joined {
                position: 0,
                already_queued: false
            }
        );
        assert_eq!(
            handle_chat(&state, "bob", "!PLAY").await.unwrap(),
            ChatResponse::Joined {
                position: 1,
                already_queued: false
            }
        );
        assert_eq!(
            handle_chat(&state, "ada", "l").await.unwrap(),
            ChatResponse::Queued { commands: 1 }
        );
        assert_eq!(
            handle_chat(&state, "ada", "!lights").await.unwrap(),
            ChatResponse::Lights { on: true }
        );
        assert_eq!(
            handle_chat(&state, "ada", "!strobe").await.unwrap(),
            ChatResponse::Strobe
        );
        assert_eq!(
            handle_chat(&state, "ada", "!gift Cy").await.unwrap(),
            ChatResponse::Gifted { to: "cy".into() }
        );
        assert_eq!(state.turns().current_player().as_deref(), Some("cy"));
        assert_eq!(
            handle_chat(&state, "bob", "!leave").await.unwrap(),
            ChatResponse::Left
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bad_commands_are_rejected() {
        let state = state();
        assert!(matches!(
            handle_chat(&state, "ada", "!dance").await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            handle_chat(&state, "ada", "!quit").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            handle_chat(&state, "ada", "!gift").await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert_eq!(
            handle_chat(&state, "ada", "l").await.unwrap(),
            ChatResponse::Queued { commands: 0 }
        );
    }
}
