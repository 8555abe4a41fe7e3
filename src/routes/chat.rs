use axum::{Json, Router, extract::State, routing::post};
use validator::Validate;

use crate::{
    dto::chat::{ChatMessageRequest, ChatResponse},
    error::AppError,
    services::chat_service,
    state::SharedState,
};

#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    request_body = ChatMessageRequest,
    responses(
        (status = 200, description = "Message handled", body = ChatResponse),
        (status = 400, description = "Invalid message or command"),
        (status = 404, description = "Player is not queued"),
        (status = 409, description = "Sender does not hold the turn or the queue is full"),
        (status = 503, description = "Machine unreachable")
    )
)]
/// Relay one chat line from a player.
pub async fn relay_chat(
    State(state): State<SharedState>,
    Json(payload): Json<ChatMessageRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    payload.validate()?;
    let response = chat_service::handle_chat(&state, &payload.username, &payload.message).await?;
    Ok(Json(response))
}

/// Configure the chat relay route.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/chat", post(relay_chat))
}
