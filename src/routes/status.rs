use axum::{Json, Router, extract::State, routing::get};

use crate::{dto::status::StatusResponse, services::status_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/status",
    tag = "status",
    responses((status = 200, description = "Machine link and turn lifecycle", body = StatusResponse))
)]
/// Describe the machine link, the player queue and the current round.
pub async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(status_service::status(&state))
}

/// Configure the status route.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/status", get(status))
}
