use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Arcade Relay.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::status::status,
        crate::routes::chat::relay_chat,
        crate::routes::sse::event_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::status::StatusResponse,
            crate::dto::chat::ChatMessageRequest,
            crate::dto::chat::ChatResponse,
            crate::dto::sse::Handshake,
            crate::protocol::MachineEvent,
            crate::services::notifier::ChatReply,
            crate::services::round_service::TurnNotification,
            crate::services::round_service::TurnSnapshot,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "status", description = "Machine and turn status"),
        (name = "chat", description = "Chat relay for players"),
        (name = "sse", description = "Server-sent events stream"),
    )
)]
pub struct ApiDoc;
