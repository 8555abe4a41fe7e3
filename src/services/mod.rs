/// Chat relay: chat commands and movement input.
pub mod chat_service;
/// Player input parsing into machine commands.
pub mod command_parser;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Machine link supervision with reconnect backoff.
pub mod machine_supervisor;
/// Chat reply and movement record sinks.
pub mod notifier;
/// Turn and round lifecycle.
pub mod round_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events streaming.
pub mod sse_service;
/// Machine and turn status snapshot.
pub mod status_service;
