/// Organizer operations: teams, events and challenge links.
pub mod admin_service;
/// Chat rooms: message log and presence.
pub mod chat_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Standings and event summaries.
pub mod scoreboard_service;
/// Flag submissions and post-commit publication.
pub mod submission_service;
/// WebSocket session lifecycle shared by every hub.
pub mod websocket_service;
