use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for the CTF real-time service.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::metrics::metrics,
        crate::routes::events::get_event,
        crate::routes::events::scoreboard,
        crate::routes::events::submit_flag,
        crate::routes::chat::chat_socket,
        crate::routes::chat::online_users,
        crate::routes::chat::history,
        crate::routes::admin::create_team,
        crate::routes::admin::create_event,
        crate::routes::admin::update_event_status,
        crate::routes::admin::link_challenge,
        crate::routes::admin::register_team,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::submission::SubmitFlagRequest,
            crate::dto::submission::SubmitFlagResponse,
            crate::dto::scoreboard::ScoreboardEntry,
            crate::dto::scoreboard::ScoreboardPayload,
            crate::dto::scoreboard::FirstBloodNotice,
            crate::dto::scoreboard::EventSummary,
            crate::dto::ws::InboundKind,
            crate::dto::ws::InboundMessage,
            crate::dto::ws::ServerEventKind,
            crate::dto::ws::ServerMessage,
            crate::dto::chat::OnlineUser,
            crate::dto::chat::OnlineUsersResponse,
            crate::dto::chat::ChatMessageView,
            crate::dto::chat::ChatHistoryResponse,
            crate::dto::admin::CreateTeamRequest,
            crate::dto::admin::TeamResponse,
            crate::dto::admin::CreateEventRequest,
            crate::dto::admin::UpdateEventStatusRequest,
            crate::dto::admin::LinkChallengeRequest,
            crate::dto::admin::ChallengeLinkResponse,
            crate::dto::admin::RegisterTeamRequest,
            crate::dto::admin::ParticipationResponse,
            crate::dao::models::EventStatus,
            crate::dao::models::FlagKind,
            crate::identity::Role,
        )
    ),
    tags(
        (name = "health", description = "Health check and metrics endpoints"),
        (name = "events", description = "Flag submission and scoreboards"),
        (name = "chat", description = "Chat rooms over WebSocket"),
        (name = "admin", description = "Organizer operations; require the organizer or admin role"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_submission_route() {
        let doc = ApiDoc::openapi();
        assert!(
            doc.paths
                .paths
                .contains_key("/events/{event_id}/challenges/{challenge_id}/submit")
        );
    }
}
