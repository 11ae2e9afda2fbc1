use axum::{
    Json, Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::rejection::WebSocketUpgradeRejection,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_valid::Valid;
use tracing::debug;

use crate::{
    dao::models::{ChallengeId, EventId},
    dto::{
        scoreboard::{EventSummary, ScoreboardEntry},
        submission::{SubmitFlagRequest, SubmitFlagResponse},
    },
    error::AppError,
    identity::Identity,
    services::{
        scoreboard_service::{self, ScoreboardMode},
        submission_service, websocket_service,
    },
    state::SharedState,
};

/// Participant-facing event endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/events/{event_id}", get(get_event))
        .route("/events/{event_id}/scoreboard", get(scoreboard))
        .route(
            "/events/{event_id}/challenges/{challenge_id}/submit",
            post(submit_flag),
        )
}

/// Submit a flag for the caller's team.
#[utoipa::path(
    post,
    path = "/events/{event_id}/challenges/{challenge_id}/submit",
    tag = "events",
    params(
        ("event_id" = i64, Path, description = "Event identifier"),
        ("challenge_id" = i64, Path, description = "Challenge identifier"),
    ),
    request_body = SubmitFlagRequest,
    responses(
        (status = 200, description = "Flag accepted", body = SubmitFlagResponse),
        (status = 400, description = "Incorrect flag or invalid body"),
        (status = 401, description = "No caller identity"),
        (status = 403, description = "Caller has no team, is not registered, or the event is not active"),
        (status = 404, description = "Unknown event or challenge link"),
        (status = 409, description = "Team already solved this challenge"),
        (status = 500, description = "Persistence failure")
    )
)]
pub async fn submit_flag(
    State(state): State<SharedState>,
    Path((event_id, challenge_id)): Path<(EventId, ChallengeId)>,
    identity: Identity,
    Valid(Json(body)): Valid<Json<SubmitFlagRequest>>,
) -> Result<Json<SubmitFlagResponse>, AppError> {
    let outcome =
        submission_service::submit_flag(&state, &identity, event_id, challenge_id, body.flag).await?;
    Ok(Json(outcome.into()))
}

/// Live scoreboard while the event runs, final standings once it ended.
#[utoipa::path(
    get,
    path = "/events/{event_id}/scoreboard",
    tag = "events",
    params(("event_id" = i64, Path, description = "Event identifier")),
    responses(
        (status = 101, description = "Switching protocols; first frame is `init` with the full standings"),
        (status = 200, description = "Final standings of an ended event", body = [ScoreboardEntry]),
        (status = 400, description = "Active event requested without a WebSocket upgrade"),
        (status = 403, description = "Event not started"),
        (status = 404, description = "Unknown event")
    )
)]
pub async fn scoreboard(
    State(state): State<SharedState>,
    Path(event_id): Path<EventId>,
    identity: Identity,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    match scoreboard_service::scoreboard_mode(&state, event_id).await? {
        ScoreboardMode::Final => {
            let standings = scoreboard_service::ranked_standings(&state, event_id, None).await?;
            Ok(Json(standings).into_response())
        }
        ScoreboardMode::Live => {
            let ws = upgrade.map_err(|err| {
                debug!(event_id, error = %err, "scoreboard upgrade rejected");
                AppError::BadRequest("Could not open websocket connection".into())
            })?;
            let hub = state.scoreboard_hub().handle();
            let settings = state.scoreboard_hub().settings().clone();
            Ok(ws.on_upgrade(move |socket| {
                websocket_service::handle_socket(hub, settings, socket, identity, event_id)
            }))
        }
    }
}

/// Event details, with the leading teams once the event has started.
#[utoipa::path(
    get,
    path = "/events/{event_id}",
    tag = "events",
    params(("event_id" = i64, Path, description = "Event identifier")),
    responses(
        (status = 200, description = "Event details", body = EventSummary),
        (status = 404, description = "Unknown event")
    )
)]
pub async fn get_event(
    State(state): State<SharedState>,
    Path(event_id): Path<EventId>,
) -> Result<Json<EventSummary>, AppError> {
    Ok(Json(scoreboard_service::event_summary(&state, event_id).await?))
}
