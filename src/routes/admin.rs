use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{post, put},
};
use axum_valid::Valid;

use crate::{
    dao::models::EventId,
    dto::{
        admin::{
            ChallengeLinkResponse, CreateEventRequest, CreateTeamRequest, LinkChallengeRequest,
            ParticipationResponse, RegisterTeamRequest, TeamResponse, UpdateEventStatusRequest,
        },
        scoreboard::EventSummary,
    },
    error::AppError,
    identity::Identity,
    services::admin_service,
    state::SharedState,
};

/// Organizer-only endpoints for seeding and driving events.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/admin/teams", post(create_team))
        .route("/admin/events", post(create_event))
        .route("/admin/events/{event_id}/status", put(update_event_status))
        .route("/admin/events/{event_id}/challenges", post(link_challenge))
        .route("/admin/events/{event_id}/teams", post(register_team))
        .route_layer(middleware::from_fn(require_organizer))
}

/// Create a team.
#[utoipa::path(
    post,
    path = "/admin/teams",
    tag = "admin",
    request_body = CreateTeamRequest,
    responses(
        (status = 201, description = "Team created", body = TeamResponse),
        (status = 409, description = "Team name already taken")
    )
)]
pub async fn create_team(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateTeamRequest>>,
) -> Result<(StatusCode, Json<TeamResponse>), AppError> {
    let team = admin_service::create_team(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(team)))
}

/// Create an event, `draft` unless a status is given.
#[utoipa::path(
    post,
    path = "/admin/events",
    tag = "admin",
    request_body = CreateEventRequest,
    responses((status = 201, description = "Event created", body = EventSummary))
)]
pub async fn create_event(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateEventRequest>>,
) -> Result<(StatusCode, Json<EventSummary>), AppError> {
    let event = admin_service::create_event(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// Move an event to another lifecycle status.
#[utoipa::path(
    put,
    path = "/admin/events/{event_id}/status",
    tag = "admin",
    params(("event_id" = i64, Path, description = "Event identifier")),
    request_body = UpdateEventStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = EventSummary),
        (status = 404, description = "Unknown event")
    )
)]
pub async fn update_event_status(
    State(state): State<SharedState>,
    Path(event_id): Path<EventId>,
    Json(payload): Json<UpdateEventStatusRequest>,
) -> Result<Json<EventSummary>, AppError> {
    Ok(Json(
        admin_service::update_event_status(&state, event_id, payload.status).await?,
    ))
}

/// Attach a challenge and its reward curve to an event.
#[utoipa::path(
    post,
    path = "/admin/events/{event_id}/challenges",
    tag = "admin",
    params(("event_id" = i64, Path, description = "Event identifier")),
    request_body = LinkChallengeRequest,
    responses(
        (status = 201, description = "Challenge linked", body = ChallengeLinkResponse),
        (status = 404, description = "Unknown event"),
        (status = 409, description = "Challenge already linked")
    )
)]
pub async fn link_challenge(
    State(state): State<SharedState>,
    Path(event_id): Path<EventId>,
    Valid(Json(payload)): Valid<Json<LinkChallengeRequest>>,
) -> Result<(StatusCode, Json<ChallengeLinkResponse>), AppError> {
    let link = admin_service::link_challenge(&state, event_id, payload).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

/// Register a team to an event.
#[utoipa::path(
    post,
    path = "/admin/events/{event_id}/teams",
    tag = "admin",
    params(("event_id" = i64, Path, description = "Event identifier")),
    request_body = RegisterTeamRequest,
    responses(
        (status = 201, description = "Team registered", body = ParticipationResponse),
        (status = 404, description = "Unknown event or team"),
        (status = 409, description = "Team already registered")
    )
)]
pub async fn register_team(
    State(state): State<SharedState>,
    Path(event_id): Path<EventId>,
    Json(payload): Json<RegisterTeamRequest>,
) -> Result<(StatusCode, Json<ParticipationResponse>), AppError> {
    let participation = admin_service::register_team(&state, event_id, payload).await?;
    Ok((StatusCode::CREATED, Json(participation)))
}

async fn require_organizer(
    identity: Identity,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if identity.is_guest() {
        return Err(AppError::Unauthorized("login required".into()));
    }
    if !identity.role.can_manage_events() {
        return Err(AppError::Forbidden("organizer role required".into()));
    }
    Ok(next.run(req).await)
}
