//! Business logic behind the organizer routes: seeding teams, events and
//! challenge links, and moving events through their lifecycle.

use tracing::info;

use crate::{
    dao::models::{EventId, EventStatus, NewEvent},
    dto::admin::{
        ChallengeLinkResponse, CreateEventRequest, CreateTeamRequest, LinkChallengeRequest,
        ParticipationResponse, RegisterTeamRequest, TeamResponse,
    },
    dto::scoreboard::EventSummary,
    error::ServiceError,
    services::scoreboard_service,
    state::SharedState,
};

pub async fn create_team(
    state: &SharedState,
    request: CreateTeamRequest,
) -> Result<TeamResponse, ServiceError> {
    let name = request.name.trim().to_owned();
    if name.is_empty() {
        return Err(ServiceError::InvalidInput("team name must not be blank".into()));
    }
    let team = state.store().create_team(name).await?;
    info!(team_id = team.id, name = %team.name, "team created");
    Ok(team.into())
}

pub async fn create_event(
    state: &SharedState,
    request: CreateEventRequest,
) -> Result<EventSummary, ServiceError> {
    let event = state.store().create_event(NewEvent::from(request)).await?;
    info!(event_id = event.id, status = %event.status, "event created");
    Ok(EventSummary::new(event, None))
}

pub async fn update_event_status(
    state: &SharedState,
    event_id: EventId,
    status: EventStatus,
) -> Result<EventSummary, ServiceError> {
    let previous = scoreboard_service::require_event(state, event_id).await?;
    let event = state.store().set_event_status(event_id, status).await?;
    info!(event_id, from = %previous.status, to = %event.status, "event status changed");
    scoreboard_service::event_summary(state, event.id).await
}

pub async fn link_challenge(
    state: &SharedState,
    event_id: EventId,
    request: LinkChallengeRequest,
) -> Result<ChallengeLinkResponse, ServiceError> {
    scoreboard_service::require_event(state, event_id).await?;
    let link = state
        .store()
        .link_challenge(request.into_link(event_id))
        .await?;
    info!(
        event_id,
        challenge_id = link.challenge_id,
        reward = link.initial_reward,
        reward_min = link.reward_min,
        decay = link.decay,
        "challenge linked"
    );
    Ok(link.into())
}

pub async fn register_team(
    state: &SharedState,
    event_id: EventId,
    request: RegisterTeamRequest,
) -> Result<ParticipationResponse, ServiceError> {
    let participation = state
        .store()
        .register_team(event_id, request.team_id)
        .await?;
    info!(event_id, team_id = participation.team_id, "team registered");
    Ok(participation.into())
}
