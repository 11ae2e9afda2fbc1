//! DTO definitions used by the organizer REST API and documentation layer.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::dao::models::{
    ChallengeId, ChallengeLinkEntity, DEFAULT_DECAY, DEFAULT_REWARD, DEFAULT_REWARD_MIN, EventId,
    EventStatus, FlagEntity, FlagKind, NewChallengeLink, NewEvent, ParticipationEntity,
    TeamEntity, TeamId,
};

/// Request to create a team.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateTeamRequest {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TeamResponse {
    pub id: TeamId,
    pub name: String,
}

impl From<TeamEntity> for TeamResponse {
    fn from(team: TeamEntity) -> Self {
        Self {
            id: team.id,
            name: team.name,
        }
    }
}

/// Request to create an event. Events start as drafts unless told otherwise.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[validate(schema(function = "validate_event_window"))]
pub struct CreateEventRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    pub status: Option<EventStatus>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub starts_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ends_at: Option<OffsetDateTime>,
}

fn validate_event_window(request: &CreateEventRequest) -> Result<(), ValidationError> {
    match (request.starts_at, request.ends_at) {
        (Some(start), Some(end)) if end <= start => {
            let mut err = ValidationError::new("event_window");
            err.message = Some("ends_at must be after starts_at".into());
            Err(err)
        }
        _ => Ok(()),
    }
}

impl From<CreateEventRequest> for NewEvent {
    fn from(request: CreateEventRequest) -> Self {
        Self {
            name: request.name,
            status: request.status.unwrap_or(EventStatus::Draft),
            starts_at: request.starts_at,
            ends_at: request.ends_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateEventStatusRequest {
    pub status: EventStatus,
}

/// Request to attach a challenge to an event with its reward curve.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[validate(schema(function = "validate_reward_curve"))]
pub struct LinkChallengeRequest {
    pub challenge_id: ChallengeId,
    #[validate(length(min = 1, max = 1024))]
    pub flag: String,
    #[serde(default)]
    pub flag_type: FlagKind,
    #[serde(default)]
    #[validate(range(min = 1))]
    pub reward: Option<i64>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub reward_min: Option<i64>,
    /// Solve count at which the reward bottoms out.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub decay: Option<i64>,
    #[serde(default)]
    pub reward_decrements: Option<bool>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub reward_first_blood: Option<i64>,
}

fn validate_reward_curve(request: &LinkChallengeRequest) -> Result<(), ValidationError> {
    let reward = request.reward.unwrap_or(DEFAULT_REWARD);
    let reward_min = request.reward_min.unwrap_or(DEFAULT_REWARD_MIN.min(reward));
    if reward_min > reward {
        let mut err = ValidationError::new("reward_curve");
        err.message = Some("reward_min must not exceed reward".into());
        return Err(err);
    }
    Ok(())
}

impl LinkChallengeRequest {
    pub fn into_link(self, event_id: EventId) -> NewChallengeLink {
        let initial_reward = self.reward.unwrap_or(DEFAULT_REWARD);
        NewChallengeLink {
            event_id,
            challenge_id: self.challenge_id,
            initial_reward,
            reward_min: self
                .reward_min
                .unwrap_or(DEFAULT_REWARD_MIN.min(initial_reward)),
            decay: self.decay.unwrap_or(DEFAULT_DECAY),
            reward_decrements: self.reward_decrements.unwrap_or(true),
            reward_first_blood: self.reward_first_blood.unwrap_or(0),
            flag: FlagEntity {
                kind: self.flag_type,
                content: self.flag,
            },
        }
    }
}

/// Public projection of a challenge link. The flag is never echoed back.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChallengeLinkResponse {
    pub event_id: EventId,
    pub challenge_id: ChallengeId,
    pub reward: i64,
    pub initial_reward: i64,
    pub reward_min: i64,
    pub decay: i64,
    pub reward_decrements: bool,
    pub reward_first_blood: i64,
    pub attempts: i64,
    pub solves: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_blood_at: Option<OffsetDateTime>,
    pub first_blood_team_id: Option<TeamId>,
}

impl From<ChallengeLinkEntity> for ChallengeLinkResponse {
    fn from(link: ChallengeLinkEntity) -> Self {
        Self {
            event_id: link.event_id,
            challenge_id: link.challenge_id,
            reward: link.reward,
            initial_reward: link.initial_reward,
            reward_min: link.reward_min,
            decay: link.decay,
            reward_decrements: link.reward_decrements,
            reward_first_blood: link.reward_first_blood,
            attempts: link.attempts,
            solves: link.solves,
            first_blood_at: link.first_blood_at,
            first_blood_team_id: link.first_blood_team_id,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterTeamRequest {
    pub team_id: TeamId,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ParticipationResponse {
    pub event_id: EventId,
    pub team_id: TeamId,
    pub score: i64,
    pub solves: i64,
}

impl From<ParticipationEntity> for ParticipationResponse {
    fn from(participation: ParticipationEntity) -> Self {
        Self {
            event_id: participation.event_id,
            team_id: participation.team_id,
            score: participation.score,
            solves: participation.solves,
        }
    }
}
