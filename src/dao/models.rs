use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

/// Identifier of a contest event.
pub type EventId = i64;
/// Identifier of a challenge definition.
pub type ChallengeId = i64;
/// Identifier of a team.
pub type TeamId = i64;
/// Identifier of a platform user.
pub type UserId = i64;

pub const DEFAULT_REWARD: i64 = 500;
pub const DEFAULT_REWARD_MIN: i64 = 350;
pub const DEFAULT_DECAY: i64 = 30;

/// Lifecycle status of an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Draft,
    Published,
    Active,
    Ended,
}

impl EventStatus {
    /// Column representation used by relational backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Draft => "draft",
            EventStatus::Published => "published",
            EventStatus::Active => "active",
            EventStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(EventStatus::Draft),
            "published" => Ok(EventStatus::Published),
            "active" => Ok(EventStatus::Active),
            "ended" => Ok(EventStatus::Ended),
            other => Err(format!("unknown event status `{other}`")),
        }
    }
}

/// Team known to the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamEntity {
    pub id: TeamId,
    pub name: String,
}

/// Contest event metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEntity {
    pub id: EventId,
    pub name: String,
    pub status: EventStatus,
    pub starts_at: Option<OffsetDateTime>,
    pub ends_at: Option<OffsetDateTime>,
}

/// Input used to create an event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub name: String,
    pub status: EventStatus,
    pub starts_at: Option<OffsetDateTime>,
    pub ends_at: Option<OffsetDateTime>,
}

/// Matching strategy of a stored flag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    #[default]
    Static,
    /// Any type this build does not know yet; matched exactly.
    #[serde(other)]
    Unknown,
}

impl FlagKind {
    /// Column representation used by relational backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagKind::Static => "static",
            FlagKind::Unknown => "unknown",
        }
    }

    pub fn from_column(value: &str) -> Self {
        match value {
            "static" => FlagKind::Static,
            _ => FlagKind::Unknown,
        }
    }
}

/// Correct answer attached to a challenge link, stored as `{ "type", "content" }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlagEntity {
    #[serde(rename = "type", default)]
    pub kind: FlagKind,
    pub content: String,
}

impl FlagEntity {
    pub fn static_flag(content: impl Into<String>) -> Self {
        Self {
            kind: FlagKind::Static,
            content: content.into(),
        }
    }
}

/// Per (event, challenge) scoring state. Mutated by every successful solve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChallengeLinkEntity {
    pub event_id: EventId,
    pub challenge_id: ChallengeId,
    /// Reward the next solver would currently receive.
    pub reward: i64,
    pub initial_reward: i64,
    pub reward_min: i64,
    /// Solve count at which `reward_min` is reached.
    pub decay: i64,
    pub reward_decrements: bool,
    /// Bonus added on top of the reward for the first solver.
    pub reward_first_blood: i64,
    pub attempts: i64,
    pub solves: i64,
    pub first_blood_at: Option<OffsetDateTime>,
    pub first_blood_team_id: Option<TeamId>,
    pub flag: FlagEntity,
}

/// Input used to link a challenge to an event.
#[derive(Debug, Clone)]
pub struct NewChallengeLink {
    pub event_id: EventId,
    pub challenge_id: ChallengeId,
    pub initial_reward: i64,
    pub reward_min: i64,
    pub decay: i64,
    pub reward_decrements: bool,
    pub reward_first_blood: i64,
    pub flag: FlagEntity,
}

impl NewChallengeLink {
    /// Link with the platform's default reward curve.
    pub fn with_defaults(event_id: EventId, challenge_id: ChallengeId, flag: FlagEntity) -> Self {
        Self {
            event_id,
            challenge_id,
            initial_reward: DEFAULT_REWARD,
            reward_min: DEFAULT_REWARD_MIN,
            decay: DEFAULT_DECAY,
            reward_decrements: true,
            reward_first_blood: 0,
            flag,
        }
    }
}

impl From<NewChallengeLink> for ChallengeLinkEntity {
    fn from(link: NewChallengeLink) -> Self {
        Self {
            event_id: link.event_id,
            challenge_id: link.challenge_id,
            reward: link.initial_reward,
            initial_reward: link.initial_reward,
            reward_min: link.reward_min,
            decay: link.decay,
            reward_decrements: link.reward_decrements,
            reward_first_blood: link.reward_first_blood,
            attempts: 0,
            solves: 0,
            first_blood_at: None,
            first_blood_team_id: None,
            flag: link.flag,
        }
    }
}

/// Per (event, team) score sheet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipationEntity {
    /// Registration sequence; doubles as the final ranking tie-break.
    pub id: i64,
    pub event_id: EventId,
    pub team_id: TeamId,
    pub score: i64,
    pub solves: i64,
    pub last_attempt_at: Option<OffsetDateTime>,
}

/// Append-only history row for a successful solve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SolveEntity {
    pub event_id: EventId,
    pub challenge_id: ChallengeId,
    pub team_id: TeamId,
    pub points: i64,
    pub created_at: OffsetDateTime,
}

/// Participation joined with its team name, ready to be ranked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandingRow {
    pub team_id: TeamId,
    pub team_name: String,
    pub score: i64,
    pub solves: i64,
    pub last_attempt_at: Option<OffsetDateTime>,
    pub registration: i64,
}

impl StandingRow {
    /// Score descending, then earliest last attempt (never attempted last), then registration order.
    pub fn ranking_order(a: &Self, b: &Self) -> Ordering {
        b.score
            .cmp(&a.score)
            .then_with(|| match (a.last_attempt_at, b.last_attempt_at) {
                (Some(left), Some(right)) => left.cmp(&right),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.registration.cmp(&b.registration))
    }
}
