use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::dao::models::{
    ChallengeId, EventEntity, EventId, EventStatus, StandingRow, TeamId,
};

/// One ranked line of an event scoreboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ScoreboardEntry {
    pub rank: usize,
    pub team_id: TeamId,
    pub team_name: String,
    pub score: i64,
    pub solves: i64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_attempt_at: Option<OffsetDateTime>,
}

impl ScoreboardEntry {
    /// Number already-ordered rows from 1.
    pub fn ranked(rows: Vec<StandingRow>) -> Vec<Self> {
        rows.into_iter()
            .enumerate()
            .map(|(index, row)| Self {
                rank: index + 1,
                team_id: row.team_id,
                team_name: row.team_name,
                score: row.score,
                solves: row.solves,
                last_attempt_at: row.last_attempt_at,
            })
            .collect()
    }
}

/// First solve of a challenge, announced with the standings that include it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct FirstBloodNotice {
    pub challenge_id: ChallengeId,
    pub team_id: TeamId,
    pub team_name: Option<String>,
    pub points: i64,
}

/// Standings block carried by scoreboard `init` / `update` frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ScoreboardPayload {
    pub event_id: EventId,
    pub standings: Vec<ScoreboardEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_blood: Option<FirstBloodNotice>,
}

/// Event details with a short leaderboard once the contest has started.
#[derive(Debug, Serialize, ToSchema)]
pub struct EventSummary {
    pub id: EventId,
    pub name: String,
    pub status: EventStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub starts_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ends_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_teams: Option<Vec<ScoreboardEntry>>,
}

impl EventSummary {
    pub fn new(event: EventEntity, top_teams: Option<Vec<ScoreboardEntry>>) -> Self {
        Self {
            id: event.id,
            name: event.name,
            status: event.status,
            starts_at: event.starts_at,
            ends_at: event.ends_at,
            top_teams,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(team_id: TeamId, score: i64) -> StandingRow {
        StandingRow {
            team_id,
            team_name: format!("team-{team_id}"),
            score,
            solves: 1,
            last_attempt_at: None,
            registration: team_id,
        }
    }

    #[test]
    fn ranks_follow_row_order() {
        let entries = ScoreboardEntry::ranked(vec![row(3, 900), row(1, 500), row(2, 500)]);

        let ranks: Vec<(usize, TeamId)> = entries.iter().map(|e| (e.rank, e.team_id)).collect();
        assert_eq!(ranks, vec![(1, 3), (2, 1), (3, 2)]);
    }
}
