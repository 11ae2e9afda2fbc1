//! Ranked standings for HTTP reads and live scoreboard frames.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use tokio::time::timeout;
use tracing::warn;

use crate::{
    dao::{
        models::{EventEntity, EventId, EventStatus},
        score_store::ScoreStore,
    },
    dto::{
        scoreboard::{EventSummary, FirstBloodNotice, ScoreboardEntry, ScoreboardPayload},
        ws::{InboundMessage, ServerEventKind, ServerMessage},
    },
    error::ServiceError,
    state::{
        SharedState,
        hub::{Connection, Delivery, InboundHandler, MissPolicy},
    },
};

/// Scoreboard sessions only receive. Each viewer gets an `init` frame read
/// after it joined; anything it sends gets an error reply.
pub struct ScoreboardHandler {
    store: Arc<dyn ScoreStore>,
    read_timeout: Duration,
}

impl ScoreboardHandler {
    pub fn new(store: Arc<dyn ScoreStore>, read_timeout: Duration) -> Self {
        Self { store, read_timeout }
    }
}

impl InboundHandler for ScoreboardHandler {
    fn on_message<'a>(
        &'a self,
        origin: &'a Arc<Connection>,
        _message: InboundMessage,
    ) -> BoxFuture<'a, Vec<Delivery>> {
        Box::pin(async move { vec![Delivery::reject(origin, "scoreboard is read-only")] })
    }

    fn on_join<'a>(&'a self, connection: &'a Arc<Connection>) -> BoxFuture<'a, Vec<Delivery>> {
        Box::pin(async move {
            let event_id = connection.group();
            let frame = timeout(
                self.read_timeout,
                standings_frame(self.store.as_ref(), ServerEventKind::Init, event_id, None),
            )
            .await;
            match frame {
                Ok(Ok(message)) => vec![Delivery::Direct {
                    target: connection.clone(),
                    message,
                    policy: MissPolicy::Evict,
                }],
                Ok(Err(err)) => {
                    warn!(event_id, error = %err, "initial standings unavailable");
                    vec![Delivery::reject(connection, "standings are unavailable, please reconnect")]
                }
                Err(_) => {
                    warn!(event_id, "initial standings timed out");
                    vec![Delivery::reject(connection, "standings are unavailable, please reconnect")]
                }
            }
        })
    }
}

/// How a scoreboard request is served, by event status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreboardMode {
    /// Live updates over a WebSocket.
    Live,
    /// Frozen JSON list.
    Final,
}

pub async fn require_event(state: &SharedState, event_id: EventId) -> Result<EventEntity, ServiceError> {
    state
        .store()
        .find_event(event_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("event `{event_id}` not found")))
}

pub async fn scoreboard_mode(
    state: &SharedState,
    event_id: EventId,
) -> Result<ScoreboardMode, ServiceError> {
    let event = require_event(state, event_id).await?;
    match event.status {
        EventStatus::Active => Ok(ScoreboardMode::Live),
        EventStatus::Ended => Ok(ScoreboardMode::Final),
        status => Err(ServiceError::Forbidden(format!(
            "scoreboard is not available while the event is {status}"
        ))),
    }
}

/// Ranked standings, optionally truncated to the first `limit` teams.
pub async fn ranked_standings(
    state: &SharedState,
    event_id: EventId,
    limit: Option<usize>,
) -> Result<Vec<ScoreboardEntry>, ServiceError> {
    let rows = state.store().fetch_standings(event_id, limit).await?;
    Ok(ScoreboardEntry::ranked(rows))
}

/// Event details plus the leading teams once the event is running or over.
pub async fn event_summary(state: &SharedState, event_id: EventId) -> Result<EventSummary, ServiceError> {
    let event = require_event(state, event_id).await?;
    let top = match event.status {
        EventStatus::Active | EventStatus::Ended => {
            Some(ranked_standings(state, event_id, Some(state.config().top_teams)).await?)
        }
        EventStatus::Draft | EventStatus::Published => None,
    };
    Ok(EventSummary::new(event, top))
}

/// Full standings of `event_id` as a live-session frame of `kind`.
pub async fn standings_frame(
    store: &dyn ScoreStore,
    kind: ServerEventKind,
    event_id: EventId,
    first_blood: Option<FirstBloodNotice>,
) -> Result<ServerMessage, ServiceError> {
    let standings = ScoreboardEntry::ranked(store.fetch_standings(event_id, None).await?);
    let first_blood = first_blood.map(|mut notice| {
        if notice.team_name.is_none() {
            notice.team_name = standings
                .iter()
                .find(|entry| entry.team_id == notice.team_id)
                .map(|entry| entry.team_name.clone());
        }
        notice
    });

    Ok(ServerMessage::new(kind, event_id).with_scoreboard(ScoreboardPayload {
        event_id,
        standings,
        first_blood,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::{FlagEntity, NewChallengeLink, NewEvent, TeamEntity},
            score_store::{MemoryScoreStore, ScoreStore},
        },
        identity::Identity,
        scoring::SolveRequest,
        state::{AppState, hub::Selector},
    };

    async fn seeded(status: EventStatus, teams: usize) -> (SharedState, EventId, Vec<TeamEntity>) {
        let store = Arc::new(MemoryScoreStore::default());
        let event = store
            .create_event(NewEvent {
                name: "quals".into(),
                status,
                starts_at: None,
                ends_at: None,
            })
            .await
            .unwrap();
        store
            .link_challenge(NewChallengeLink::with_defaults(
                event.id,
                1,
                FlagEntity::static_flag("CTF{a}"),
            ))
            .await
            .unwrap();
        let mut created = Vec::new();
        for n in 0..teams {
            let team = store.create_team(format!("team{n}")).await.unwrap();
            store.register_team(event.id, team.id).await.unwrap();
            created.push(team);
        }
        (AppState::new(store, AppConfig::default()), event.id, created)
    }

    #[tokio::test]
    async fn mode_follows_event_status() {
        for (status, expected) in [
            (EventStatus::Active, Some(ScoreboardMode::Live)),
            (EventStatus::Ended, Some(ScoreboardMode::Final)),
            (EventStatus::Published, None),
            (EventStatus::Draft, None),
        ] {
            let (state, event_id, _) = seeded(status, 0).await;
            let mode = scoreboard_mode(&state, event_id).await;
            match expected {
                Some(mode_expected) => assert_eq!(mode.unwrap(), mode_expected),
                None => assert!(matches!(mode, Err(ServiceError::Forbidden(_)))),
            }
        }
    }

    #[tokio::test]
    async fn unknown_event_is_not_found() {
        let (state, event_id, _) = seeded(EventStatus::Active, 0).await;
        assert!(matches!(
            scoreboard_mode(&state, event_id + 100).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn summary_includes_top_teams_only_once_started() {
        let (state, event_id, _) = seeded(EventStatus::Active, 5).await;
        let summary = event_summary(&state, event_id).await.unwrap();
        assert_eq!(summary.top_teams.map(|teams| teams.len()), Some(3));

        let (draft, draft_id, _) = seeded(EventStatus::Draft, 5).await;
        assert!(event_summary(&draft, draft_id).await.unwrap().top_teams.is_none());
    }

    #[tokio::test]
    async fn joining_viewer_first_receives_current_standings() {
        let (state, event_id, teams) = seeded(EventStatus::Active, 2).await;
        let (viewer, mut outbox) = Connection::new(Identity::default(), event_id, 8);
        state
            .scoreboard_hub()
            .handle()
            .join(viewer.clone(), Duration::from_millis(100))
            .await
            .unwrap();
        state
            .scoreboard_hub()
            .publish(
                std::future::ready(Some(ServerMessage::new(ServerEventKind::Update, event_id))),
                Selector::Group(event_id),
            )
            .await
            .unwrap();

        let init = tokio::time::timeout(Duration::from_secs(1), outbox.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(init.event, ServerEventKind::Init);
        let standings = init.scoreboard.clone().unwrap().standings;
        assert_eq!(standings.len(), teams.len());
        assert_eq!(outbox.next().await.unwrap().event, ServerEventKind::Update);
    }

    #[tokio::test]
    async fn frame_names_the_first_blood_team() {
        let (state, event_id, teams) = seeded(EventStatus::Active, 2).await;
        let solver = &teams[1];
        state
            .store()
            .process_solve(SolveRequest {
                event_id,
                challenge_id: 1,
                team_id: solver.id,
                flag: "CTF{a}".into(),
            })
            .await
            .unwrap();

        let frame = standings_frame(
            state.store().as_ref(),
            ServerEventKind::Update,
            event_id,
            Some(FirstBloodNotice {
                challenge_id: 1,
                team_id: solver.id,
                team_name: None,
                points: 500,
            }),
        )
        .await
        .unwrap();

        let payload = frame.scoreboard.unwrap();
        assert_eq!(payload.standings[0].team_id, solver.id);
        assert_eq!(payload.standings[0].rank, 1);
        assert_eq!(
            payload.first_blood.and_then(|notice| notice.team_name),
            Some("team1".into())
        );
    }
}
