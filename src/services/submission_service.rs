//! Flag submission entry point: caller checks, the transactional solve and
//! the post-commit scoreboard publication.

use tokio::time::timeout;
use tracing::{info, warn};

use crate::{
    dao::models::{ChallengeId, EventId, EventStatus},
    dto::{scoreboard::FirstBloodNotice, ws::ServerEventKind},
    error::ServiceError,
    identity::{Identity, Role},
    scoring::{SolveOutcome, SolveRequest},
    services::scoreboard_service,
    state::{SharedState, hub::Selector},
};

/// Resolve a flag submission for the caller's team.
///
/// The solve is committed before anything is published; a failed or slow
/// publication is logged and never changes the returned outcome.
pub async fn submit_flag(
    state: &SharedState,
    identity: &Identity,
    event_id: EventId,
    challenge_id: ChallengeId,
    flag: String,
) -> Result<SolveOutcome, ServiceError> {
    let team_id = match (identity.user_id, identity.role, identity.team_id) {
        (None, _, _) => return Err(ServiceError::Unauthorized("login required".into())),
        (Some(_), Role::User, Some(team_id)) => team_id,
        (Some(_), Role::User, None) => {
            return Err(ServiceError::Forbidden("you must be in a team to submit flags".into()));
        }
        (Some(_), _, _) => {
            return Err(ServiceError::Forbidden("only players can submit flags".into()));
        }
    };

    let event = scoreboard_service::require_event(state, event_id).await?;
    if event.status != EventStatus::Active {
        return Err(ServiceError::Forbidden(format!(
            "event `{event_id}` is not active"
        )));
    }

    let outcome = state
        .store()
        .process_solve(SolveRequest {
            event_id,
            challenge_id,
            team_id,
            flag,
        })
        .await?;

    info!(
        event_id,
        challenge_id,
        team_id,
        points = outcome.points_awarded,
        reward = outcome.reward,
        loss = outcome.loss_points,
        "challenge solved"
    );

    let first_blood = outcome.first_blood.then(|| {
        info!(event_id, challenge_id, team_id, "first blood");
        FirstBloodNotice {
            challenge_id,
            team_id,
            team_name: None,
            points: outcome.points_awarded,
        }
    });
    publish_standings(state, event_id, first_blood).await;

    Ok(outcome)
}

/// Push the event's standings to its scoreboard group.
///
/// The standings are read by the hub loop when it reaches the publication,
/// so concurrent solves reach viewers in the order their reads happened.
pub async fn publish_standings(
    state: &SharedState,
    event_id: EventId,
    first_blood: Option<FirstBloodNotice>,
) {
    let store = state.store().clone();
    let limit = state.config().publish_timeout;
    let frame = async move {
        let read = scoreboard_service::standings_frame(
            store.as_ref(),
            ServerEventKind::Update,
            event_id,
            first_blood,
        );
        match timeout(limit, read).await {
            Ok(Ok(frame)) => Some(frame),
            Ok(Err(err)) => {
                warn!(event_id, error = %err, "scoreboard update not built");
                None
            }
            Err(_) => {
                warn!(event_id, "scoreboard update timed out");
                None
            }
        }
    };

    if let Err(err) = state
        .scoreboard_hub()
        .publish(frame, Selector::Group(event_id))
        .await
    {
        warn!(event_id, error = %err, "scoreboard update not published");
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::{FlagEntity, NewChallengeLink, NewEvent, TeamId},
            score_store::{MemoryScoreStore, ScoreStore},
        },
        error::SubmissionError,
        state::{AppState, hub::Connection},
    };

    struct Fixture {
        state: SharedState,
        event_id: EventId,
        teams: Vec<TeamId>,
    }

    async fn fixture(status: EventStatus) -> Fixture {
        let store = Arc::new(MemoryScoreStore::default());
        let event = store
            .create_event(NewEvent {
                name: "finals".into(),
                status,
                starts_at: None,
                ends_at: None,
            })
            .await
            .unwrap();
        store
            .link_challenge(NewChallengeLink::with_defaults(
                event.id,
                3,
                FlagEntity::static_flag("CTF{ok}"),
            ))
            .await
            .unwrap();
        let mut teams = Vec::new();
        for name in ["red", "blue"] {
            let team = store.create_team(name.into()).await.unwrap();
            store.register_team(event.id, team.id).await.unwrap();
            teams.push(team.id);
        }
        Fixture {
            state: AppState::new(store, AppConfig::default()),
            event_id: event.id,
            teams,
        }
    }

    fn player(team_id: TeamId) -> Identity {
        Identity {
            user_id: Some(10 + team_id),
            role: Role::User,
            team_id: Some(team_id),
            name: None,
        }
    }

    #[tokio::test]
    async fn callers_without_team_or_player_role_are_refused() {
        let fx = fixture(EventStatus::Active).await;
        let submit = |identity: Identity| {
            let state = fx.state.clone();
            let event_id = fx.event_id;
            async move { submit_flag(&state, &identity, event_id, 3, "CTF{ok}".into()).await }
        };

        assert!(matches!(
            submit(Identity::default()).await,
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            submit(Identity {
                team_id: None,
                ..player(fx.teams[0])
            })
            .await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            submit(Identity {
                role: Role::Organizer,
                ..player(fx.teams[0])
            })
            .await,
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn inactive_event_rejects_submissions() {
        let fx = fixture(EventStatus::Ended).await;
        let result = submit_flag(&fx.state, &player(fx.teams[0]), fx.event_id, 3, "CTF{ok}".into()).await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));
    }

    #[tokio::test]
    async fn correct_flag_is_published_to_the_event_group() {
        let fx = fixture(EventStatus::Active).await;
        let (viewer, mut outbox) = Connection::new(Identity::default(), fx.event_id, 8);
        fx.state
            .scoreboard_hub()
            .handle()
            .join(viewer.clone(), Duration::from_millis(100))
            .await
            .unwrap();
        for _ in 0..100 {
            if fx.state.scoreboard_hub().registry().contains(viewer.id()).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let outcome = submit_flag(&fx.state, &player(fx.teams[1]), fx.event_id, 3, "CTF{ok}".into())
            .await
            .unwrap();
        assert!(outcome.first_blood);
        assert_eq!(outcome.points_awarded, 500);

        let init = tokio::time::timeout(Duration::from_secs(1), outbox.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(init.event, ServerEventKind::Init);
        let frame = tokio::time::timeout(Duration::from_secs(1), outbox.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.event, ServerEventKind::Update);
        let payload = frame.scoreboard.clone().unwrap();
        assert_eq!(payload.standings[0].team_id, fx.teams[1]);
        assert_eq!(payload.standings[0].score, 500);
        let notice = payload.first_blood.unwrap();
        assert_eq!(notice.team_name.as_deref(), Some("blue"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn last_update_after_concurrent_solves_is_the_newest() {
        let fx = fixture(EventStatus::Active).await;
        let (viewer, mut outbox) = Connection::new(Identity::default(), fx.event_id, 8);
        fx.state
            .scoreboard_hub()
            .handle()
            .join(viewer.clone(), Duration::from_millis(100))
            .await
            .unwrap();
        let init = tokio::time::timeout(Duration::from_secs(1), outbox.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(init.event, ServerEventKind::Init);

        let solves: Vec<_> = fx
            .teams
            .iter()
            .map(|&team| {
                let state = fx.state.clone();
                let event_id = fx.event_id;
                tokio::spawn(async move {
                    submit_flag(&state, &player(team), event_id, 3, "CTF{ok}".into()).await
                })
            })
            .collect();
        for solve in solves {
            solve.await.unwrap().unwrap();
        }

        let mut last = None;
        for _ in 0..fx.teams.len() {
            let frame = tokio::time::timeout(Duration::from_secs(1), outbox.next())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(frame.event, ServerEventKind::Update);
            last = frame.scoreboard.clone();
        }
        let shown: Vec<(TeamId, i64)> = last
            .unwrap()
            .standings
            .iter()
            .map(|entry| (entry.team_id, entry.score))
            .collect();
        let current: Vec<(TeamId, i64)> = fx
            .state
            .store()
            .fetch_standings(fx.event_id, None)
            .await
            .unwrap()
            .iter()
            .map(|row| (row.team_id, row.score))
            .collect();
        assert_eq!(shown, current);
    }

    #[tokio::test]
    async fn second_solve_by_same_team_conflicts() {
        let fx = fixture(EventStatus::Active).await;
        let identity = player(fx.teams[0]);
        submit_flag(&fx.state, &identity, fx.event_id, 3, "CTF{ok}".into())
            .await
            .unwrap();

        let again = submit_flag(&fx.state, &identity, fx.event_id, 3, "CTF{ok}".into()).await;

        assert!(matches!(
            again,
            Err(ServiceError::Submission(SubmissionError::AlreadySolved))
        ));
    }
}
