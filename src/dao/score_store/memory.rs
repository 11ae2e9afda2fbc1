use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};

use crate::dao::{
    models::{
        ChallengeId, ChallengeLinkEntity, EventEntity, EventId, EventStatus, NewChallengeLink,
        NewEvent, ParticipationEntity, SolveEntity, StandingRow, TeamEntity, TeamId,
    },
    score_store::ScoreStore,
    storage::{StorageError, StorageResult},
};
use crate::error::SubmissionError;
use crate::scoring::{ExactMatch, FlagMatcher, SolveOutcome, SolveRequest, plan_solve};

type LinkKey = (EventId, ChallengeId);

/// Process-local [`ScoreStore`] used for tests and database-less runs.
///
/// Each challenge link owns a mutex acting as its row lock; the tables
/// themselves sit behind one `RwLock` so a solve's mutations become visible
/// in a single write section.
#[derive(Clone)]
pub struct MemoryScoreStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    tables: RwLock<Tables>,
    row_locks: DashMap<LinkKey, Arc<Mutex<()>>>,
    matcher: Arc<dyn FlagMatcher>,
}

#[derive(Default)]
struct Tables {
    sequence: i64,
    teams: IndexMap<TeamId, TeamEntity>,
    events: IndexMap<EventId, EventEntity>,
    links: HashMap<LinkKey, ChallengeLinkEntity>,
    /// Insertion order is registration order.
    participations: IndexMap<(EventId, TeamId), ParticipationEntity>,
    solves: Vec<SolveEntity>,
    solved: HashSet<(EventId, ChallengeId, TeamId)>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }
}

impl Default for MemoryScoreStore {
    fn default() -> Self {
        Self::new(Arc::new(ExactMatch))
    }
}

impl MemoryScoreStore {
    pub fn new(matcher: Arc<dyn FlagMatcher>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                tables: RwLock::new(Tables::default()),
                row_locks: DashMap::new(),
                matcher,
            }),
        }
    }
}

impl MemoryInner {
    async fn process_solve(&self, request: SolveRequest) -> Result<SolveOutcome, SubmissionError> {
        let SolveRequest {
            event_id,
            challenge_id,
            team_id,
            flag,
        } = request;
        let key = (event_id, challenge_id);

        // Links are never removed, so a missing lock means a missing link.
        let row_lock = self
            .row_locks
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(SubmissionError::ChallengeNotFound {
                event_id,
                challenge_id,
            })?;
        let _row = row_lock.lock_owned().await;
        let now = OffsetDateTime::now_utc();

        let (mut link, earlier_solvers) = {
            let tables = self.tables.read().await;
            let link = tables
                .links
                .get(&key)
                .cloned()
                .ok_or(SubmissionError::ChallengeNotFound {
                    event_id,
                    challenge_id,
                })?;
            if tables.solved.contains(&(event_id, challenge_id, team_id)) {
                return Err(SubmissionError::AlreadySolved);
            }
            if !tables.participations.contains_key(&(event_id, team_id)) {
                return Err(SubmissionError::NotRegistered { event_id, team_id });
            }
            let earlier_solvers: Vec<TeamId> = tables
                .solves
                .iter()
                .filter(|solve| solve.event_id == event_id && solve.challenge_id == challenge_id)
                .map(|solve| solve.team_id)
                .collect();
            (link, earlier_solvers)
        };

        link.attempts += 1;

        if !self.matcher.matches(&link.flag, &flag) {
            // Wrong guesses still count as attempts.
            let mut tables = self.tables.write().await;
            if let Some(stored) = tables.links.get_mut(&key) {
                stored.attempts = link.attempts;
            }
            if let Some(participation) = tables.participations.get_mut(&(event_id, team_id)) {
                participation.last_attempt_at = Some(now);
            }
            return Err(SubmissionError::IncorrectFlag);
        }

        let plan = plan_solve(&link);
        plan.apply_to(&mut link, team_id, now);

        let mut tables = self.tables.write().await;
        if !tables.participations.contains_key(&(event_id, team_id)) {
            return Err(SubmissionError::NotRegistered { event_id, team_id });
        }
        if !tables.solved.insert((event_id, challenge_id, team_id)) {
            return Err(SubmissionError::AlreadySolved);
        }

        tables.links.insert(key, link);
        if plan.loss_points > 0 {
            for solver in earlier_solvers {
                if let Some(participation) = tables.participations.get_mut(&(event_id, solver)) {
                    participation.score -= plan.loss_points;
                }
            }
        }
        tables.solves.push(SolveEntity {
            event_id,
            challenge_id,
            team_id,
            points: plan.points_awarded,
            created_at: now,
        });
        if let Some(participation) = tables.participations.get_mut(&(event_id, team_id)) {
            participation.score += plan.points_awarded;
            participation.solves += 1;
            participation.last_attempt_at = Some(now);
        }

        Ok(plan.outcome())
    }

    async fn fetch_standings(&self, event_id: EventId, limit: Option<usize>) -> Vec<StandingRow> {
        let tables = self.tables.read().await;
        let mut rows: Vec<StandingRow> = tables
            .participations
            .values()
            .filter(|participation| participation.event_id == event_id)
            .map(|participation| StandingRow {
                team_id: participation.team_id,
                team_name: tables
                    .teams
                    .get(&participation.team_id)
                    .map(|team| team.name.clone())
                    .unwrap_or_default(),
                score: participation.score,
                solves: participation.solves,
                last_attempt_at: participation.last_attempt_at,
                registration: participation.id,
            })
            .collect();
        rows.sort_by(StandingRow::ranking_order);
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        rows
    }

    async fn create_event(&self, event: NewEvent) -> EventEntity {
        let mut tables = self.tables.write().await;
        let entity = EventEntity {
            id: tables.next_id(),
            name: event.name,
            status: event.status,
            starts_at: event.starts_at,
            ends_at: event.ends_at,
        };
        tables.events.insert(entity.id, entity.clone());
        entity
    }

    async fn set_event_status(
        &self,
        event_id: EventId,
        status: EventStatus,
    ) -> StorageResult<EventEntity> {
        let mut tables = self.tables.write().await;
        let event = tables
            .events
            .get_mut(&event_id)
            .ok_or_else(|| StorageError::not_found("event", event_id))?;
        event.status = status;
        Ok(event.clone())
    }

    async fn create_team(&self, name: String) -> StorageResult<TeamEntity> {
        let mut tables = self.tables.write().await;
        if tables.teams.values().any(|team| team.name == name) {
            return Err(StorageError::conflict("team", name));
        }
        let team = TeamEntity {
            id: tables.next_id(),
            name,
        };
        tables.teams.insert(team.id, team.clone());
        Ok(team)
    }

    async fn register_team(
        &self,
        event_id: EventId,
        team_id: TeamId,
    ) -> StorageResult<ParticipationEntity> {
        let mut tables = self.tables.write().await;
        if !tables.events.contains_key(&event_id) {
            return Err(StorageError::not_found("event", event_id));
        }
        if !tables.teams.contains_key(&team_id) {
            return Err(StorageError::not_found("team", team_id));
        }
        if tables.participations.contains_key(&(event_id, team_id)) {
            return Err(StorageError::conflict(
                "participation",
                format!("{event_id}/{team_id}"),
            ));
        }
        let participation = ParticipationEntity {
            id: tables.next_id(),
            event_id,
            team_id,
            score: 0,
            solves: 0,
            last_attempt_at: None,
        };
        tables
            .participations
            .insert((event_id, team_id), participation.clone());
        Ok(participation)
    }

    async fn link_challenge(&self, link: NewChallengeLink) -> StorageResult<ChallengeLinkEntity> {
        let key = (link.event_id, link.challenge_id);
        let mut tables = self.tables.write().await;
        if !tables.events.contains_key(&link.event_id) {
            return Err(StorageError::not_found("event", link.event_id));
        }
        if tables.links.contains_key(&key) {
            return Err(StorageError::conflict(
                "challenge link",
                format!("{}/{}", link.event_id, link.challenge_id),
            ));
        }
        let entity = ChallengeLinkEntity::from(link);
        tables.links.insert(key, entity.clone());
        self.row_locks.entry(key).or_default();
        Ok(entity)
    }
}

impl ScoreStore for MemoryScoreStore {
    fn process_solve(
        &self,
        request: SolveRequest,
    ) -> BoxFuture<'static, Result<SolveOutcome, SubmissionError>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.process_solve(request).await })
    }

    fn fetch_standings(
        &self,
        event_id: EventId,
        limit: Option<usize>,
    ) -> BoxFuture<'static, StorageResult<Vec<StandingRow>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.fetch_standings(event_id, limit).await) })
    }

    fn find_event(&self, event_id: EventId) -> BoxFuture<'static, StorageResult<Option<EventEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.tables.read().await.events.get(&event_id).cloned()) })
    }

    fn create_event(&self, event: NewEvent) -> BoxFuture<'static, StorageResult<EventEntity>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.create_event(event).await) })
    }

    fn set_event_status(
        &self,
        event_id: EventId,
        status: EventStatus,
    ) -> BoxFuture<'static, StorageResult<EventEntity>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.set_event_status(event_id, status).await })
    }

    fn create_team(&self, name: String) -> BoxFuture<'static, StorageResult<TeamEntity>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.create_team(name).await })
    }

    fn register_team(
        &self,
        event_id: EventId,
        team_id: TeamId,
    ) -> BoxFuture<'static, StorageResult<ParticipationEntity>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.register_team(event_id, team_id).await })
    }

    fn link_challenge(
        &self,
        link: NewChallengeLink,
    ) -> BoxFuture<'static, StorageResult<ChallengeLinkEntity>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.link_challenge(link).await })
    }

    fn find_challenge_link(
        &self,
        event_id: EventId,
        challenge_id: ChallengeId,
    ) -> BoxFuture<'static, StorageResult<Option<ChallengeLinkEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .tables
                .read()
                .await
                .links
                .get(&(event_id, challenge_id))
                .cloned())
        })
    }

    fn find_participation(
        &self,
        event_id: EventId,
        team_id: TeamId,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipationEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .tables
                .read()
                .await
                .participations
                .get(&(event_id, team_id))
                .cloned())
        })
    }

    fn list_solves(
        &self,
        event_id: EventId,
        challenge_id: ChallengeId,
    ) -> BoxFuture<'static, StorageResult<Vec<SolveEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let tables = inner.tables.read().await;
            Ok(tables
                .solves
                .iter()
                .filter(|solve| solve.event_id == event_id && solve.challenge_id == challenge_id)
                .cloned()
                .collect())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::FlagEntity;

    async fn seeded(teams: usize) -> (MemoryScoreStore, EventId, Vec<TeamId>) {
        let store = MemoryScoreStore::default();
        let event = store
            .create_event(NewEvent {
                name: "qualifiers".into(),
                status: EventStatus::Active,
                starts_at: None,
                ends_at: None,
            })
            .await
            .unwrap();
        store
            .link_challenge(NewChallengeLink::with_defaults(
                event.id,
                7,
                FlagEntity::static_flag("CTF{ok}"),
            ))
            .await
            .unwrap();
        let mut ids = Vec::new();
        for index in 0..teams {
            let team = store.create_team(format!("team-{index}")).await.unwrap();
            store.register_team(event.id, team.id).await.unwrap();
            ids.push(team.id);
        }
        (store, event.id, ids)
    }

    fn submit(event_id: EventId, team_id: TeamId, flag: &str) -> SolveRequest {
        SolveRequest {
            event_id,
            challenge_id: 7,
            team_id,
            flag: flag.into(),
        }
    }

    #[tokio::test]
    async fn first_solve_takes_first_blood_and_full_reward() {
        let (store, event, teams) = seeded(1).await;

        let outcome = store.process_solve(submit(event, teams[0], "CTF{ok}")).await.unwrap();

        assert!(outcome.first_blood);
        assert_eq!(outcome.points_awarded, 500);
        let link = store.find_challenge_link(event, 7).await.unwrap().unwrap();
        assert_eq!(link.solves, 1);
        assert_eq!(link.attempts, 1);
        assert_eq!(link.first_blood_team_id, Some(teams[0]));
        let sheet = store.find_participation(event, teams[0]).await.unwrap().unwrap();
        assert_eq!((sheet.score, sheet.solves), (500, 1));
    }

    #[tokio::test]
    async fn incorrect_flag_keeps_attempt_but_awards_nothing() {
        let (store, event, teams) = seeded(1).await;

        let err = store
            .process_solve(submit(event, teams[0], "CTF{nope}"))
            .await
            .unwrap_err();

        assert!(matches!(err, SubmissionError::IncorrectFlag));
        let link = store.find_challenge_link(event, 7).await.unwrap().unwrap();
        assert_eq!((link.attempts, link.solves), (1, 0));
        assert!(link.first_blood_at.is_none());
        let sheet = store.find_participation(event, teams[0]).await.unwrap().unwrap();
        assert_eq!(sheet.score, 0);
        assert!(sheet.last_attempt_at.is_some());
    }

    #[tokio::test]
    async fn second_solve_by_same_team_is_rejected() {
        let (store, event, teams) = seeded(1).await;
        store.process_solve(submit(event, teams[0], "CTF{ok}")).await.unwrap();

        let err = store
            .process_solve(submit(event, teams[0], "CTF{ok}"))
            .await
            .unwrap_err();

        assert!(matches!(err, SubmissionError::AlreadySolved));
        let sheet = store.find_participation(event, teams[0]).await.unwrap().unwrap();
        assert_eq!(sheet.solves, 1);
    }

    #[tokio::test]
    async fn unknown_link_and_unregistered_team_are_reported() {
        let (store, event, _) = seeded(0).await;
        let outsider = store.create_team("outsider".into()).await.unwrap();

        let missing = store
            .process_solve(SolveRequest {
                event_id: event,
                challenge_id: 99,
                team_id: outsider.id,
                flag: "CTF{ok}".into(),
            })
            .await
            .unwrap_err();
        let unregistered = store
            .process_solve(submit(event, outsider.id, "CTF{ok}"))
            .await
            .unwrap_err();

        assert!(matches!(missing, SubmissionError::ChallengeNotFound { .. }));
        assert!(matches!(unregistered, SubmissionError::NotRegistered { .. }));
        let link = store.find_challenge_link(event, 7).await.unwrap().unwrap();
        assert_eq!(link.attempts, 0);
    }

    #[tokio::test]
    async fn later_solves_deduct_from_earlier_solvers() {
        let (store, event, teams) = seeded(3).await;
        store
            .link_challenge(NewChallengeLink {
                reward_min: 100,
                decay: 2,
                ..NewChallengeLink::with_defaults(event, 8, FlagEntity::static_flag("CTF{steep}"))
            })
            .await
            .unwrap();
        let steep = |team_id| SolveRequest {
            event_id: event,
            challenge_id: 8,
            team_id,
            flag: "CTF{steep}".into(),
        };

        let first = store.process_solve(steep(teams[0])).await.unwrap();
        let second = store.process_solve(steep(teams[1])).await.unwrap();
        let third = store.process_solve(steep(teams[2])).await.unwrap();

        assert_eq!((first.points_awarded, first.loss_points), (500, 0));
        assert_eq!((second.points_awarded, second.loss_points), (400, 100));
        assert_eq!((third.points_awarded, third.loss_points), (100, 300));
        for team in &teams {
            let sheet = store.find_participation(event, *team).await.unwrap().unwrap();
            assert_eq!(sheet.score, 100);
        }
    }

    #[tokio::test]
    async fn every_solver_ends_on_the_current_reward() {
        let (store, event, teams) = seeded(12).await;

        for team in &teams {
            store.process_solve(submit(event, *team, "CTF{ok}")).await.unwrap();
        }

        let link = store.find_challenge_link(event, 7).await.unwrap().unwrap();
        assert!(link.reward < 500);
        for team in &teams {
            let sheet = store.find_participation(event, *team).await.unwrap().unwrap();
            assert_eq!(sheet.score, link.reward);
        }
    }

    #[tokio::test]
    async fn concurrent_duplicates_commit_exactly_once() {
        let (store, event, teams) = seeded(1).await;
        let team = teams[0];

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.process_solve(submit(event, team, "CTF{ok}")).await })
            })
            .collect();

        let mut solved = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => solved += 1,
                Err(SubmissionError::AlreadySolved) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!((solved, duplicates), (1, 15));
        assert_eq!(store.list_solves(event, 7).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_teams_see_one_first_blood() {
        let (store, event, teams) = seeded(8).await;

        let handles: Vec<_> = teams
            .iter()
            .map(|team| {
                let store = store.clone();
                let team = *team;
                tokio::spawn(async move { store.process_solve(submit(event, team, "CTF{ok}")).await })
            })
            .collect();

        let mut first_bloods = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().first_blood {
                first_bloods += 1;
            }
        }

        assert_eq!(first_bloods, 1);
        let link = store.find_challenge_link(event, 7).await.unwrap().unwrap();
        assert_eq!(link.solves, 8);
    }

    #[tokio::test]
    async fn standings_rank_by_score_then_last_attempt() {
        let (store, event, teams) = seeded(3).await;
        store.process_solve(submit(event, teams[2], "CTF{ok}")).await.unwrap();
        store.process_solve(submit(event, teams[1], "CTF{bad}")).await.unwrap_err();

        let rows = store.fetch_standings(event, None).await.unwrap();

        let order: Vec<TeamId> = rows.iter().map(|row| row.team_id).collect();
        // teams[1] attempted, teams[0] never did.
        assert_eq!(order, vec![teams[2], teams[1], teams[0]]);
        assert_eq!(store.fetch_standings(event, Some(2)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_registration_and_team_names_conflict() {
        let (store, event, teams) = seeded(1).await;

        let duplicate = store.register_team(event, teams[0]).await.unwrap_err();
        let name = store.create_team("team-0".into()).await.unwrap_err();

        assert!(matches!(duplicate, StorageError::Conflict { .. }));
        assert!(matches!(name, StorageError::Conflict { .. }));
    }
}
