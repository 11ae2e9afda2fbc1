use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction, migrate::Migrator};
use time::OffsetDateTime;

use super::{
    config::PgConfig,
    connection::establish_pool,
    error::{PgDaoError, PgResult},
};
use crate::dao::{
    models::{
        ChallengeId, ChallengeLinkEntity, EventEntity, EventId, EventStatus, FlagEntity, FlagKind,
        NewChallengeLink, NewEvent, ParticipationEntity, SolveEntity, StandingRow, TeamEntity,
        TeamId,
    },
    score_store::ScoreStore,
    storage::{StorageError, StorageResult},
};
use crate::error::SubmissionError;
use crate::scoring::{FlagMatcher, SolveOutcome, SolveRequest, plan_solve};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const LINK_COLUMNS: &str = "event_id, challenge_id, reward, initial_reward, reward_min, decay, \
     reward_decrements, reward_first_blood, attempts, solves, first_blood_at, \
     first_blood_team_id, flag_type, flag_content";

/// PostgreSQL-backed [`ScoreStore`] implementation.
#[derive(Clone)]
pub struct PgScoreStore {
    pool: PgPool,
    matcher: Arc<dyn FlagMatcher>,
}

#[derive(sqlx::FromRow)]
struct ChallengeLinkRow {
    event_id: i64,
    challenge_id: i64,
    reward: i64,
    initial_reward: i64,
    reward_min: i64,
    decay: i64,
    reward_decrements: bool,
    reward_first_blood: i64,
    attempts: i64,
    solves: i64,
    first_blood_at: Option<OffsetDateTime>,
    first_blood_team_id: Option<i64>,
    flag_type: String,
    flag_content: String,
}

impl From<ChallengeLinkRow> for ChallengeLinkEntity {
    fn from(row: ChallengeLinkRow) -> Self {
        Self {
            event_id: row.event_id,
            challenge_id: row.challenge_id,
            reward: row.reward,
            initial_reward: row.initial_reward,
            reward_min: row.reward_min,
            decay: row.decay,
            reward_decrements: row.reward_decrements,
            reward_first_blood: row.reward_first_blood,
            attempts: row.attempts,
            solves: row.solves,
            first_blood_at: row.first_blood_at,
            first_blood_team_id: row.first_blood_team_id,
            flag: FlagEntity {
                kind: FlagKind::from_column(&row.flag_type),
                content: row.flag_content,
            },
        }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    name: String,
    status: String,
    starts_at: Option<OffsetDateTime>,
    ends_at: Option<OffsetDateTime>,
}

impl TryFrom<EventRow> for EventEntity {
    type Error = PgDaoError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<EventStatus>()
            .map_err(|message| PgDaoError::InvalidRow {
                entity: "event",
                message,
            })?;
        Ok(Self {
            id: row.id,
            name: row.name,
            status,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ParticipationRow {
    id: i64,
    event_id: i64,
    team_id: i64,
    score: i64,
    solves: i64,
    last_attempt_at: Option<OffsetDateTime>,
}

impl From<ParticipationRow> for ParticipationEntity {
    fn from(row: ParticipationRow) -> Self {
        Self {
            id: row.id,
            event_id: row.event_id,
            team_id: row.team_id,
            score: row.score,
            solves: row.solves,
            last_attempt_at: row.last_attempt_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StandingDbRow {
    team_id: i64,
    team_name: String,
    score: i64,
    solves: i64,
    last_attempt_at: Option<OffsetDateTime>,
    registration: i64,
}

#[derive(sqlx::FromRow)]
struct SolveRow {
    event_id: i64,
    challenge_id: i64,
    team_id: i64,
    points: i64,
    created_at: OffsetDateTime,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_foreign_key_violation(),
        _ => false,
    }
}

impl PgScoreStore {
    /// Connect, apply pending migrations and return a ready store.
    pub async fn connect(config: PgConfig, matcher: Arc<dyn FlagMatcher>) -> PgResult<Self> {
        let pool = establish_pool(&config).await?;
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|source| PgDaoError::Migrate { source })?;
        Ok(Self { pool, matcher })
    }

    async fn solve(self, request: SolveRequest) -> Result<SolveOutcome, SubmissionError> {
        let SolveRequest {
            event_id,
            challenge_id,
            team_id,
            flag,
        } = request;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(PgDaoError::query("begin submission"))
            .map_err(StorageError::from)?;
        let now = OffsetDateTime::now_utc();

        // Row lock: every submission for this link queues here until commit.
        let row = sqlx::query_as::<_, ChallengeLinkRow>(&format!(
            "SELECT {LINK_COLUMNS} FROM challenge_links \
             WHERE event_id = $1 AND challenge_id = $2 FOR UPDATE"
        ))
        .bind(event_id)
        .bind(challenge_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(PgDaoError::query("lock challenge link"))
        .map_err(StorageError::from)?;
        let Some(row) = row else {
            return Err(SubmissionError::ChallengeNotFound {
                event_id,
                challenge_id,
            });
        };
        let mut link = ChallengeLinkEntity::from(row);

        let already_solved: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM solves \
             WHERE event_id = $1 AND challenge_id = $2 AND team_id = $3)",
        )
        .bind(event_id)
        .bind(challenge_id)
        .bind(team_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(PgDaoError::query("check existing solve"))
        .map_err(StorageError::from)?;
        if already_solved {
            return Err(SubmissionError::AlreadySolved);
        }

        let touched = sqlx::query(
            "UPDATE participations SET last_attempt_at = $3 WHERE event_id = $1 AND team_id = $2",
        )
        .bind(event_id)
        .bind(team_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(PgDaoError::query("record attempt"))
        .map_err(StorageError::from)?
        .rows_affected();
        if touched == 0 {
            return Err(SubmissionError::NotRegistered { event_id, team_id });
        }

        sqlx::query(
            "UPDATE challenge_links SET attempts = attempts + 1 \
             WHERE event_id = $1 AND challenge_id = $2",
        )
        .bind(event_id)
        .bind(challenge_id)
        .execute(&mut *tx)
        .await
        .map_err(PgDaoError::query("count attempt"))
        .map_err(StorageError::from)?;
        link.attempts += 1;

        if !self.matcher.matches(&link.flag, &flag) {
            // Wrong guesses still count as attempts.
            commit(tx).await?;
            return Err(SubmissionError::IncorrectFlag);
        }

        let plan = plan_solve(&link);
        plan.apply_to(&mut link, team_id, now);

        sqlx::query(
            "UPDATE challenge_links \
             SET reward = $3, solves = $4, first_blood_at = $5, first_blood_team_id = $6 \
             WHERE event_id = $1 AND challenge_id = $2",
        )
        .bind(event_id)
        .bind(challenge_id)
        .bind(link.reward)
        .bind(link.solves)
        .bind(link.first_blood_at)
        .bind(link.first_blood_team_id)
        .execute(&mut *tx)
        .await
        .map_err(PgDaoError::query("update challenge link"))
        .map_err(StorageError::from)?;

        if plan.loss_points > 0 {
            sqlx::query(
                "UPDATE participations SET score = score - $3 \
                 WHERE event_id = $1 AND team_id IN \
                 (SELECT team_id FROM solves WHERE event_id = $1 AND challenge_id = $2)",
            )
            .bind(event_id)
            .bind(challenge_id)
            .bind(plan.loss_points)
            .execute(&mut *tx)
            .await
            .map_err(PgDaoError::query("deduct earlier solvers"))
            .map_err(StorageError::from)?;
        }

        let inserted = sqlx::query(
            "INSERT INTO solves (event_id, challenge_id, team_id, points, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event_id)
        .bind(challenge_id)
        .bind(team_id)
        .bind(plan.points_awarded)
        .bind(now)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Err(SubmissionError::AlreadySolved),
            Err(err) => {
                return Err(StorageError::from(PgDaoError::Query {
                    operation: "insert solve",
                    source: err,
                })
                .into());
            }
        }

        sqlx::query(
            "UPDATE participations SET score = score + $3, solves = solves + 1 \
             WHERE event_id = $1 AND team_id = $2",
        )
        .bind(event_id)
        .bind(team_id)
        .bind(plan.points_awarded)
        .execute(&mut *tx)
        .await
        .map_err(PgDaoError::query("credit solver"))
        .map_err(StorageError::from)?;

        commit(tx).await?;
        Ok(plan.outcome())
    }

    async fn standings(self, event_id: EventId, limit: Option<usize>) -> PgResult<Vec<StandingRow>> {
        let limit = limit.map(|value| i64::try_from(value).unwrap_or(i64::MAX));
        let rows = sqlx::query_as::<_, StandingDbRow>(
            "SELECT p.team_id, t.name AS team_name, p.score, p.solves, p.last_attempt_at, \
                    p.id AS registration \
             FROM participations p JOIN teams t ON t.id = p.team_id \
             WHERE p.event_id = $1 \
             ORDER BY p.score DESC, p.last_attempt_at ASC NULLS LAST, p.id ASC \
             LIMIT $2",
        )
        .bind(event_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(PgDaoError::query("fetch standings"))?;

        Ok(rows
            .into_iter()
            .map(|row| StandingRow {
                team_id: row.team_id,
                team_name: row.team_name,
                score: row.score,
                solves: row.solves,
                last_attempt_at: row.last_attempt_at,
                registration: row.registration,
            })
            .collect())
    }

    async fn find_event(self, event_id: EventId) -> PgResult<Option<EventEntity>> {
        let row = sqlx::query_as::<_, EventRow>(
            "SELECT id, name, status, starts_at, ends_at FROM events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PgDaoError::query("find event"))?;
        row.map(EventEntity::try_from).transpose()
    }

    async fn create_event(self, event: NewEvent) -> PgResult<EventEntity> {
        let row = sqlx::query_as::<_, EventRow>(
            "INSERT INTO events (name, status, starts_at, ends_at) VALUES ($1, $2, $3, $4) \
             RETURNING id, name, status, starts_at, ends_at",
        )
        .bind(event.name)
        .bind(event.status.as_str())
        .bind(event.starts_at)
        .bind(event.ends_at)
        .fetch_one(&self.pool)
        .await
        .map_err(PgDaoError::query("create event"))?;
        EventEntity::try_from(row)
    }

    async fn set_event_status(
        self,
        event_id: EventId,
        status: EventStatus,
    ) -> StorageResult<EventEntity> {
        let row = sqlx::query_as::<_, EventRow>(
            "UPDATE events SET status = $2 WHERE id = $1 \
             RETURNING id, name, status, starts_at, ends_at",
        )
        .bind(event_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(PgDaoError::query("update event status"))?;
        match row {
            Some(row) => Ok(EventEntity::try_from(row)?),
            None => Err(StorageError::not_found("event", event_id)),
        }
    }

    async fn create_team(self, name: String) -> StorageResult<TeamEntity> {
        let created = sqlx::query_as::<_, (i64, String)>(
            "INSERT INTO teams (name) VALUES ($1) RETURNING id, name",
        )
        .bind(&name)
        .fetch_one(&self.pool)
        .await;
        match created {
            Ok((id, name)) => Ok(TeamEntity { id, name }),
            Err(err) if is_unique_violation(&err) => Err(StorageError::conflict("team", name)),
            Err(err) => Err(PgDaoError::query("create team")(err).into()),
        }
    }

    async fn register_team(
        self,
        event_id: EventId,
        team_id: TeamId,
    ) -> StorageResult<ParticipationEntity> {
        let created = sqlx::query_as::<_, ParticipationRow>(
            "INSERT INTO participations (event_id, team_id) VALUES ($1, $2) \
             RETURNING id, event_id, team_id, score, solves, last_attempt_at",
        )
        .bind(event_id)
        .bind(team_id)
        .fetch_one(&self.pool)
        .await;
        match created {
            Ok(row) => Ok(row.into()),
            Err(err) if is_unique_violation(&err) => Err(StorageError::conflict(
                "participation",
                format!("{event_id}/{team_id}"),
            )),
            Err(err) if is_foreign_key_violation(&err) => Err(StorageError::not_found(
                "event or team",
                format!("{event_id}/{team_id}"),
            )),
            Err(err) => Err(PgDaoError::query("register team")(err).into()),
        }
    }

    async fn link_challenge(self, link: NewChallengeLink) -> StorageResult<ChallengeLinkEntity> {
        let key = format!("{}/{}", link.event_id, link.challenge_id);
        let created = sqlx::query_as::<_, ChallengeLinkRow>(&format!(
            "INSERT INTO challenge_links \
             (event_id, challenge_id, reward, initial_reward, reward_min, decay, \
              reward_decrements, reward_first_blood, flag_type, flag_content) \
             VALUES ($1, $2, $3, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {LINK_COLUMNS}"
        ))
        .bind(link.event_id)
        .bind(link.challenge_id)
        .bind(link.initial_reward)
        .bind(link.reward_min)
        .bind(link.decay)
        .bind(link.reward_decrements)
        .bind(link.reward_first_blood)
        .bind(link.flag.kind.as_str())
        .bind(link.flag.content)
        .fetch_one(&self.pool)
        .await;
        match created {
            Ok(row) => Ok(row.into()),
            Err(err) if is_unique_violation(&err) => {
                Err(StorageError::conflict("challenge link", key))
            }
            Err(err) if is_foreign_key_violation(&err) => {
                Err(StorageError::not_found("event", key))
            }
            Err(err) => Err(PgDaoError::query("link challenge")(err).into()),
        }
    }

    async fn find_challenge_link(
        self,
        event_id: EventId,
        challenge_id: ChallengeId,
    ) -> PgResult<Option<ChallengeLinkEntity>> {
        let row = sqlx::query_as::<_, ChallengeLinkRow>(&format!(
            "SELECT {LINK_COLUMNS} FROM challenge_links WHERE event_id = $1 AND challenge_id = $2"
        ))
        .bind(event_id)
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PgDaoError::query("find challenge link"))?;
        Ok(row.map(Into::into))
    }

    async fn find_participation(
        self,
        event_id: EventId,
        team_id: TeamId,
    ) -> PgResult<Option<ParticipationEntity>> {
        let row = sqlx::query_as::<_, ParticipationRow>(
            "SELECT id, event_id, team_id, score, solves, last_attempt_at \
             FROM participations WHERE event_id = $1 AND team_id = $2",
        )
        .bind(event_id)
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PgDaoError::query("find participation"))?;
        Ok(row.map(Into::into))
    }

    async fn list_solves(
        self,
        event_id: EventId,
        challenge_id: ChallengeId,
    ) -> PgResult<Vec<SolveEntity>> {
        let rows = sqlx::query_as::<_, SolveRow>(
            "SELECT event_id, challenge_id, team_id, points, created_at FROM solves \
             WHERE event_id = $1 AND challenge_id = $2 ORDER BY id ASC",
        )
        .bind(event_id)
        .bind(challenge_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PgDaoError::query("list solves"))?;
        Ok(rows
            .into_iter()
            .map(|row| SolveEntity {
                event_id: row.event_id,
                challenge_id: row.challenge_id,
                team_id: row.team_id,
                points: row.points,
                created_at: row.created_at,
            })
            .collect())
    }

    async fn ping(self) -> PgResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(PgDaoError::query("health check"))?;
        Ok(())
    }
}

async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), SubmissionError> {
    tx.commit()
        .await
        .map_err(PgDaoError::query("commit submission"))
        .map_err(StorageError::from)?;
    Ok(())
}

impl ScoreStore for PgScoreStore {
    fn process_solve(
        &self,
        request: SolveRequest,
    ) -> BoxFuture<'static, Result<SolveOutcome, SubmissionError>> {
        Box::pin(self.clone().solve(request))
    }

    fn fetch_standings(
        &self,
        event_id: EventId,
        limit: Option<usize>,
    ) -> BoxFuture<'static, StorageResult<Vec<StandingRow>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.standings(event_id, limit).await?) })
    }

    fn find_event(&self, event_id: EventId) -> BoxFuture<'static, StorageResult<Option<EventEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.find_event(event_id).await?) })
    }

    fn create_event(&self, event: NewEvent) -> BoxFuture<'static, StorageResult<EventEntity>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.create_event(event).await?) })
    }

    fn set_event_status(
        &self,
        event_id: EventId,
        status: EventStatus,
    ) -> BoxFuture<'static, StorageResult<EventEntity>> {
        Box::pin(self.clone().set_event_status(event_id, status))
    }

    fn create_team(&self, name: String) -> BoxFuture<'static, StorageResult<TeamEntity>> {
        Box::pin(self.clone().create_team(name))
    }

    fn register_team(
        &self,
        event_id: EventId,
        team_id: TeamId,
    ) -> BoxFuture<'static, StorageResult<ParticipationEntity>> {
        Box::pin(self.clone().register_team(event_id, team_id))
    }

    fn link_challenge(
        &self,
        link: NewChallengeLink,
    ) -> BoxFuture<'static, StorageResult<ChallengeLinkEntity>> {
        Box::pin(self.clone().link_challenge(link))
    }

    fn find_challenge_link(
        &self,
        event_id: EventId,
        challenge_id: ChallengeId,
    ) -> BoxFuture<'static, StorageResult<Option<ChallengeLinkEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.find_challenge_link(event_id, challenge_id).await?) })
    }

    fn find_participation(
        &self,
        event_id: EventId,
        team_id: TeamId,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipationEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.find_participation(event_id, team_id).await?) })
    }

    fn list_solves(
        &self,
        event_id: EventId,
        challenge_id: ChallengeId,
    ) -> BoxFuture<'static, StorageResult<Vec<SolveEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.list_solves(event_id, challenge_id).await?) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.ping().await?) })
    }
}
