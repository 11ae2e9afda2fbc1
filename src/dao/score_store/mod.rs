pub mod memory;
#[cfg(feature = "postgres-store")]
pub mod postgres;

use futures::future::BoxFuture;

use crate::dao::models::{
    ChallengeId, ChallengeLinkEntity, EventEntity, EventId, EventStatus, NewChallengeLink,
    NewEvent, ParticipationEntity, SolveEntity, StandingRow, TeamEntity, TeamId,
};
use crate::dao::storage::StorageResult;
use crate::error::SubmissionError;
use crate::scoring::{SolveOutcome, SolveRequest};

pub use memory::MemoryScoreStore;

/// Abstraction over the persistence layer for events, teams and solves.
///
/// `process_solve` is the only operation with transactional guarantees: it
/// must serialize on the (event, challenge) link and commit every score
/// change of a solve atomically, or none of them.
pub trait ScoreStore: Send + Sync {
    fn process_solve(
        &self,
        request: SolveRequest,
    ) -> BoxFuture<'static, Result<SolveOutcome, SubmissionError>>;
    /// Ranked participations for an event. `None` returns every team.
    fn fetch_standings(
        &self,
        event_id: EventId,
        limit: Option<usize>,
    ) -> BoxFuture<'static, StorageResult<Vec<StandingRow>>>;
    fn find_event(&self, event_id: EventId) -> BoxFuture<'static, StorageResult<Option<EventEntity>>>;
    fn create_event(&self, event: NewEvent) -> BoxFuture<'static, StorageResult<EventEntity>>;
    fn set_event_status(
        &self,
        event_id: EventId,
        status: EventStatus,
    ) -> BoxFuture<'static, StorageResult<EventEntity>>;
    fn create_team(&self, name: String) -> BoxFuture<'static, StorageResult<TeamEntity>>;
    fn register_team(
        &self,
        event_id: EventId,
        team_id: TeamId,
    ) -> BoxFuture<'static, StorageResult<ParticipationEntity>>;
    fn link_challenge(
        &self,
        link: NewChallengeLink,
    ) -> BoxFuture<'static, StorageResult<ChallengeLinkEntity>>;
    fn find_challenge_link(
        &self,
        event_id: EventId,
        challenge_id: ChallengeId,
    ) -> BoxFuture<'static, StorageResult<Option<ChallengeLinkEntity>>>;
    fn find_participation(
        &self,
        event_id: EventId,
        team_id: TeamId,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipationEntity>>>;
    /// Solves of a challenge in commit order.
    fn list_solves(
        &self,
        event_id: EventId,
        challenge_id: ChallengeId,
    ) -> BoxFuture<'static, StorageResult<Vec<SolveEntity>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
