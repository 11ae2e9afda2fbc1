//! Scoring rules applied inside a submission transaction.
//!
//! Everything here is pure: backends lock and load the challenge link, ask
//! [`plan_solve`] what the solve is worth, then persist the plan.

use time::OffsetDateTime;

use crate::dao::models::{ChallengeId, ChallengeLinkEntity, EventId, FlagEntity, FlagKind, TeamId};

/// Flag submission for a single (event, challenge, team) triple.
#[derive(Debug, Clone)]
pub struct SolveRequest {
    pub event_id: EventId,
    pub challenge_id: ChallengeId,
    pub team_id: TeamId,
    pub flag: String,
}

/// Result of a committed solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolveOutcome {
    pub first_blood: bool,
    pub points_awarded: i64,
    /// Challenge reward after this solve.
    pub reward: i64,
    /// Points retroactively removed from every earlier solver.
    pub loss_points: i64,
}

/// Decide whether a submitted value matches the stored flag.
pub trait FlagMatcher: Send + Sync {
    fn matches(&self, expected: &FlagEntity, submitted: &str) -> bool;
}

/// Byte-for-byte comparison. Unknown flag types fall back to it as well.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl FlagMatcher for ExactMatch {
    fn matches(&self, expected: &FlagEntity, submitted: &str) -> bool {
        match expected.kind {
            FlagKind::Static | FlagKind::Unknown => expected.content == submitted,
        }
    }
}

/// Reward for the next solve given the number of solves recorded so far.
///
/// Quadratic ease-out from `initial_reward` down to `reward_min`, reached after
/// `decay` solves. Links with decrements disabled keep their current reward.
pub fn next_reward(link: &ChallengeLinkEntity) -> i64 {
    if !link.reward_decrements {
        return link.reward;
    }
    if link.solves >= link.decay {
        return link.reward_min;
    }

    let initial = link.initial_reward as f64;
    let min = link.reward_min as f64;
    let decay = link.decay as f64;
    let solves = link.solves as f64;

    let value = ((min - initial) / decay.powi(2)) * solves.powi(2) + initial;
    (value.ceil() as i64).max(link.reward_min)
}

/// What a correct submission is worth against the locked link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolvePlan {
    pub reward: i64,
    pub points_awarded: i64,
    pub loss_points: i64,
    pub first_blood: bool,
}

pub fn plan_solve(link: &ChallengeLinkEntity) -> SolvePlan {
    let reward = next_reward(link);
    let loss_points = (link.reward - reward).max(0);
    let first_blood = link.first_blood_at.is_none();
    let points_awarded = if first_blood {
        reward + link.reward_first_blood
    } else {
        reward
    };

    SolvePlan {
        reward,
        points_awarded,
        loss_points,
        first_blood,
    }
}

impl SolvePlan {
    /// Write the plan onto the link row (reward, solve count, first-blood stamp).
    pub fn apply_to(&self, link: &mut ChallengeLinkEntity, team_id: TeamId, now: OffsetDateTime) {
        link.reward = self.reward;
        link.solves += 1;
        if self.first_blood {
            link.first_blood_at = Some(now);
            link.first_blood_team_id = Some(team_id);
        }
    }

    pub fn outcome(&self) -> SolveOutcome {
        SolveOutcome {
            first_blood: self.first_blood,
            points_awarded: self.points_awarded,
            reward: self.reward,
            loss_points: self.loss_points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::NewChallengeLink;

    fn link(initial: i64, min: i64, decay: i64) -> ChallengeLinkEntity {
        let mut link: ChallengeLinkEntity =
            NewChallengeLink::with_defaults(1, 1, FlagEntity::static_flag("flag{x}")).into();
        link.initial_reward = initial;
        link.reward = initial;
        link.reward_min = min;
        link.decay = decay;
        link
    }

    #[test]
    fn first_solver_gets_initial_reward() {
        let link = link(500, 350, 30);
        assert_eq!(next_reward(&link), 500);
    }

    #[test]
    fn reward_reaches_floor_at_decay() {
        let mut link = link(500, 350, 30);
        link.solves = 30;
        assert_eq!(next_reward(&link), 350);
        link.solves = 90;
        assert_eq!(next_reward(&link), 350);
    }

    #[test]
    fn reward_follows_quadratic_curve() {
        let mut link = link(500, 350, 30);
        link.solves = 1;
        assert_eq!(next_reward(&link), 500);
        link.solves = 15;
        assert_eq!(next_reward(&link), 463);
        link.solves = 29;
        assert_eq!(next_reward(&link), 360);
    }

    #[test]
    fn reward_is_non_increasing_and_floored() {
        let mut link = link(1000, 100, 17);
        let mut previous = i64::MAX;
        for solves in 0..40 {
            link.solves = solves;
            let reward = next_reward(&link);
            assert!(reward <= previous, "reward grew at {solves} solves");
            assert!(reward >= 100);
            previous = reward;
        }
    }

    #[test]
    fn disabled_decay_keeps_current_reward() {
        let mut link = link(500, 350, 30);
        link.reward_decrements = false;
        link.reward = 420;
        link.solves = 29;
        assert_eq!(next_reward(&link), 420);
    }

    #[test]
    fn zero_decay_goes_straight_to_floor() {
        let link = link(500, 350, 0);
        assert_eq!(next_reward(&link), 350);
    }

    #[test]
    fn first_blood_bonus_only_once() {
        let mut link = link(500, 350, 30);
        link.reward_first_blood = 50;

        let first = plan_solve(&link);
        assert!(first.first_blood);
        assert_eq!(first.points_awarded, 550);
        first.apply_to(&mut link, 7, OffsetDateTime::now_utc());
        assert_eq!(link.first_blood_team_id, Some(7));
        assert_eq!(link.solves, 1);

        let second = plan_solve(&link);
        assert!(!second.first_blood);
        assert_eq!(second.points_awarded, 500);
    }

    #[test]
    fn loss_points_track_reward_drop() {
        let mut link = link(500, 350, 30);
        link.solves = 15;
        link.reward = 470;
        let plan = plan_solve(&link);
        assert_eq!(plan.reward, 463);
        assert_eq!(plan.loss_points, 7);
    }

    #[test]
    fn exact_match_is_case_sensitive() {
        let flag = FlagEntity::static_flag("flag{Case}");
        assert!(ExactMatch.matches(&flag, "flag{Case}"));
        assert!(!ExactMatch.matches(&flag, "flag{case}"));
        assert!(!ExactMatch.matches(&flag, " flag{Case}"));
    }

    #[test]
    fn unknown_flag_kind_falls_back_to_exact() {
        let flag: FlagEntity =
            serde_json::from_str(r#"{"type":"regex","content":"abc"}"#).unwrap();
        assert_eq!(flag.kind, FlagKind::Unknown);
        assert!(ExactMatch.matches(&flag, "abc"));
    }
}
