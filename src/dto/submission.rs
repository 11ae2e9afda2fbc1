use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::scoring::SolveOutcome;

/// Body of a flag submission.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitFlagRequest {
    #[validate(length(min = 1, max = 1024))]
    pub flag: String,
}

/// Response returned for a correct flag.
#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct SubmitFlagResponse {
    /// Always `correct`; failures use error statuses.
    pub status: String,
    pub first_blood: bool,
    pub points_earned: i64,
}

impl From<SolveOutcome> for SubmitFlagResponse {
    fn from(outcome: SolveOutcome) -> Self {
        Self {
            status: "correct".into(),
            first_blood: outcome.first_blood,
            points_earned: outcome.points_awarded,
        }
    }
}
