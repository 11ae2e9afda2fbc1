use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Ping the score store and report `ok` or `degraded`.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.store().health_check().await {
        Ok(()) => HealthResponse::ok(),
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            HealthResponse::degraded()
        }
    }
}
