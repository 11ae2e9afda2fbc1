use serde::Serialize;
use utoipa::ToSchema;

/// Overall service condition.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    /// The score store did not answer its ping; live sessions keep running.
    Degraded,
}

/// Payload of the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Whether the score store answered its ping.
    pub store_reachable: bool,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: HealthStatus::Ok,
            store_reachable: true,
        }
    }

    pub fn degraded() -> Self {
        Self {
            status: HealthStatus::Degraded,
            store_reachable: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_value(HealthResponse::degraded()).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["store_reachable"], false);
    }
}
