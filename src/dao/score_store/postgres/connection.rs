use std::time::Duration;

use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use tokio::time::sleep;

use super::{
    config::PgConfig,
    error::{PgDaoError, PgResult},
};

struct RetryPolicy;

impl RetryPolicy {
    const MAX_ATTEMPTS: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 250;

    fn initial_delay() -> Duration {
        Duration::from_millis(Self::INITIAL_DELAY_MS)
    }

    fn next_delay(current: Duration) -> Duration {
        (current * 2).min(Duration::from_secs(5))
    }
}

/// Open the pool, retrying while the database is still starting up.
pub async fn establish_pool(config: &PgConfig) -> PgResult<PgPool> {
    let options = config
        .url
        .parse::<PgConnectOptions>()
        .map_err(|source| PgDaoError::InvalidUrl { source })?;

    let mut attempts = 0;
    let mut delay = RetryPolicy::initial_delay();

    loop {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options.clone())
            .await;

        match pool {
            Ok(pool) => return Ok(pool),
            Err(err) => {
                attempts += 1;
                if attempts >= RetryPolicy::MAX_ATTEMPTS {
                    return Err(PgDaoError::InitialConnect {
                        attempts,
                        source: err,
                    });
                }
                tracing::warn!(attempts, error = %err, "PostgreSQL not reachable yet, retrying");
                sleep(delay).await;
                delay = RetryPolicy::next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_up_to_cap() {
        let mut delay = RetryPolicy::initial_delay();
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(delay.as_millis());
            delay = RetryPolicy::next_delay(delay);
        }
        assert_eq!(seen, vec![250, 500, 1000, 2000, 4000, 5000]);
    }
}
