use std::{env, time::Duration};

use super::error::{PgDaoError, PgResult};

const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct PgConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PgConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }

    /// Read `DATABASE_URL` and the optional pool sizing variables.
    pub fn from_env() -> PgResult<Self> {
        let url = env::var("DATABASE_URL").map_err(|_| PgDaoError::MissingEnvVar {
            var: "DATABASE_URL",
        })?;
        let mut config = Self::from_url(url);

        if let Some(value) = parse_env::<u32>("DATABASE_MIN_CONNECTIONS") {
            config.min_connections = value;
        }
        if let Some(value) = parse_env::<u32>("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = value.max(1);
        }
        if let Some(value) = parse_env::<u64>("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            config.acquire_timeout = Duration::from_secs(value);
        }
        config.min_connections = config.min_connections.min(config.max_connections);

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(var: &str) -> Option<T> {
    env::var(var).ok().and_then(|value| value.trim().parse::<T>().ok())
}
