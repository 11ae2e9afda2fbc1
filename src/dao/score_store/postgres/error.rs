//! Error types shared by the PostgreSQL storage implementation.

use thiserror::Error;

/// Convenient result alias returning [`PgDaoError`] failures.
pub type PgResult<T> = Result<T, PgDaoError>;

/// Failures that can occur while interacting with PostgreSQL.
#[derive(Debug, Error)]
pub enum PgDaoError {
    /// Required environment variable is missing.
    #[error("missing PostgreSQL environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// The connection string could not be parsed.
    #[error("invalid PostgreSQL connection string")]
    InvalidUrl {
        #[source]
        source: sqlx::Error,
    },
    /// The database never answered during startup.
    #[error("failed to reach PostgreSQL after {attempts} attempts")]
    InitialConnect {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },
    /// Embedded migrations could not be applied.
    #[error("failed to apply PostgreSQL migrations")]
    Migrate {
        #[source]
        source: sqlx::migrate::MigrateError,
    },
    /// A statement failed while running `operation`.
    #[error("PostgreSQL {operation} failed")]
    Query {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
    /// A column held a value the model does not accept.
    #[error("invalid {entity} row: {message}")]
    InvalidRow {
        entity: &'static str,
        message: String,
    },
}

impl PgDaoError {
    pub(super) fn query(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| PgDaoError::Query { operation, source }
    }
}
