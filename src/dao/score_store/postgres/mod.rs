mod config;
mod connection;
mod error;
pub mod store;

pub use config::PgConfig;
pub use error::PgDaoError;
pub use store::PgScoreStore;

use crate::dao::storage::StorageError;

impl From<PgDaoError> for StorageError {
    fn from(err: PgDaoError) -> Self {
        match err {
            PgDaoError::InvalidRow { entity, message } => StorageError::InvalidRow { entity, message },
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
