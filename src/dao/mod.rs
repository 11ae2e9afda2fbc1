/// Persistence model definitions shared by every backend.
pub mod models;
/// Transactional score store abstraction and its backends.
pub mod score_store;
/// Storage error types.
pub mod storage;
