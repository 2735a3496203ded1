//! SQLite storage layer.
//!
//! Implementations backed by SQLite with WAL mode and split read/write
//! connection pools.

pub mod message;
pub mod pool;
pub mod store;

pub(crate) fn store_error(error: sqlx::Error) -> switchboard_types::error::StoreError {
    use switchboard_types::error::StoreError;
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(error.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}
