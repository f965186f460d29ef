use thiserror::Error;

/// Errors produced by the synchronization engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Persistence failure.
    #[error("Store error: {0}")]
    Store(#[from] passerelle_store::StoreError),

    /// A group snapshot or delta page could not be fetched.  Deltas fall
    /// back to a snapshot internally; this surfaces only when the
    /// snapshot fetch itself fails.
    #[error("Group state fetch failed: {0}")]
    GroupFetch(String),

    /// The shared database lock was poisoned by a panicking task.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// The operation was cancelled by the shutdown signal.
    #[error("Operation cancelled")]
    Cancelled,
}
