use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of reelfeed appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

/// Whether an SQLite error message means another process holds the file
/// (SQLITE_BUSY, SQLITE_LOCKED).
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    ["database is locked", "database table is locked", "sqlite_busy", "sqlite_locked"]
        .iter()
        .any(|needle| message.contains(needle))
}

impl DatabaseError {
    /// Classifies a connection error. SQLITE_CANTOPEN also counts as locked:
    /// it is what a second instance sees while the first holds the file.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let message = err.to_string();
        if is_lock_message(&message)
            || message.to_lowercase().contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// Failures of the local persistent key-value store.
///
/// Never fatal: callers recover by treating the affected state as empty.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The backing database rejected the operation
    #[error("Local store unavailable: {0}")]
    Database(#[from] sqlx::Error),

    /// The backing store could not be reached at the OS level
    #[error("Local store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value exists but does not decode
    #[error("Corrupt value under key '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
