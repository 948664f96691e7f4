use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_message, DatabaseError};

/// How long a connection waits on another writer before SQLITE_BUSY
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const MEMORY_PATH: &str = ":memory:";

/// Where the database lives.
enum Location {
    /// Private to the pool; only one connection may exist
    Memory,
    File(PathBuf),
}

impl Location {
    fn parse(path: &str) -> Self {
        if path == MEMORY_PATH {
            Location::Memory
        } else {
            Location::File(PathBuf::from(path))
        }
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions, DatabaseError> {
        let options = match self {
            Location::Memory => {
                SqliteConnectOptions::from_str("sqlite::memory:").map_err(DatabaseError::from_sqlx)?
            }
            Location::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true),
        };
        Ok(options.busy_timeout(BUSY_TIMEOUT))
    }

    fn max_connections(&self) -> u32 {
        match self {
            Location::Memory => 1,
            Location::File(_) => 5,
        }
    }
}

/// The file holds the session token: make sure it is user-only before the
/// pool opens it.
#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    if path.exists() {
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to restrict database file permissions");
        }
        return;
    }
    if path.parent().is_some_and(Path::exists) {
        // create_new + mode: no window with umask permissions. A failure here
        // resurfaces when SQLite opens the file.
        let created = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path);
        if let Err(e) = created {
            tracing::debug!(path = %path.display(), error = %e, "Could not pre-create database file");
        }
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

// ============================================================================
// Database
// ============================================================================

/// Local SQLite database backing the persistent key-value store.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `path` and runs migrations.
    /// `":memory:"` gives a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another reelfeed process
    /// holds the database, `DatabaseError::Migration` if the schema cannot
    /// be created, and `DatabaseError::Other` otherwise.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let location = Location::parse(path);
        if let Location::File(file) = &location {
            restrict_permissions(file);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(location.max_connections())
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(location.connect_options()?)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let message = e.to_string();
            if is_lock_message(&message) {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(message)
            }
        })?;
        tracing::debug!(path, "Opened local database");
        Ok(db)
    }

    /// Closes all pooled connections, releasing the file.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Creates the key-value table. Safe to re-run.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_runs_migrations() {
        let db = Database::open(":memory:").await.unwrap();
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'kv_store'",
        )
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(row.0, 1);
    }

    #[tokio::test]
    async fn test_reopen_file_database_is_idempotent() {
        let dir = std::env::temp_dir().join("reelfeed_schema_test_reopen");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("reelfeed.db");
        let _ = std::fs::remove_file(&path);
        let path_str = path.to_str().unwrap();

        let first = Database::open(path_str).await.unwrap();
        first.close().await;
        let second = Database::open(path_str).await;
        assert!(second.is_ok());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_new_database_file_is_user_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join("reelfeed_schema_test_perms");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("reelfeed.db");
        let _ = std::fs::remove_file(&path);

        let _db = Database::open(path.to_str().unwrap()).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        std::fs::remove_dir_all(&dir).ok();
    }
}
