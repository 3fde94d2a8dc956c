use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::types::{is_lock_message, DatabaseError};

/// Path that opens a private in-memory database (tests, dry runs).
pub const IN_MEMORY: &str = ":memory:";

// ============================================================================
// Database
// ============================================================================

/// Handle to the local article and preferences store.
///
/// Cheap to clone: clones share the connection pool and the change notifier,
/// so a mutation through any clone wakes every subscriber.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    changes: Arc<watch::Sender<u64>>,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process has the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        #[cfg(unix)]
        if path != IN_MEMORY {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() && db_path.parent().is_some_and(|p| p.exists()) {
                // Create with 0600 up front; SQLite reports any failure at connect.
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok();
            }
        }

        // busy_timeout=5000: concurrent merges wait for the writer instead of
        // failing with SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000");

        // Every connection to :memory: is its own database, so the in-memory
        // store must stay on a single pooled connection.
        let max_connections = if path == IN_MEMORY { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let (changes, _) = watch::channel(0);
        let db = Self {
            pool,
            changes: Arc::new(changes),
        };
        db.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string()) {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Subscribe to store changes.
    ///
    /// The received value is a generation counter that increases after every
    /// successful mutation (article merge, flag update, preference write).
    /// Observers re-query the store when it changes; intermediate generations
    /// may be coalesced.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Current store generation.
    pub fn generation(&self) -> u64 {
        *self.changes.borrow()
    }

    pub(crate) fn notify_changed(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        // Articles keyed by URL; saved/read are the only user-owned columns
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                url TEXT PRIMARY KEY NOT NULL,
                title TEXT NOT NULL,
                author TEXT,
                source TEXT NOT NULL,
                description TEXT,
                content TEXT,
                image_url TEXT,
                published_at INTEGER NOT NULL,
                category TEXT NOT NULL,
                saved INTEGER NOT NULL DEFAULT 0,
                read INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_published ON articles(published_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_category_published ON articles(category, published_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        // Partial index: saved list is small relative to the cache
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_saved_published ON articles(published_at DESC) WHERE saved = 1",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_read ON articles(read)")
            .execute(&mut *tx)
            .await?;

        // One row per user; category and source sets are JSON arrays
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_preferences (
                user_id TEXT PRIMARY KEY NOT NULL,
                preferred_categories TEXT NOT NULL DEFAULT '[]',
                preferred_sources TEXT NOT NULL DEFAULT '[]',
                text_size INTEGER NOT NULL DEFAULT 16,
                dark_mode INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
