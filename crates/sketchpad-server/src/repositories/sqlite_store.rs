use std::path::{Path, PathBuf};

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::error::{StoreError, StoreResult};
use super::store::{
    AnonymousChatLog, BoxFuture, OwnershipRecord, SessionRecord, Store, UserRecord,
};

/// Migrations applied in order. Each entry is (version, sql).
/// Append new migrations with the next version number; never edit existing entries.
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE IF NOT EXISTS users (
            id              TEXT    PRIMARY KEY,
            email           TEXT    NOT NULL UNIQUE,
            password_digest TEXT    NOT NULL,
            salt            TEXT    NOT NULL,
            created_at      INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS chat_ownerships (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            v0_chat_id TEXT    NOT NULL UNIQUE,
            user_id    TEXT    NOT NULL REFERENCES users (id),
            created_at INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_chat_ownerships_user
            ON chat_ownerships (user_id, created_at DESC);
        CREATE TABLE IF NOT EXISTS anonymous_chat_logs (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            ip_address TEXT    NOT NULL,
            v0_chat_id TEXT    NOT NULL,
            created_at INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_anonymous_chat_logs_ip
            ON anonymous_chat_logs (ip_address, created_at)",
    ),
    (
        2,
        "CREATE TABLE IF NOT EXISTS sessions (
            token      TEXT    PRIMARY KEY,
            user_id    TEXT    NOT NULL REFERENCES users (id),
            expires_at INTEGER NOT NULL
        )",
    ),
];

/// SQLite-backed store.
///
/// Uses WAL journal mode so request handlers can read while another writes.
/// `SqlitePool` is internally reference-counted and cheap to clone.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `location`, either a file path or a `sqlite:` URL.
    pub async fn connect(location: &str) -> StoreResult<Self> {
        if location.starts_with("sqlite:") {
            let options: SqliteConnectOptions = location.parse()?;
            let max_connections = if location.contains(":memory:") { 1 } else { 5 };
            return Self::with_options(options.create_if_missing(true), max_connections).await;
        }
        Self::open(Path::new(location)).await
    }

    pub async fn open(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let store = Self::with_options(options, 5).await?;
        info!(path = %db_path.display(), "Opened SQLite store");
        Ok(store)
    }

    /// A private database living as long as the pool. Single connection, so
    /// every query sees the same data.
    pub async fn in_memory() -> StoreResult<Self> {
        let options: SqliteConnectOptions = "sqlite::memory:".parse()?;
        Self::with_options(options, 1).await
    }

    /// `<config dir>/sketchpad/sketchpad.db`
    pub fn default_path() -> StoreResult<PathBuf> {
        dirs::config_dir()
            .ok_or_else(|| StoreError::InitializationError {
                message: "Cannot find config directory".into(),
            })
            .map(|p| p.join("sketchpad").join("sketchpad.db"))
    }

    async fn with_options(options: SqliteConnectOptions, max_connections: u32) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Create the schema_version table if absent, then apply any pending migrations.
    async fn run_migrations(pool: &SqlitePool) -> StoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query("INSERT INTO schema_version (version) SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM schema_version)")
            .execute(pool)
            .await?;

        let current: i64 = sqlx::query_scalar("SELECT version FROM schema_version")
            .fetch_one(pool)
            .await?;

        for (version, sql) in MIGRATIONS {
            if *version > current {
                info!(version, "Applying schema migration");
                // One statement per query call.
                for statement in sql.split(';') {
                    let trimmed = statement.trim();
                    if !trimmed.is_empty() {
                        sqlx::query(trimmed).execute(pool).await?;
                    }
                }
                sqlx::query("UPDATE schema_version SET version = ?")
                    .bind(version)
                    .execute(pool)
                    .await?;
            }
        }

        Ok(())
    }
}

fn count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        password_digest: row.get("password_digest"),
        salt: row.get("salt"),
        created_at: row.get("created_at"),
    }
}

impl Store for SqliteStore {
    fn create_ownership(
        &self,
        chat_id: &str,
        user_id: &str,
        created_at: i64,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let pool = self.pool.clone();
        let chat_id = chat_id.to_string();
        let user_id = user_id.to_string();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO chat_ownerships (v0_chat_id, user_id, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(v0_chat_id) DO NOTHING",
            )
            .bind(&chat_id)
            .bind(&user_id)
            .bind(created_at)
            .execute(&pool)
            .await?;
            Ok(())
        })
    }

    fn ownership(&self, chat_id: &str) -> BoxFuture<'static, StoreResult<Option<OwnershipRecord>>> {
        let pool = self.pool.clone();
        let chat_id = chat_id.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT v0_chat_id, user_id, created_at
                 FROM chat_ownerships
                 WHERE v0_chat_id = ?",
            )
            .bind(&chat_id)
            .fetch_optional(&pool)
            .await?;

            Ok(row.map(|r| OwnershipRecord {
                chat_id: r.get("v0_chat_id"),
                user_id: r.get("user_id"),
                created_at: r.get("created_at"),
            }))
        })
    }

    fn chat_ids_by_user(&self, user_id: &str) -> BoxFuture<'static, StoreResult<Vec<String>>> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        Box::pin(async move {
            let ids = sqlx::query_scalar(
                "SELECT v0_chat_id FROM chat_ownerships
                 WHERE user_id = ?
                 ORDER BY created_at DESC, id DESC",
            )
            .bind(&user_id)
            .fetch_all(&pool)
            .await?;
            Ok(ids)
        })
    }

    fn delete_ownership(&self, chat_id: &str) -> BoxFuture<'static, StoreResult<()>> {
        let pool = self.pool.clone();
        let chat_id = chat_id.to_string();
        Box::pin(async move {
            sqlx::query("DELETE FROM chat_ownerships WHERE v0_chat_id = ?")
                .bind(&chat_id)
                .execute(&pool)
                .await?;
            Ok(())
        })
    }

    fn count_ownerships_since(
        &self,
        user_id: &str,
        since: i64,
    ) -> BoxFuture<'static, StoreResult<u64>> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        Box::pin(async move {
            let n: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM chat_ownerships WHERE user_id = ? AND created_at >= ?",
            )
            .bind(&user_id)
            .bind(since)
            .fetch_one(&pool)
            .await?;
            Ok(count(n))
        })
    }

    fn create_anonymous_log(&self, log: AnonymousChatLog) -> BoxFuture<'static, StoreResult<()>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO anonymous_chat_logs (ip_address, v0_chat_id, created_at)
                 VALUES (?1, ?2, ?3)",
            )
            .bind(&log.ip_address)
            .bind(&log.chat_id)
            .bind(log.created_at)
            .execute(&pool)
            .await?;
            Ok(())
        })
    }

    fn count_anonymous_since(
        &self,
        ip_address: &str,
        since: i64,
    ) -> BoxFuture<'static, StoreResult<u64>> {
        let pool = self.pool.clone();
        let ip_address = ip_address.to_string();
        Box::pin(async move {
            let n: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM anonymous_chat_logs WHERE ip_address = ? AND created_at >= ?",
            )
            .bind(&ip_address)
            .bind(since)
            .fetch_one(&pool)
            .await?;
            Ok(count(n))
        })
    }

    fn create_user(&self, user: UserRecord) -> BoxFuture<'static, StoreResult<()>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let result = sqlx::query(
                "INSERT INTO users (id, email, password_digest, salt, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT DO NOTHING",
            )
            .bind(&user.id)
            .bind(&user.email)
            .bind(&user.password_digest)
            .bind(&user.salt)
            .bind(user.created_at)
            .execute(&pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Duplicate { what: "User" });
            }
            Ok(())
        })
    }

    fn user_by_email(&self, email: &str) -> BoxFuture<'static, StoreResult<Option<UserRecord>>> {
        let pool = self.pool.clone();
        let email = email.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, email, password_digest, salt, created_at FROM users WHERE email = ?",
            )
            .bind(&email)
            .fetch_optional(&pool)
            .await?;
            Ok(row.as_ref().map(user_from_row))
        })
    }

    fn user_by_id(&self, id: &str) -> BoxFuture<'static, StoreResult<Option<UserRecord>>> {
        let pool = self.pool.clone();
        let id = id.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, email, password_digest, salt, created_at FROM users WHERE id = ?",
            )
            .bind(&id)
            .fetch_optional(&pool)
            .await?;
            Ok(row.as_ref().map(user_from_row))
        })
    }

    fn create_session(&self, session: SessionRecord) -> BoxFuture<'static, StoreResult<()>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)")
                .bind(&session.token)
                .bind(&session.user_id)
                .bind(session.expires_at)
                .execute(&pool)
                .await?;
            Ok(())
        })
    }

    fn session(&self, token: &str) -> BoxFuture<'static, StoreResult<Option<SessionRecord>>> {
        let pool = self.pool.clone();
        let token = token.to_string();
        Box::pin(async move {
            let row = sqlx::query("SELECT token, user_id, expires_at FROM sessions WHERE token = ?")
                .bind(&token)
                .fetch_optional(&pool)
                .await?;
            Ok(row.map(|r| SessionRecord {
                token: r.get("token"),
                user_id: r.get("user_id"),
                expires_at: r.get("expires_at"),
            }))
        })
    }

    fn delete_session(&self, token: &str) -> BoxFuture<'static, StoreResult<()>> {
        let pool = self.pool.clone();
        let token = token.to_string();
        Box::pin(async move {
            sqlx::query("DELETE FROM sessions WHERE token = ?")
                .bind(&token)
                .execute(&pool)
                .await?;
            Ok(())
        })
    }
}
