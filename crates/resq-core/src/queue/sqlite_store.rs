//! SQLite-backed queue store (sqlx).
//!
//! One row per queued record; `set` rewrites a namespace inside a single
//! transaction so readers never observe a half-written queue.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};

use super::store::{QueueStore, Records};
use super::types::unix_millis;

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the SQLite queue database.
///
/// The default file is `~/.local/state/resq/queue.db`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the default database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("resq")?;
        let db_path = xdg_dirs.get_state_home().join("queue.db");
        Self::open_at(db_path).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await
            .with_context(|| format!("open queue db: {}", path.display()))?;
        let store = SqliteStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory database (single connection, so every call sees the same data).
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = SqliteStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_records (
                namespace TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for SqliteStore {
    async fn get(&self, namespace: &str) -> Result<Records> {
        let rows = sqlx::query(
            r#"
            SELECT id, body FROM queue_records
            WHERE namespace = ?1
            "#,
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Records::new();
        for row in rows {
            let id: String = row.get("id");
            let body: String = row.get("body");
            let value = serde_json::from_str(&body)
                .with_context(|| format!("parse queued record {id} in {namespace}"))?;
            records.insert(id, value);
        }
        Ok(records)
    }

    async fn set(&self, namespace: &str, records: &Records) -> Result<()> {
        let now = unix_millis();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM queue_records
            WHERE namespace = ?1
            "#,
        )
        .bind(namespace)
        .execute(&mut *tx)
        .await?;
        for (id, value) in records {
            let body = serde_json::to_string(value)?;
            sqlx::query(
                r#"
                INSERT INTO queue_records (namespace, id, body, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(namespace)
            .bind(id.as_str())
            .bind(body)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM queue_records
            WHERE namespace = ?1
            "#,
        )
        .bind(namespace)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
