//! Persistence for checkbox-plugin reference ids.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

#[async_trait]
pub trait RefStore: Send + Sync {
    /// Append one reference id. Saving the same id twice stores two rows.
    async fn save_ref(&self, ref_id: &str) -> Result<()>;
}

pub struct SqliteRefStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRefStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "Failed to create database parent directory: {}",
                    parent.display()
                )
            })?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at: {}", db_path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=3000;",
        )?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS checkbox_ref_id (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ref_id TEXT NOT NULL,
                user_id TEXT
            );",
        )
        .context("Failed to initialize checkbox_ref_id table")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// All stored reference ids, oldest first.
    pub fn refs(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare("SELECT ref_id FROM checkbox_ref_id ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl RefStore for SqliteRefStore {
    async fn save_ref(&self, ref_id: &str) -> Result<()> {
        let conn = self.conn.clone();
        let ref_id = ref_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            conn.execute(
                "INSERT INTO checkbox_ref_id (ref_id) VALUES (?1)",
                params![ref_id],
            )
            .context("Failed to insert ref id")?;
            debug!("stored checkbox ref id {}", ref_id);
            Ok(())
        })
        .await
        .context("ref store task panicked")?
    }
}
