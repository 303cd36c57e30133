//! The coordination store: a flat key/value table, per-key atomic
//! put/get, backing ETL watermarks/error logs, backfill job state, and
//! per-site/per-job leases. No multi-key transactions are needed or
//! exposed -- every caller reads and writes exactly one key at a time.
//!
//! Lives in the same on-disk SQLite database file as the hot tier (a
//! second table, not a second storage system), matching the simplest
//! reading of "flat key/value" in the persisted-state layout. `rusqlite`
//! is synchronous, so every call runs on a blocking thread, same as
//! `hot_store`.

pub mod keys;

use std::{
    path::Path,
    sync::{
        Arc,
        Mutex,
    },
};

use common::TimestampSecs;
use rusqlite::{
    params,
    Connection,
    OptionalExtension,
};
use serde::{
    de::DeserializeOwned,
    Serialize,
};

const INIT_SQL: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);
";

#[derive(Clone)]
pub struct CoordStore {
    inner: Arc<Mutex<Connection>>,
}

/// A short-TTL lease row used to suppress overlapping ticks for the same
/// site/job key. `holder` is an opaque identifier for the process/task
/// that holds it (a UUID is fine; it's never interpreted, only compared).
#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq)]
pub struct Lease {
    pub holder: String,
    pub expires_at: TimestampSecs,
}

impl CoordStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(INIT_SQL)?;
        Ok(Self { inner: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(INIT_SQL)?;
        Ok(Self { inner: Arc::new(Mutex::new(conn)) })
    }

    pub async fn get_raw(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let inner = self.inner.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Option<Vec<u8>>> {
            let conn = inner.lock().unwrap();
            let value: Option<Vec<u8>> =
                conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0)).optional()?;
            Ok(value)
        })
        .await?
    }

    pub async fn put_raw(&self, key: &str, value: Vec<u8>, updated_at: TimestampSecs) -> anyhow::Result<()> {
        let inner = self.inner.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = inner.lock().unwrap();
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, updated_at],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let inner = self.inner.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = inner.lock().unwrap();
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await?
    }

    pub async fn get_json<T: DeserializeOwned + Send + 'static>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.get_raw(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, updated_at: TimestampSecs) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put_raw(key, bytes, updated_at).await
    }

    /// List every key under `prefix`, for the `/status` endpoint's
    /// per-site enumeration.
    pub async fn list_keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let inner = self.inner.clone();
        let pattern = format!("{prefix}%");
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<String>> {
            let conn = inner.lock().unwrap();
            let mut stmt = conn.prepare("SELECT key FROM kv WHERE key LIKE ?1")?;
            let rows = stmt.query_map(params![pattern], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await?
    }

    /// Attempt to acquire (or renew) the lease at `key` for `holder`.
    /// Succeeds if no lease exists, the existing lease has expired, or
    /// `holder` already owns it (idempotent renewal). Fails (returns
    /// `false`) if another holder's lease is still live -- the mechanism
    /// `etl_sync`/`backfill`/`archival` use to suppress overlapping ticks
    /// for the same site/job.
    pub async fn acquire_lease(&self, key: &str, holder: &str, ttl_seconds: u64, now: TimestampSecs) -> anyhow::Result<bool> {
        let inner = self.inner.clone();
        let key = key.to_string();
        let holder = holder.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
            let conn = inner.lock().unwrap();
            let existing: Option<Vec<u8>> =
                conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0)).optional()?;
            let current: Option<Lease> = existing.map(|b| serde_json::from_slice(&b)).transpose()?;
            let can_take = match &current {
                None => true,
                Some(lease) => lease.expires_at <= now || lease.holder == holder,
            };
            if !can_take {
                return Ok(false);
            }
            let lease = Lease { holder, expires_at: now + ttl_seconds as i64 };
            let bytes = serde_json::to_vec(&lease)?;
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, bytes, now],
            )?;
            Ok(true)
        })
        .await?
    }

    /// Release a lease, but only if `holder` still owns it -- a stale
    /// holder releasing after its lease already expired and was taken by
    /// someone else must not clobber the new holder's lease.
    pub async fn release_lease(&self, key: &str, holder: &str) -> anyhow::Result<()> {
        let inner = self.inner.clone();
        let key = key.to_string();
        let holder = holder.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = inner.lock().unwrap();
            let existing: Option<Vec<u8>> =
                conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0)).optional()?;
            if let Some(bytes) = existing {
                let current: Lease = serde_json::from_slice(&bytes)?;
                if current.holder == holder {
                    conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                }
            }
            Ok(())
        })
        .await?
    }
}
