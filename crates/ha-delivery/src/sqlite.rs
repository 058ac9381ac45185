// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite overflow backend

use crate::store::{encode_payload, OverflowRecord, OverflowStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ha_measurement::Measurement;
use parking_lot::Mutex;
use rusqlite::{params, Connection};

/// SQLite overflow store
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE overflow (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     created_at_ns INTEGER NOT NULL,
///     payload TEXT NOT NULL
/// );
/// ```
///
/// `AUTOINCREMENT` keeps ids strictly increasing, even after the newest
/// rows were deleted.
pub struct SqliteOverflowStore {
    conn: Mutex<Connection>,
}

impl SqliteOverflowStore {
    /// Open (or create) a file-based store
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to create in-memory SQLite database")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS overflow (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at_ns INTEGER NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Store an already encoded payload and return its id.
    ///
    /// The payload is not validated; the engine discards undecodable
    /// records during recovery.
    pub fn append_payload(&self, payload: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO overflow (created_at_ns, payload) VALUES (?1, ?2)",
            params![now_ns(), payload],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<OverflowRecord> {
        let created_at_ns: i64 = row.get(1)?;
        Ok(OverflowRecord {
            id: row.get(0)?,
            created_at: DateTime::from_timestamp_nanos(created_at_ns),
            payload: row.get(2)?,
        })
    }
}

fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

impl OverflowStore for SqliteOverflowStore {
    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM overflow", [], |row| row.get(0))?;

        Ok(count as usize)
    }

    fn append(&self, measurement: &Measurement) -> Result<()> {
        self.append_payload(&encode_payload(measurement)?)?;
        Ok(())
    }

    fn append_batch(&self, batch: &[Measurement]) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let payloads = batch
            .iter()
            .map(encode_payload)
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.conn.lock();
        let created_at = now_ns();
        let tx = conn.transaction()?;
        {
            let mut insert =
                tx.prepare("INSERT INTO overflow (created_at_ns, payload) VALUES (?1, ?2)")?;
            for payload in &payloads {
                insert.execute(params![created_at, payload])?;
            }
        }
        tx.commit()?;

        Ok(batch.len())
    }

    fn all(&self) -> Result<Vec<OverflowRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, created_at_ns, payload FROM overflow ORDER BY id ASC")?;

        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn remove(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM overflow WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    fn remove_many(&self, ids: &[i64]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut del = tx.prepare("DELETE FROM overflow WHERE id = ?1")?;
            for id in ids {
                removed += del.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn clear(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM overflow", [])?;
        Ok(removed)
    }
}
