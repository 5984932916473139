// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite change-queue backend.

use super::store::{ChangeKind, ChangeSet, EventRange, QueueRow, ReplicationStore};
use crate::codec::{decode_row_key, encode_row_key};
use crate::error::{Error, Result};
use crate::event::RowKey;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite replication store
///
/// Holds the change queue and the change log in one database, so the poller
/// can delete both in a single transaction.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE change_queue (
///     event_id INTEGER NOT NULL,
///     source_id INTEGER NOT NULL,
///     entity TEXT NOT NULL,
///     UNIQUE (source_id, event_id, entity)
/// );
/// CREATE TABLE change_log (
///     source_id INTEGER NOT NULL,
///     event_id INTEGER NOT NULL,
///     entity TEXT NOT NULL,
///     action TEXT NOT NULL,
///     row_key BLOB NOT NULL
/// );
/// ```
pub struct SqliteReplicationStore {
    conn: Mutex<Connection>,
}

impl SqliteReplicationStore {
    /// Open (or create) a file-based store.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self::from_connection(Connection::open(path)?);
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let store = Self::from_connection(Connection::open_in_memory()?);
        store.init_schema()?;
        Ok(store)
    }

    /// Wrap an existing connection without touching its schema.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS change_queue (
                event_id INTEGER NOT NULL,
                source_id INTEGER NOT NULL,
                entity TEXT NOT NULL,
                UNIQUE (source_id, event_id, entity)
            );
            CREATE TABLE IF NOT EXISTS change_log (
                source_id INTEGER NOT NULL,
                event_id INTEGER NOT NULL,
                entity TEXT NOT NULL,
                action TEXT NOT NULL CHECK (action IN ('I', 'U', 'D')),
                row_key BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_change_log_source
                ON change_log(source_id, entity, event_id);",
        )?;
        Ok(())
    }

    /// Record one replicated row change: a change-log row plus the queue
    /// row announcing `event_id` for `entity`.
    pub fn enqueue_change(
        &self,
        source_id: i64,
        event_id: i64,
        entity: &str,
        kind: ChangeKind,
        row: &RowKey,
    ) -> Result<()> {
        let row_key = encode_row_key(row)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO change_log (source_id, event_id, entity, action, row_key)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![source_id, event_id, entity, kind.code(), row_key],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO change_queue (event_id, source_id, entity) VALUES (?1, ?2, ?3)",
            params![event_id, source_id, entity],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Queue rows across all sources.
    pub fn queue_len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM change_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Change-log rows across all entities.
    pub fn change_log_len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM change_log", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl ReplicationStore for SqliteReplicationStore {
    fn verify_source(&self, source_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        // fails if the queue table is missing
        conn.query_row(
            "SELECT event_id FROM change_queue WHERE event_id = -1 AND source_id = ?1",
            [source_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
        Ok(())
    }

    fn pending_rows(&self, source_id: i64) -> Result<Vec<QueueRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT event_id, source_id, entity
             FROM change_queue
             WHERE source_id = ?1
             ORDER BY event_id ASC",
        )?;
        let rows = stmt
            .query_map([source_id], |row| {
                Ok(QueueRow {
                    event_id: row.get(0)?,
                    source_id: row.get(1)?,
                    entity: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn find_changes(&self, source_id: i64, entity: &str, range: EventRange) -> Result<ChangeSet> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT action, row_key
             FROM change_log
             WHERE source_id = ?1 AND entity = ?2 AND event_id BETWEEN ?3 AND ?4
             ORDER BY event_id ASC, rowid ASC",
        )?;
        let raw = stmt
            .query_map(params![source_id, entity, range.min, range.max], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut changes = ChangeSet::default();
        for (action, blob) in raw {
            let kind = ChangeKind::from_code(&action).ok_or_else(|| {
                Error::Store(format!("unknown change action '{}' for {}", action, entity))
            })?;
            changes.push(kind, decode_row_key(&blob)?);
        }
        Ok(changes)
    }

    fn delete_consumed(
        &self,
        source_id: i64,
        changes: &[(String, EventRange)],
        event_ids: &[i64],
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut delete_log = tx.prepare(
                "DELETE FROM change_log
                 WHERE source_id = ?1 AND entity = ?2 AND event_id BETWEEN ?3 AND ?4",
            )?;
            for (entity, range) in changes {
                delete_log.execute(params![source_id, entity, range.min, range.max])?;
            }

            let mut delete_queue =
                tx.prepare("DELETE FROM change_queue WHERE source_id = ?1 AND event_id = ?2")?;
            for event_id in event_ids {
                delete_queue.execute(params![source_id, event_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
