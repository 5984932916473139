// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Change-queue store abstraction.
//!
//! An external replicator writes one queue row per (event id, entity) and
//! one change-log row per replicated data row. The poller reads both and
//! deletes what it consumed.

use crate::error::Result;
use crate::event::RowKey;
use std::fmt;

/// One row of the change queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRow {
    /// Replication event id, increasing per source
    pub event_id: i64,

    /// Source (replicated database) id
    pub source_id: i64,

    /// Entity changed by the event
    pub entity: String,
}

impl QueueRow {
    pub fn new(event_id: i64, source_id: i64, entity: impl Into<String>) -> Self {
        Self {
            event_id,
            source_id,
            entity: entity.into(),
        }
    }
}

/// Inclusive event-id range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRange {
    pub min: i64,
    pub max: i64,
}

impl EventRange {
    pub fn single(event_id: i64) -> Self {
        Self {
            min: event_id,
            max: event_id,
        }
    }

    pub fn extend(&mut self, event_id: i64) {
        self.min = self.min.min(event_id);
        self.max = self.max.max(event_id);
    }

    pub fn contains(&self, event_id: i64) -> bool {
        (self.min..=self.max).contains(&event_id)
    }
}

impl fmt::Display for EventRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{}]", self.min, self.max)
    }
}

/// Change-log action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// Single-letter code stored in the change log.
    pub fn code(self) -> &'static str {
        match self {
            ChangeKind::Insert => "I",
            ChangeKind::Update => "U",
            ChangeKind::Delete => "D",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "I" => Some(ChangeKind::Insert),
            "U" => Some(ChangeKind::Update),
            "D" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// Replicated rows of one entity over an event range, by action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub inserted: Vec<RowKey>,
    pub updated: Vec<RowKey>,
    pub deleted: Vec<RowKey>,
}

impl ChangeSet {
    pub fn push(&mut self, kind: ChangeKind, row: RowKey) {
        match kind {
            ChangeKind::Insert => self.inserted.push(row),
            ChangeKind::Update => self.updated.push(row),
            ChangeKind::Delete => self.deleted.push(row),
        }
    }

    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Storage backend holding the change queue and change log.
///
/// # Implementations
///
/// - `SqliteReplicationStore` -- default (`sqlite` feature)
pub trait ReplicationStore: Send + Sync {
    /// Probe that the change queue for `source_id` is reachable.
    fn verify_source(&self, source_id: i64) -> Result<()>;

    /// All queue rows of a source, ordered by event id.
    fn pending_rows(&self, source_id: i64) -> Result<Vec<QueueRow>>;

    /// Change-log rows of `entity` written by `source_id` within `range`.
    /// Event ids are only unique per source.
    fn find_changes(&self, source_id: i64, entity: &str, range: EventRange) -> Result<ChangeSet>;

    /// In one durable transaction, delete the change-log rows of `source_id`
    /// for every `(entity, range)` in `changes` and the queue rows of
    /// `source_id` whose event id is in `event_ids`.
    fn delete_consumed(
        &self,
        source_id: i64,
        changes: &[(String, EventRange)],
        event_ids: &[i64],
    ) -> Result<()>;
}
