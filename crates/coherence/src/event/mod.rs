// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Notification event model.
//!
//! A [`NotificationEvent`] describes one mutation of persisted data: which
//! entity, what kind of operation, and which rows. Events are immutable once
//! built and travel in [`NotificationBatch`]es.

mod value;

pub use value::{RowKey, Value};

use crate::predicate::Predicate;
use std::fmt;

/// Kind of mutation carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    MassDelete,
}

impl OperationKind {
    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            OperationKind::Insert => 1,
            OperationKind::Update => 2,
            OperationKind::Delete => 3,
            OperationKind::MassDelete => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(OperationKind::Insert),
            2 => Some(OperationKind::Update),
            3 => Some(OperationKind::Delete),
            4 => Some(OperationKind::MassDelete),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::MassDelete => "mass-delete",
        };
        f.write_str(name)
    }
}

/// Reference to an updated column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    name: String,
}

impl ColumnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One data mutation to propagate to other processes.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    entity: String,
    kind: OperationKind,
    rows: Vec<RowKey>,
    updated_columns: Option<Vec<ColumnRef>>,
    mass_delete_predicate: Option<Predicate>,
    source: Option<Value>,
}

impl NotificationEvent {
    fn base(entity: impl Into<String>, kind: OperationKind, rows: Vec<RowKey>) -> Self {
        Self {
            entity: entity.into(),
            kind,
            rows,
            updated_columns: None,
            mass_delete_predicate: None,
            source: None,
        }
    }

    pub fn insert(entity: impl Into<String>, rows: Vec<RowKey>) -> Self {
        Self::base(entity, OperationKind::Insert, rows)
    }

    /// Update event; `columns` lists the modified columns when known.
    pub fn update(
        entity: impl Into<String>,
        rows: Vec<RowKey>,
        columns: Option<Vec<ColumnRef>>,
    ) -> Self {
        let mut event = Self::base(entity, OperationKind::Update, rows);
        event.updated_columns = columns;
        event
    }

    pub fn delete(entity: impl Into<String>, rows: Vec<RowKey>) -> Self {
        Self::base(entity, OperationKind::Delete, rows)
    }

    /// Mass delete. A `None` predicate means every row of the entity.
    pub fn mass_delete(entity: impl Into<String>, predicate: Option<Predicate>) -> Self {
        let mut event = Self::base(entity, OperationKind::MassDelete, Vec::new());
        event.mass_delete_predicate = predicate;
        event
    }

    /// Tag the event with the shard/source value it originated from.
    pub fn with_source(mut self, source: impl Into<Value>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Reassemble an event from its parts (used by the wire decoder).
    pub(crate) fn from_parts(
        entity: String,
        kind: OperationKind,
        rows: Vec<RowKey>,
        updated_columns: Option<Vec<ColumnRef>>,
        mass_delete_predicate: Option<Predicate>,
        source: Option<Value>,
    ) -> Self {
        Self {
            entity,
            kind,
            rows,
            updated_columns,
            mass_delete_predicate,
            source,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn rows(&self) -> &[RowKey] {
        &self.rows
    }

    pub fn updated_columns(&self) -> Option<&[ColumnRef]> {
        self.updated_columns.as_deref()
    }

    pub fn mass_delete_predicate(&self) -> Option<&Predicate> {
        self.mass_delete_predicate.as_ref()
    }

    pub fn source(&self) -> Option<&Value> {
        self.source.as_ref()
    }
}

/// Wire message: the events of one send plus the header identifying
/// who sent them and on whose behalf.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationBatch {
    pub protocol_version: u8,
    pub sender_version: u32,
    pub host_address: String,
    pub process_name: String,
    pub sender_id: u64,
    pub requestor_id: u64,
    pub events: Vec<NotificationEvent>,
}

/// Subject plus entity: key of subscriptions and application interest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationKey {
    subject: String,
    entity: String,
}

impl RegistrationKey {
    pub fn new(subject: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            entity: entity.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subject, self.entity)
    }
}
