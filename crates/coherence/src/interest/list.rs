// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Caller-owned result lists.

use crate::event::RowKey;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A cached query result held by application code.
///
/// Registrations only keep a `Weak` handle: once the caller drops its last
/// `Arc<ResultList>`, registrations bound to it are reaped.
#[derive(Debug)]
pub struct ResultList {
    entity: String,
    key_fields: Vec<String>,
    members: RwLock<Vec<RowKey>>,
    version: AtomicU64,
}

impl ResultList {
    /// `key_fields` selects the row-key fields used to match event rows
    /// against members; empty means the whole key.
    pub fn new(
        entity: impl Into<String>,
        key_fields: Vec<String>,
        members: Vec<RowKey>,
    ) -> Arc<Self> {
        Arc::new(Self {
            entity: entity.into(),
            key_fields,
            members: RwLock::new(members),
            version: AtomicU64::new(0),
        })
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    pub fn members(&self) -> Vec<RowKey> {
        self.members.read().clone()
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    pub fn push(&self, row: RowKey) {
        self.members.write().push(row);
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Remove every member equal to `row`. Returns whether any was removed.
    pub fn remove(&self, row: &RowKey) -> bool {
        let mut members = self.members.write();
        let before = members.len();
        members.retain(|m| m != row);
        let removed = members.len() != before;
        drop(members);
        if removed {
            self.version.fetch_add(1, Ordering::Release);
        }
        removed
    }

    pub fn replace(&self, rows: Vec<RowKey>) {
        *self.members.write() = rows;
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Bumped on every mutation.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub(crate) fn with_members<R>(&self, f: impl FnOnce(&[RowKey]) -> R) -> R {
        f(&self.members.read())
    }

    /// Matching key of `row` under this list's key fields.
    pub(crate) fn match_key(&self, row: &RowKey) -> Option<RowKey> {
        if self.key_fields.is_empty() {
            Some(row.clone())
        } else {
            row.project(&self.key_fields)
        }
    }
}

/// Lookup structure over a list's members, rebuilt when the list changes.
#[derive(Debug)]
pub(crate) struct ListIndex {
    version: Option<u64>,
    keys: HashSet<RowKey>,
}

impl ListIndex {
    pub(crate) fn new() -> Self {
        Self {
            version: None,
            keys: HashSet::new(),
        }
    }

    /// True if any of `rows` is a member of `list`.
    pub(crate) fn contains_any(&mut self, list: &ResultList, rows: &[RowKey]) -> bool {
        let version = list.version();
        if self.version != Some(version) {
            self.keys = list.with_members(|members| {
                members.iter().filter_map(|m| list.match_key(m)).collect()
            });
            self.version = Some(version);
        }
        rows.iter()
            .filter_map(|row| list.match_key(row))
            .any(|key| self.keys.contains(&key))
    }
}
