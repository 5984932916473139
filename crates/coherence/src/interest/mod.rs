// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Application interest registry.
//!
//! Applications register interest in a [`RegistrationKey`] in one of three
//! ways:
//!
//! - **List**: a weakly-held [`ResultList`]; updates/deletes of member rows
//!   fire `updated()`/`deleted()`.
//! - **Predicate**: a weakly-held list plus a [`Predicate`]; membership is
//!   decided by evaluating the predicate on event rows.
//! - **ClassLevel**: a strongly-held listener receiving every event of the
//!   entity, optionally filtered by source value.
//!
//! The registry is owned by the manager's worker thread and is not
//! internally synchronized. Entries whose list has been dropped are swept
//! before each dispatch.

mod list;

pub use list::ResultList;

use crate::event::{NotificationEvent, OperationKind, RegistrationKey, Value};
use crate::listener::{ApplicationListener, ClassLevelListener};
use crate::predicate::Predicate;
use list::ListIndex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Callback selected for one entry and one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerAction {
    Ignore,
    Updated,
    Deleted,
    /// Class-level: forward according to the event kind.
    Forward,
}

enum EntryKind {
    List {
        list: Weak<ResultList>,
        index: ListIndex,
        listener: Arc<dyn ApplicationListener>,
    },
    Predicate {
        list: Weak<ResultList>,
        predicate: Predicate,
        listener: Arc<dyn ApplicationListener>,
    },
    ClassLevel {
        listener: Arc<dyn ClassLevelListener>,
        source_filter: Option<Value>,
    },
}

/// One application registration.
pub struct RegistrationEntry {
    kind: EntryKind,
}

impl RegistrationEntry {
    pub fn list(list: &Arc<ResultList>, listener: Arc<dyn ApplicationListener>) -> Self {
        Self {
            kind: EntryKind::List {
                list: Arc::downgrade(list),
                index: ListIndex::new(),
                listener,
            },
        }
    }

    pub fn predicate(
        list: &Arc<ResultList>,
        predicate: Predicate,
        listener: Arc<dyn ApplicationListener>,
    ) -> Self {
        Self {
            kind: EntryKind::Predicate {
                list: Arc::downgrade(list),
                predicate,
                listener,
            },
        }
    }

    pub fn class_level(
        listener: Arc<dyn ClassLevelListener>,
        source_filter: Option<Value>,
    ) -> Self {
        Self {
            kind: EntryKind::ClassLevel {
                listener,
                source_filter,
            },
        }
    }

    /// Whether the owning list is still reachable.
    pub fn is_live(&self) -> bool {
        match &self.kind {
            EntryKind::List { list, .. } | EntryKind::Predicate { list, .. } => {
                list.strong_count() > 0
            }
            EntryKind::ClassLevel { .. } => true,
        }
    }

    fn match_event(&mut self, event: &NotificationEvent) -> ListenerAction {
        match &mut self.kind {
            EntryKind::List { list, index, .. } => {
                let Some(list) = list.upgrade() else {
                    return ListenerAction::Ignore;
                };
                let hit = match event.kind() {
                    OperationKind::Insert => return ListenerAction::Ignore,
                    OperationKind::Update | OperationKind::Delete => {
                        index.contains_any(&list, event.rows())
                    }
                    OperationKind::MassDelete => mass_delete_hits(&list, event),
                };
                row_action(hit, event.kind())
            }
            EntryKind::Predicate {
                list, predicate, ..
            } => {
                let Some(list) = list.upgrade() else {
                    return ListenerAction::Ignore;
                };
                let hit = match event.kind() {
                    OperationKind::Insert => return ListenerAction::Ignore,
                    OperationKind::Update | OperationKind::Delete => {
                        event.rows().iter().any(|row| predicate.matches(row))
                    }
                    OperationKind::MassDelete => mass_delete_hits(&list, event),
                };
                row_action(hit, event.kind())
            }
            EntryKind::ClassLevel { source_filter, .. } => match source_filter {
                Some(filter) if event.source() != Some(&*filter) => ListenerAction::Ignore,
                _ => ListenerAction::Forward,
            },
        }
    }

    fn fire(&self, action: ListenerAction, event: &NotificationEvent) {
        match (&self.kind, action) {
            (_, ListenerAction::Ignore) => {}
            (
                EntryKind::List { listener, .. } | EntryKind::Predicate { listener, .. },
                ListenerAction::Updated,
            ) => listener.updated(),
            (
                EntryKind::List { listener, .. } | EntryKind::Predicate { listener, .. },
                ListenerAction::Deleted,
            ) => listener.deleted(),
            (EntryKind::ClassLevel { listener, .. }, ListenerAction::Forward) => {
                match event.kind() {
                    OperationKind::Insert => listener.inserted(event.rows()),
                    OperationKind::Update => {
                        listener.updated(event.rows(), event.updated_columns())
                    }
                    OperationKind::Delete => listener.deleted(event.rows()),
                    OperationKind::MassDelete => {
                        listener.mass_deleted(event.mass_delete_predicate())
                    }
                }
            }
            _ => {}
        }
    }
}

fn row_action(hit: bool, kind: OperationKind) -> ListenerAction {
    match (hit, kind) {
        (false, _) => ListenerAction::Ignore,
        (true, OperationKind::Update) => ListenerAction::Updated,
        (true, _) => ListenerAction::Deleted,
    }
}

// A mass delete hits a list if any member satisfies its predicate
// (no predicate: every row of the entity).
fn mass_delete_hits(list: &ResultList, event: &NotificationEvent) -> bool {
    list.with_members(|members| match event.mass_delete_predicate() {
        Some(predicate) => members.iter().any(|m| predicate.matches(m)),
        None => !members.is_empty(),
    })
}

/// Result of dispatching one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub notified: usize,
    pub reaped: usize,
    pub failures: usize,
}

/// Registrations grouped by key.
#[derive(Default)]
pub struct InterestRegistry {
    entries: HashMap<RegistrationKey, Vec<RegistrationEntry>>,
}

impl InterestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: RegistrationKey, entry: RegistrationEntry) {
        log::debug!("[INTEREST] registration added for {}", key);
        self.entries.entry(key).or_default().push(entry);
    }

    /// Entries currently held for `key`, live or not yet reaped.
    pub fn entry_count(&self, key: &RegistrationKey) -> usize {
        self.entries.get(key).map_or(0, Vec::len)
    }

    pub fn total_entries(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Drop every entry whose list is gone. Returns the number removed.
    pub fn reap(&mut self) -> usize {
        let mut reaped = 0;
        for list in self.entries.values_mut() {
            reaped += sweep(list);
        }
        self.entries.retain(|_, list| !list.is_empty());
        reaped
    }

    /// Dispatch `event` to the entries registered under `key`.
    pub fn dispatch(&mut self, key: &RegistrationKey, event: &NotificationEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let Some(entries) = self.entries.get_mut(key) else {
            return outcome;
        };

        outcome.reaped = sweep(entries);
        if outcome.reaped > 0 {
            log::debug!(
                "[INTEREST] reaped {} stale registration(s) for {}",
                outcome.reaped,
                key
            );
        }

        for entry in entries.iter_mut() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let action = entry.match_event(event);
                entry.fire(action, event);
                action != ListenerAction::Ignore
            }));
            match result {
                Ok(true) => outcome.notified += 1,
                Ok(false) => {}
                Err(_) => {
                    outcome.failures += 1;
                    log::error!(
                        "[INTEREST] listener for {} panicked on {} event",
                        key,
                        event.kind()
                    );
                }
            }
        }

        if entries.is_empty() {
            self.entries.remove(key);
        }
        outcome
    }
}

fn sweep(entries: &mut Vec<RegistrationEntry>) -> usize {
    let before = entries.len();
    entries.retain(RegistrationEntry::is_live);
    before - entries.len()
}
