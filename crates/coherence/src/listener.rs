// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listener callbacks.
//!
//! Callbacks run on the manager's ordered worker thread. A panic inside a
//! callback is caught and logged; it never stops dispatch of later events.

use crate::event::{ColumnRef, RowKey};
use crate::predicate::Predicate;

/// Cache invalidation callback, one per subscribed (subject, entity).
pub trait CacheListener: Send + Sync {
    fn on_insert(&self, rows: &[RowKey]);

    fn on_update(&self, rows: &[RowKey], updated_columns: Option<&[ColumnRef]>);

    fn on_delete(&self, rows: &[RowKey]);

    /// `None` means every row of the entity.
    fn on_mass_delete(&self, predicate: Option<&Predicate>);
}

/// Application callback attached to a result list or predicate.
/// Fires at most once per matching event.
pub trait ApplicationListener: Send + Sync {
    fn updated(&self);

    fn deleted(&self);
}

/// Application callback receiving every event of an entity.
pub trait ClassLevelListener: Send + Sync {
    fn inserted(&self, _rows: &[RowKey]) {}

    fn updated(&self, _rows: &[RowKey], _updated_columns: Option<&[ColumnRef]>) {}

    fn deleted(&self, _rows: &[RowKey]) {}

    fn mass_deleted(&self, _predicate: Option<&Predicate>) {}
}
