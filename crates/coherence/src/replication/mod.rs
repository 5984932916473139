// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Replication poller.
//!
//! Turns rows written to a change queue by an external replicator into
//! notification events. Per poll and per source:
//!
//! 1. read every queue row, ordered by event id
//! 2. plan processing groups (see [`plan_groups`])
//! 3. per group and entity, read the change log for the group's id range
//!    and build one delete, insert and update event
//! 4. dispatch the events locally, then broadcast them with this process
//!    as requestor
//! 5. delete the consumed change-log and queue rows in one transaction
//!
//! A crash between 4 and 5 re-delivers the group on the next poll; nothing
//! is deleted before it has been dispatched and sent.

mod grouping;
#[cfg(feature = "sqlite")]
mod sqlite;
mod store;

pub use grouping::{contiguous_runs, plan_groups, EventRun};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteReplicationStore;
pub use store::{ChangeKind, ChangeSet, EventRange, QueueRow, ReplicationStore};

use crate::config::ReplicationConfig;
use crate::error::{Error, Result};
use crate::event::NotificationEvent;
use crate::manager::NotificationManager;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::thread::JoinHandle;

/// One replicated database feeding the change queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationSource {
    /// Queue `source_id` column value
    pub source_id: i64,
    /// Subject the events are dispatched and broadcast on
    pub subject: String,
    /// Entities with a change log. Queue rows of other entities are
    /// consumed without producing events.
    pub entities: BTreeSet<String>,
}

impl ReplicationSource {
    pub fn new<I, S>(source_id: i64, subject: impl Into<String>, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source_id,
            subject: subject.into(),
            entities: entities.into_iter().map(Into::into).collect(),
        }
    }
}

struct PollerInner {
    manager: Arc<NotificationManager>,
    store: Arc<dyn ReplicationStore>,
    config: ReplicationConfig,
    // serializes polls of the background threads and `poll_once`
    poll_lock: Mutex<()>,
}

impl PollerInner {
    fn poll_source(&self, source: &ReplicationSource) -> Result<usize> {
        let _guard = self.poll_lock.lock();

        let rows = self.store.pending_rows(source.source_id)?;
        if rows.is_empty() {
            return Ok(0);
        }
        log::debug!(
            "[REPLICATION] source {}: {} queue row(s)",
            source.source_id,
            rows.len()
        );

        let mut events = 0;
        for group in plan_groups(rows, self.config.batch_size, self.config.max_batch_rows) {
            events += self.process_group(source, &group)?;
        }
        Ok(events)
    }

    fn process_group(&self, source: &ReplicationSource, rows: &[QueueRow]) -> Result<usize> {
        let mut ranges: BTreeMap<&str, EventRange> = BTreeMap::new();
        for row in rows {
            ranges
                .entry(row.entity.as_str())
                .and_modify(|range| range.extend(row.event_id))
                .or_insert_with(|| EventRange::single(row.event_id));
        }

        let mut events = Vec::new();
        let mut consumed = Vec::new();
        for (entity, range) in ranges {
            if !source.entities.contains(entity) {
                log::debug!(
                    "[REPLICATION] no change log for '{}', consuming queue rows {}",
                    entity,
                    range
                );
                continue;
            }
            log::debug!("[REPLICATION] entity {} range {}", entity, range);

            let changes = self.store.find_changes(source.source_id, entity, range)?;
            if !changes.deleted.is_empty() {
                events.push(NotificationEvent::delete(entity, changes.deleted));
            }
            if !changes.inserted.is_empty() {
                events.push(NotificationEvent::insert(entity, changes.inserted));
            }
            if !changes.updated.is_empty() {
                events.push(NotificationEvent::update(entity, changes.updated, None));
            }
            consumed.push((entity.to_string(), range));
        }

        let count = events.len();
        if !events.is_empty() {
            self.manager
                .process_events(&source.subject, events.clone())?
                .wait()?;
            let mut outbound = HashMap::new();
            outbound.insert(source.subject.clone(), events);
            self.manager
                .broadcast(outbound, self.manager.identity().id())?
                .wait()?;
        }

        let event_ids: Vec<i64> = rows
            .iter()
            .map(|r| r.event_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.store
            .delete_consumed(source.source_id, &consumed, &event_ids)?;
        Ok(count)
    }
}

struct PollThread {
    source_id: i64,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PollThread {
    fn halt(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!(
                    "[REPLICATION] poll thread for source {} panicked",
                    self.source_id
                );
            }
        }
    }
}

/// Polls change queues and feeds them into a [`NotificationManager`].
pub struct ReplicationPoller {
    inner: Arc<PollerInner>,
    sources: Vec<ReplicationSource>,
    threads: Mutex<Vec<PollThread>>,
}

impl ReplicationPoller {
    pub fn new(
        manager: Arc<NotificationManager>,
        store: Arc<dyn ReplicationStore>,
        config: ReplicationConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PollerInner {
                manager,
                store,
                config,
                poll_lock: Mutex::new(()),
            }),
            sources: Vec::new(),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Add a source after probing its queue.
    ///
    /// Returns `false` (and logs) if the queue is unreachable; the source is
    /// then skipped.
    pub fn add_source(&mut self, source: ReplicationSource) -> bool {
        match self.inner.store.verify_source(source.source_id) {
            Ok(()) => {
                log::debug!(
                    "[REPLICATION] source {} on '{}' ready",
                    source.source_id,
                    source.subject
                );
                self.sources.push(source);
                true
            }
            Err(e) => {
                log::error!(
                    "[REPLICATION] change queue for source {} not found, skipping: {}",
                    source.source_id,
                    e
                );
                false
            }
        }
    }

    pub fn sources(&self) -> &[ReplicationSource] {
        &self.sources
    }

    /// Poll every source once. Returns the number of events produced.
    ///
    /// All sources are polled even if one fails; the first error is
    /// returned.
    pub fn poll_once(&self) -> Result<usize> {
        let mut total = 0;
        let mut first_error = None;
        for source in &self.sources {
            match self.inner.poll_source(source) {
                Ok(events) => total += events,
                Err(e) => {
                    log::error!(
                        "[REPLICATION] poll of source {} failed: {}",
                        source.source_id,
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// Start one polling thread per source. The first poll runs at once.
    pub fn start(&self) -> Result<()> {
        let mut threads = self.threads.lock();
        if !threads.is_empty() {
            return Ok(());
        }

        let interval = self.inner.config.poll_interval();
        for source in &self.sources {
            let (stop_tx, stop_rx) = channel::bounded::<()>(1);
            let inner = Arc::clone(&self.inner);
            let source = source.clone();
            let source_id = source.source_id;

            let spawned = std::thread::Builder::new()
                .name(format!("coherence-replication-{}", source_id))
                .spawn(move || {
                    loop {
                        if let Err(e) = inner.poll_source(&source) {
                            log::error!(
                                "[REPLICATION] poll of source {} failed: {}",
                                source.source_id,
                                e
                            );
                        }
                        match stop_rx.recv_timeout(interval) {
                            Err(RecvTimeoutError::Timeout) => {}
                            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                    log::debug!("[REPLICATION] source {} stopped", source.source_id);
                });

            match spawned {
                Ok(handle) => threads.push(PollThread {
                    source_id,
                    stop: Some(stop_tx),
                    handle: Some(handle),
                }),
                Err(e) => {
                    for thread in threads.iter_mut() {
                        thread.halt();
                    }
                    threads.clear();
                    return Err(Error::Io(e));
                }
            }
        }
        log::debug!("[REPLICATION] started {} poll thread(s)", threads.len());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.threads.lock().is_empty()
    }

    /// Stop every polling thread. A poll in progress completes first.
    pub fn shutdown(&self) {
        let mut threads = std::mem::take(&mut *self.threads.lock());
        for thread in threads.iter_mut() {
            thread.halt();
        }
    }
}

impl Drop for ReplicationPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
