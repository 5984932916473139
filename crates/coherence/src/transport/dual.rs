// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dual deduplicating adapter.
//!
//! Every send goes out on both underlying adapters, prefixed with a message
//! identity header. Receipts from either side pass through a shared
//! [`DuplicateWindow`]; only the first copy is forwarded downstream.
//!
//! ```text
//! +-----------------------------------------------+
//! | marker (1) | sender_id (8) | sequence (8)      |
//! | payload ...                                   |
//! +-----------------------------------------------+
//! ```

use super::dedup::{DuplicateWindow, MessageIdentity};
use super::{AdapterFactory, ReceiveHandler, TransportAdapter};
use crate::config::DuplicateWindowConfig;
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const IDENTITY_MARKER: u8 = 0xD1;
const IDENTITY_HEADER_LEN: usize = 17;

/// Dual adapter counters.
#[derive(Debug, Default)]
pub struct DualStats {
    pub sent: AtomicU64,
    pub partial_send_failures: AtomicU64,
    pub forwarded: AtomicU64,
    pub duplicates_dropped: AtomicU64,
    pub malformed_dropped: AtomicU64,
}

impl DualStats {
    pub fn snapshot(&self) -> DualStatsSnapshot {
        DualStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            partial_send_failures: self.partial_send_failures.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DualStatsSnapshot {
    pub sent: u64,
    pub partial_send_failures: u64,
    pub forwarded: u64,
    pub duplicates_dropped: u64,
    pub malformed_dropped: u64,
}

/// Composes two adapters into one deduplicated channel.
pub struct DualDedupAdapter {
    sides: Vec<(&'static str, Arc<dyn TransportAdapter>)>,
    window: Arc<DuplicateWindow>,
    sender_id: u64,
    sequence: AtomicU64,
    stats: Arc<DualStats>,
    shut_down: AtomicBool,
}

impl DualDedupAdapter {
    pub fn new(
        primary: Arc<dyn TransportAdapter>,
        secondary: Arc<dyn TransportAdapter>,
        window: Arc<DuplicateWindow>,
        sender_id: u64,
    ) -> Self {
        Self::from_sides(
            vec![("primary", primary), ("secondary", secondary)],
            window,
            sender_id,
            Arc::new(DualStats::default()),
        )
    }

    fn from_sides(
        sides: Vec<(&'static str, Arc<dyn TransportAdapter>)>,
        window: Arc<DuplicateWindow>,
        sender_id: u64,
        stats: Arc<DualStats>,
    ) -> Self {
        Self {
            sides,
            window,
            sender_id,
            // random seed so a restarted process does not replay old identities
            sequence: AtomicU64::new(fastrand::u64(..u64::MAX / 2)),
            stats,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn stats(&self) -> DualStatsSnapshot {
        self.stats.snapshot()
    }

    fn wrap_handler(&self, downstream: ReceiveHandler) -> ReceiveHandler {
        let window = Arc::clone(&self.window);
        let stats = Arc::clone(&self.stats);
        Arc::new(move |subject: &str, payload: &[u8]| {
            if payload.len() < IDENTITY_HEADER_LEN || payload[0] != IDENTITY_MARKER {
                stats.malformed_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "[DUAL] dropping {}-byte payload without identity header on '{}'",
                    payload.len(),
                    subject
                );
                return;
            }
            let identity = MessageIdentity {
                subject: subject.to_string(),
                sender_id: BigEndian::read_u64(&payload[1..9]),
                sequence: BigEndian::read_u64(&payload[9..17]),
            };
            if window.mark(&identity) {
                stats.forwarded.fetch_add(1, Ordering::Relaxed);
                downstream(subject, &payload[IDENTITY_HEADER_LEN..]);
            } else {
                stats.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
            }
        })
    }
}

impl TransportAdapter for DualDedupAdapter {
    fn send(&self, subject: &str, payload: &[u8]) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut framed = Vec::with_capacity(IDENTITY_HEADER_LEN + payload.len());
        framed.push(IDENTITY_MARKER);
        framed.extend_from_slice(&self.sender_id.to_be_bytes());
        framed.extend_from_slice(&sequence.to_be_bytes());
        framed.extend_from_slice(payload);

        let mut failures = Vec::new();
        for (label, adapter) in &self.sides {
            if let Err(e) = adapter.send(subject, &framed) {
                failures.push(format!("{}: {}", label, e));
            }
        }

        if failures.len() == self.sides.len() {
            return Err(Error::SendFailed {
                subject: subject.to_string(),
                reason: failures.join("; "),
            });
        }
        if !failures.is_empty() {
            self.stats
                .partial_send_failures
                .fetch_add(1, Ordering::Relaxed);
            log::warn!("[DUAL] partial send on '{}': {}", subject, failures.join("; "));
        }
        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn set_receive_handler(&self, subject: &str, handler: ReceiveHandler) -> Result<()> {
        let wrapped = self.wrap_handler(handler);
        let mut failures = Vec::new();
        for (label, adapter) in &self.sides {
            if let Err(e) = adapter.set_receive_handler(subject, Arc::clone(&wrapped)) {
                failures.push(format!("{}: {}", label, e));
            }
        }
        if failures.len() == self.sides.len() {
            return Err(Error::AdapterUnavailable {
                subject: subject.to_string(),
                reason: failures.join("; "),
            });
        }
        if !failures.is_empty() {
            log::warn!(
                "[DUAL] receive handler installed on one side only for '{}': {}",
                subject,
                failures.join("; ")
            );
        }
        Ok(())
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for (_, adapter) in &self.sides {
            adapter.shutdown();
        }
    }
}

/// Factory producing [`DualDedupAdapter`]s from two underlying factories.
/// All adapters it creates share one duplicate window and one stats block.
pub struct DualAdapterFactory {
    primary: Arc<dyn AdapterFactory>,
    secondary: Arc<dyn AdapterFactory>,
    window: Arc<DuplicateWindow>,
    sender_id: u64,
    stats: Arc<DualStats>,
}

impl DualAdapterFactory {
    pub fn new(
        primary: Arc<dyn AdapterFactory>,
        secondary: Arc<dyn AdapterFactory>,
        sender_id: u64,
        window: &DuplicateWindowConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            window: Arc::new(DuplicateWindow::new(window)),
            sender_id,
            stats: Arc::new(DualStats::default()),
        }
    }

    pub fn stats(&self) -> DualStatsSnapshot {
        self.stats.snapshot()
    }
}

impl AdapterFactory for DualAdapterFactory {
    fn create_adapter(&self, subject: &str) -> Result<Arc<dyn TransportAdapter>> {
        let mut sides = Vec::with_capacity(2);
        let mut failures = Vec::new();
        for (label, factory) in [("primary", &self.primary), ("secondary", &self.secondary)] {
            match factory.create_adapter(subject) {
                Ok(adapter) => sides.push((label, adapter)),
                Err(e) => failures.push(format!("{}: {}", label, e)),
            }
        }
        if sides.is_empty() {
            return Err(Error::AdapterUnavailable {
                subject: subject.to_string(),
                reason: failures.join("; "),
            });
        }
        if !failures.is_empty() {
            log::warn!(
                "[DUAL] '{}' running on a single transport: {}",
                subject,
                failures.join("; ")
            );
        }
        Ok(Arc::new(DualDedupAdapter::from_sides(
            sides,
            Arc::clone(&self.window),
            self.sender_id,
            Arc::clone(&self.stats),
        )))
    }

    fn shutdown(&self) {
        self.primary.shutdown();
        self.secondary.shutdown();
    }
}
