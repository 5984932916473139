// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Notification manager metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Manager counters, updated with relaxed atomics.
#[derive(Debug)]
pub struct ManagerMetrics {
    /// Events accepted by `record_event` or committed transactions
    pub events_recorded: AtomicU64,
    /// Batches handed to an adapter successfully
    pub batches_sent: AtomicU64,
    /// Events contained in sent batches
    pub events_sent: AtomicU64,
    /// Failed sends (periodic and transactional)
    pub send_failures: AtomicU64,
    /// Inbound payloads decoded
    pub batches_received: AtomicU64,
    /// Inbound payloads with an unreadable header
    pub batches_rejected: AtomicU64,
    /// Inbound batches dropped because they originated here
    pub loopback_suppressed: AtomicU64,
    /// Events dispatched to listeners
    pub events_dispatched: AtomicU64,
    /// Listener callbacks that panicked
    pub listener_failures: AtomicU64,
    /// Stale application registrations removed
    pub registrations_reaped: AtomicU64,
}

impl ManagerMetrics {
    pub fn new() -> Self {
        Self {
            events_recorded: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            batches_received: AtomicU64::new(0),
            batches_rejected: AtomicU64::new(0),
            loopback_suppressed: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            listener_failures: AtomicU64::new(0),
            registrations_reaped: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> ManagerMetricsSnapshot {
        ManagerMetricsSnapshot {
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            batches_received: self.batches_received.load(Ordering::Relaxed),
            batches_rejected: self.batches_rejected.load(Ordering::Relaxed),
            loopback_suppressed: self.loopback_suppressed.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            registrations_reaped: self.registrations_reaped.load(Ordering::Relaxed),
        }
    }
}

impl Default for ManagerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics snapshot (for logging/monitoring)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerMetricsSnapshot {
    pub events_recorded: u64,
    pub batches_sent: u64,
    pub events_sent: u64,
    pub send_failures: u64,
    pub batches_received: u64,
    pub batches_rejected: u64,
    pub loopback_suppressed: u64,
    pub events_dispatched: u64,
    pub listener_failures: u64,
    pub registrations_reaped: u64,
}
