// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport adapter SPI.
//!
//! A [`TransportAdapter`] moves opaque byte payloads for a named subject.
//! Delivery is at-least-once and unordered across subjects. Concrete broker
//! clients live outside this crate; [`loopback`] provides an in-process bus
//! and [`dual`] composes two adapters with duplicate suppression.

pub mod dedup;
pub mod dual;
pub mod loopback;

pub use dedup::{DuplicateWindow, MessageIdentity};
pub use dual::{DualAdapterFactory, DualDedupAdapter, DualStats};
pub use loopback::{LoopbackAdapter, LoopbackBus, LoopbackFactory};

use crate::error::Result;
use std::sync::Arc;

/// Callback invoked by an adapter for each payload received on a subject.
/// Runs on an adapter-owned thread; must not block.
pub type ReceiveHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Sends and receives byte payloads for named subjects.
pub trait TransportAdapter: Send + Sync {
    /// Send one payload. Must not block indefinitely; failures are returned.
    fn send(&self, subject: &str, payload: &[u8]) -> Result<()>;

    /// Install the handler for inbound payloads on `subject`.
    fn set_receive_handler(&self, subject: &str, handler: ReceiveHandler) -> Result<()>;

    /// Release all resources. Idempotent.
    fn shutdown(&self);
}

/// Creates one adapter per subject.
pub trait AdapterFactory: Send + Sync {
    fn create_adapter(&self, subject: &str) -> Result<Arc<dyn TransportAdapter>>;

    /// Called once when the owning manager shuts down.
    fn shutdown(&self) {}
}
