// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Coherence - cache-coherence notifications between processes
//!
//! Keeps the in-memory caches of cooperating processes consistent. Each
//! process records the inserts, updates and deletes it performs; the
//! [`NotificationManager`] ships them to peers in compressed batches and
//! dispatches batches received from peers to local cache listeners and
//! application listeners.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coherence::{
//!     LoopbackBus, LoopbackFactory, NotificationConfig, NotificationEvent,
//!     NotificationManager, Result, RowKey,
//! };
//! use std::sync::Arc;
//!
//! fn main() -> Result<()> {
//!     let bus = LoopbackBus::new("local");
//!     let manager = NotificationManager::new(
//!         NotificationConfig::default(),
//!         Arc::new(LoopbackFactory::new(bus)),
//!     )?;
//!
//!     let mut tx = manager.begin_transaction();
//!     tx.record_event("trading", NotificationEvent::delete("Order", vec![RowKey::new().with("id", 7)]));
//!     tx.commit()?.wait()?;
//!
//!     manager.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  Application: CacheListener | ApplicationListener | ResultList      |
//! +---------------------------------------------------------------------+
//! |  NotificationManager: ordered worker, flush timer, transactions     |
//! |  InterestRegistry: list / predicate / class-level registrations     |
//! +---------------------------------------------------------------------+
//! |  WireCodec: header + framed events, deflate body                    |
//! +---------------------------------------------------------------------+
//! |  TransportAdapter: DualDedupAdapter over two brokers, Loopback      |
//! +---------------------------------------------------------------------+
//! |  ReplicationPoller: change queue -> events (SQLite store)           |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`manager`] - Notification manager (start here)
//! - [`transport`] - Adapter SPI, dual deduplicating adapter, loopback bus
//! - [`codec`] - Wire format
//! - [`interest`] - Application interest registry
//! - [`replication`] - Change-queue poller

/// Crate error type.
pub mod error;
/// Configuration (TOML loadable).
pub mod config;
/// Process identity used for loop prevention.
pub mod process;
/// Event model: values, row keys, events and batches.
pub mod event;
/// Predicate expressions for mass deletes and application filters.
pub mod predicate;
/// Wire codec for notification batches.
pub mod codec;
/// Transport adapter SPI and implementations.
pub mod transport;
/// Listener callback traits.
pub mod listener;
/// Application interest registry.
pub mod interest;
/// Notification manager.
pub mod manager;
/// Replication poller and change-queue stores.
pub mod replication;

pub use codec::{CodecError, WireCodec};
pub use config::{DuplicateWindowConfig, NotificationConfig, ReplicationConfig};
pub use error::{Error, Result};
pub use event::{
    ColumnRef, NotificationBatch, NotificationEvent, OperationKind, RegistrationKey, RowKey, Value,
};
pub use interest::{InterestRegistry, RegistrationEntry, ResultList};
pub use listener::{ApplicationListener, CacheListener, ClassLevelListener};
pub use manager::{
    CompletionTicket, ManagerMetricsSnapshot, NotificationManager, NotificationTransaction,
    SubscriptionState,
};
pub use predicate::{Predicate, PredicateError};
pub use process::ProcessIdentity;
pub use replication::{ReplicationPoller, ReplicationSource, ReplicationStore};
#[cfg(feature = "sqlite")]
pub use replication::SqliteReplicationStore;
pub use transport::{
    AdapterFactory, DualAdapterFactory, DualDedupAdapter, DuplicateWindow, LoopbackBus,
    LoopbackFactory, MessageIdentity, ReceiveHandler, TransportAdapter,
};
