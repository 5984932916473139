// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-level error type.

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::predicate::PredicateError;
use thiserror::Error;

/// Errors surfaced by the notification layer.
#[derive(Debug, Error)]
pub enum Error {
    /// A transport refused or failed a send.
    #[error("send failed on subject '{subject}': {reason}")]
    SendFailed { subject: String, reason: String },

    /// The adapter factory could not produce an adapter for a subject.
    #[error("no adapter for subject '{subject}': {reason}")]
    AdapterUnavailable { subject: String, reason: String },

    /// Wire encode/decode failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Invalid predicate expression.
    #[error("predicate error: {0}")]
    Predicate(#[from] PredicateError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The manager (or poller) has been shut down.
    #[error("notification manager is shut down")]
    ShutDown,

    /// The ordered worker went away before answering.
    #[error("worker disconnected")]
    WorkerDisconnected,

    /// A blocking call was made from the worker thread it would wait on.
    #[error("{0} cannot block on the notification worker thread")]
    WouldDeadlock(&'static str),

    /// Replication store failure.
    #[error("replication store error: {0}")]
    Store(String),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
