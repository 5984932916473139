// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic flush timer.

use super::Shared;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::io;
use std::sync::Weak;
use std::thread::JoinHandle;
use std::time::Duration;

/// Requests a periodic-buffer flush from the worker every `interval`.
///
/// The timer never flushes by itself; it only enqueues work, so flushes stay
/// ordered with registrations and dispatches.
pub(super) struct FlushTimer {
    // dropping the sender stops the thread
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FlushTimer {
    pub(super) fn start(interval: Duration, shared: Weak<Shared>) -> io::Result<Self> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("coherence-flush".into())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let Some(shared) = shared.upgrade() else {
                        break;
                    };
                    shared.request_flush();
                }
                log::debug!("[FLUSH] timer stopped");
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub(super) fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[FLUSH] timer thread panicked");
            }
        }
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.halt();
    }
}
