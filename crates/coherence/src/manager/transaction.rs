// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transactional event buffers and completion tickets.

use super::NotificationManager;
use crate::error::{Error, Result};
use crate::event::NotificationEvent;
use crossbeam::channel::Receiver;
use std::collections::HashMap;
use std::thread::ThreadId;

/// Events buffered for one unit of work.
///
/// Nothing is sent until [`commit`](Self::commit). Dropping the transaction
/// (or calling [`rollback`](Self::rollback)) discards the buffered events.
pub struct NotificationTransaction<'a> {
    manager: &'a NotificationManager,
    events: HashMap<String, Vec<NotificationEvent>>,
    len: usize,
}

impl<'a> NotificationTransaction<'a> {
    pub(super) fn new(manager: &'a NotificationManager) -> Self {
        Self {
            manager,
            events: HashMap::new(),
            len: 0,
        }
    }

    /// Buffer `event` for `destination` (a subject).
    pub fn record_event(&mut self, destination: &str, event: NotificationEvent) {
        self.events
            .entry(destination.to_string())
            .or_default()
            .push(event);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hand the buffered events to the worker for sending.
    ///
    /// Send failures are reported through the returned ticket.
    pub fn commit(mut self) -> Result<CompletionTicket> {
        let events = std::mem::take(&mut self.events);
        let len = std::mem::take(&mut self.len);
        if len == 0 {
            return Ok(CompletionTicket::completed());
        }
        let ticket = self
            .manager
            .broadcast(events, self.manager.identity().id())?;
        self.manager.count_recorded(len);
        Ok(ticket)
    }

    pub fn rollback(self) {}
}

impl Drop for NotificationTransaction<'_> {
    fn drop(&mut self) {
        if self.len > 0 {
            log::debug!(
                "[MANAGER] transaction rolled back, {} event(s) discarded",
                self.len
            );
        }
    }
}

enum TicketState {
    Ready,
    Pending {
        reply: Receiver<Result<()>>,
        worker: ThreadId,
    },
}

/// Completion handle for work submitted to the ordered worker.
#[must_use = "a ticket reports send failures only when waited on"]
pub struct CompletionTicket {
    state: TicketState,
}

impl CompletionTicket {
    pub(super) fn completed() -> Self {
        Self {
            state: TicketState::Ready,
        }
    }

    pub(super) fn pending(reply: Receiver<Result<()>>, worker: ThreadId) -> Self {
        Self {
            state: TicketState::Pending { reply, worker },
        }
    }

    /// Block until the worker has processed the submitted work.
    pub fn wait(self) -> Result<()> {
        match self.state {
            TicketState::Ready => Ok(()),
            TicketState::Pending { reply, worker } => {
                if std::thread::current().id() == worker {
                    return Err(Error::WouldDeadlock("CompletionTicket::wait"));
                }
                match reply.recv() {
                    Ok(result) => result,
                    Err(_) => Err(Error::WorkerDisconnected),
                }
            }
        }
    }

    /// True once the worker has answered (or there was nothing to do).
    pub fn is_complete(&self) -> bool {
        match &self.state {
            TicketState::Ready => true,
            TicketState::Pending { reply, .. } => !reply.is_empty(),
        }
    }
}
