// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ordered worker.
//!
//! Single consumer of the manager's task channel. Subscriptions, flushes,
//! broadcasts and dispatches all run here in enqueue order. The worker owns
//! the adapters and the interest registry, so neither needs a lock.

use super::{Shared, SubscriptionState};
use crate::codec::{sender_version, PROTOCOL_VERSION};
use crate::error::Result;
use crate::event::{NotificationBatch, NotificationEvent, OperationKind, RegistrationKey};
use crate::interest::{InterestRegistry, RegistrationEntry};
use crate::listener::CacheListener;
use crate::transport::{AdapterFactory, ReceiveHandler, TransportAdapter};
use crossbeam::channel::{Receiver, Sender};
use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(super) enum Task {
    /// Resolve the adapter for a new subscription and mark it active.
    Subscribe(RegistrationKey),
    Interest {
        key: RegistrationKey,
        entry: RegistrationEntry,
    },
    CountInterest {
        key: RegistrationKey,
        reply: Sender<usize>,
    },
    /// Swap out and send the periodic buffers.
    Flush,
    Broadcast {
        events: HashMap<String, Vec<NotificationEvent>>,
        requestor_id: u64,
        reply: Option<Sender<Result<()>>>,
    },
    Dispatch {
        subject: String,
        events: Vec<NotificationEvent>,
        done: Option<Sender<Result<()>>>,
    },
    Marker(Sender<()>),
    Shutdown,
}

impl Task {
    fn label(&self) -> &'static str {
        match self {
            Task::Subscribe(_) => "subscribe",
            Task::Interest { .. } => "interest",
            Task::CountInterest { .. } => "count-interest",
            Task::Flush => "flush",
            Task::Broadcast { .. } => "broadcast",
            Task::Dispatch { .. } => "dispatch",
            Task::Marker(_) => "marker",
            Task::Shutdown => "shutdown",
        }
    }
}

pub(super) struct Worker {
    shared: Arc<Shared>,
    factory: Arc<dyn AdapterFactory>,
    tasks: Receiver<Task>,
    adapters: HashMap<String, Arc<dyn TransportAdapter>>,
    // subjects with a receive handler installed
    listening: BTreeSet<String>,
    // subjects whose handler could not be installed yet
    retry: BTreeSet<String>,
    registry: InterestRegistry,
}

impl Worker {
    pub(super) fn new(
        shared: Arc<Shared>,
        factory: Arc<dyn AdapterFactory>,
        tasks: Receiver<Task>,
    ) -> Self {
        Self {
            shared,
            factory,
            tasks,
            adapters: HashMap::new(),
            listening: BTreeSet::new(),
            retry: BTreeSet::new(),
            registry: InterestRegistry::new(),
        }
    }

    pub(super) fn run(mut self) {
        log::debug!(
            "[WORKER] started for {}",
            self.shared.identity.process_name()
        );

        while let Ok(task) = self.tasks.recv() {
            if matches!(task, Task::Shutdown) {
                break;
            }
            let label = task.label();
            let result = catch_unwind(AssertUnwindSafe(|| self.run_task(task)));
            if result.is_err() {
                log::error!("[WORKER] {} task panicked", label);
            }
        }

        self.close_adapters();
        log::debug!("[WORKER] stopped");
    }

    fn run_task(&mut self, task: Task) {
        match task {
            Task::Subscribe(key) => self.subscribe(&key),
            Task::Interest { key, entry } => {
                if let Err(e) = self.listen(key.subject()) {
                    log::warn!("[WORKER] cannot listen on '{}': {}", key.subject(), e);
                    self.retry.insert(key.subject().to_string());
                }
                self.registry.register(key, entry);
            }
            Task::CountInterest { key, reply } => {
                let _ = reply.send(self.registry.entry_count(&key));
            }
            Task::Flush => self.flush_periodic(),
            Task::Broadcast {
                events,
                requestor_id,
                reply,
            } => {
                let result = self.broadcast(events, requestor_id);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            log::warn!("[WORKER] broadcast failed: {}", e);
                        }
                    }
                }
            }
            Task::Dispatch {
                subject,
                events,
                done,
            } => {
                self.dispatch(&subject, &events);
                if let Some(done) = done {
                    let _ = done.send(Ok(()));
                }
            }
            Task::Marker(reply) => {
                let _ = reply.send(());
            }
            Task::Shutdown => {}
        }
    }

    fn wire_subject(&self, subject: &str) -> String {
        format!("{}{}", self.shared.config.subject_prefix, subject)
    }

    fn adapter(&mut self, subject: &str) -> Result<Arc<dyn TransportAdapter>> {
        if let Some(adapter) = self.adapters.get(subject) {
            return Ok(Arc::clone(adapter));
        }
        let wire = self.wire_subject(subject);
        let adapter = self.factory.create_adapter(&wire)?;
        log::debug!("[WORKER] adapter created for '{}'", wire);
        self.adapters
            .insert(subject.to_string(), Arc::clone(&adapter));
        Ok(adapter)
    }

    fn listen(&mut self, subject: &str) -> Result<()> {
        if self.listening.contains(subject) {
            return Ok(());
        }
        let adapter = self.adapter(subject)?;
        let shared = Arc::downgrade(&self.shared);
        let handler: ReceiveHandler = Arc::new(move |wire_subject: &str, payload: &[u8]| {
            if let Some(shared) = shared.upgrade() {
                shared.on_receive(wire_subject, payload);
            }
        });
        adapter.set_receive_handler(&self.wire_subject(subject), handler)?;
        self.listening.insert(subject.to_string());
        self.retry.remove(subject);
        Ok(())
    }

    fn subscribe(&mut self, key: &RegistrationKey) {
        match self.listen(key.subject()) {
            Ok(()) => self.activate(key.subject()),
            Err(e) => {
                log::warn!("[WORKER] subscription {} still registering: {}", key, e);
                self.retry.insert(key.subject().to_string());
            }
        }
    }

    fn activate(&self, subject: &str) {
        for mut subscription in self.shared.subscriptions.iter_mut() {
            if subscription.key().subject() == subject
                && subscription.state == SubscriptionState::Registering
            {
                subscription.state = SubscriptionState::Active;
                log::debug!("[WORKER] subscription {} active", subscription.key());
            }
        }
    }

    fn retry_listen(&mut self) {
        let pending: Vec<String> = self.retry.iter().cloned().collect();
        for subject in pending {
            if self.listen(&subject).is_ok() {
                self.activate(&subject);
            }
        }
    }

    fn flush_periodic(&mut self) {
        self.shared.flush_pending.store(false, Ordering::Release);
        let buffered = std::mem::take(&mut *self.shared.periodic.lock());

        for (destination, events) in buffered {
            if events.is_empty() {
                continue;
            }
            let count = events.len();
            let requestor = self.shared.identity.id();
            if let Err(e) = self.send_batch(&destination, events, requestor) {
                log::warn!(
                    "[FLUSH] dropped {} event(s) for '{}': {}",
                    count,
                    destination,
                    e
                );
            }
        }

        if !self.retry.is_empty() {
            self.retry_listen();
        }
    }

    fn broadcast(
        &mut self,
        events: HashMap<String, Vec<NotificationEvent>>,
        requestor_id: u64,
    ) -> Result<()> {
        let mut first_error = None;
        for (destination, events) in events {
            if events.is_empty() {
                continue;
            }
            if let Err(e) = self.send_batch(&destination, events, requestor_id) {
                log::error!("[WORKER] broadcast to '{}' failed: {}", destination, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn send_batch(
        &mut self,
        destination: &str,
        events: Vec<NotificationEvent>,
        requestor_id: u64,
    ) -> Result<()> {
        let identity = &self.shared.identity;
        let batch = NotificationBatch {
            protocol_version: PROTOCOL_VERSION,
            sender_version: sender_version(),
            host_address: identity.host_address().to_string(),
            process_name: identity.process_name().to_string(),
            sender_id: identity.id(),
            requestor_id,
            events,
        };

        let result = self.try_send(destination, &batch);
        let metrics = &self.shared.metrics;
        match result {
            Ok(()) => {
                metrics.batches_sent.fetch_add(1, Ordering::Relaxed);
                metrics
                    .events_sent
                    .fetch_add(batch.events.len() as u64, Ordering::Relaxed);
                log::debug!(
                    "[WORKER] sent {} event(s) to '{}'",
                    batch.events.len(),
                    destination
                );
                Ok(())
            }
            Err(e) => {
                metrics.send_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn try_send(&mut self, destination: &str, batch: &NotificationBatch) -> Result<()> {
        let bytes = self.shared.codec.encode(batch)?;
        let adapter = self.adapter(destination)?;
        adapter.send(&self.wire_subject(destination), &bytes)
    }

    fn dispatch(&mut self, subject: &str, events: &[NotificationEvent]) {
        let metrics = &self.shared.metrics;
        for event in events {
            let key = RegistrationKey::new(subject, event.entity());

            // clone out so the map is not locked while the listener runs
            let listener = self
                .shared
                .subscriptions
                .get(&key)
                .map(|subscription| Arc::clone(&subscription.listener));
            if let Some(listener) = listener {
                let result = catch_unwind(AssertUnwindSafe(|| notify(listener.as_ref(), event)));
                if result.is_err() {
                    metrics.listener_failures.fetch_add(1, Ordering::Relaxed);
                    log::error!(
                        "[WORKER] cache listener for {} panicked on {} event",
                        key,
                        event.kind()
                    );
                }
            }

            let outcome = self.registry.dispatch(&key, event);
            metrics
                .listener_failures
                .fetch_add(outcome.failures as u64, Ordering::Relaxed);
            metrics
                .registrations_reaped
                .fetch_add(outcome.reaped as u64, Ordering::Relaxed);
            metrics.events_dispatched.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn close_adapters(&mut self) {
        for (subject, adapter) in std::mem::take(&mut self.adapters) {
            adapter.shutdown();
            log::debug!("[WORKER] adapter for '{}' shut down", subject);
        }
        self.factory.shutdown();
        self.listening.clear();
        self.retry.clear();
    }
}

fn notify(listener: &dyn CacheListener, event: &NotificationEvent) {
    match event.kind() {
        OperationKind::Insert => listener.on_insert(event.rows()),
        OperationKind::Update => listener.on_update(event.rows(), event.updated_columns()),
        OperationKind::Delete => listener.on_delete(event.rows()),
        OperationKind::MassDelete => listener.on_mass_delete(event.mass_delete_predicate()),
    }
}
