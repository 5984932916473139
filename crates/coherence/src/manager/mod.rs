// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Notification event manager.
//!
//! Records data-change events, ships them to other processes in batches and
//! dispatches batches received from other processes to local listeners.
//!
//! # Architecture
//!
//! ```text
//! record_event ─> periodic buffer ──┐ (flush timer)
//! transaction.commit ───────────────┤
//! register_* ───────────────────────┼─> task channel ─> worker ─> adapters
//! adapter receive handler ──────────┘                      │
//!                                                          └─> listeners
//! ```
//!
//! Every task runs on one worker thread in enqueue order, so a registration
//! submitted before a dispatch is always visible to that dispatch. Batches
//! whose sender or requestor is this process are dropped on receipt.

mod flush;
mod metrics;
mod transaction;
mod worker;

pub use metrics::{ManagerMetrics, ManagerMetricsSnapshot};
pub use transaction::{CompletionTicket, NotificationTransaction};

use crate::codec::{CodecStatsSnapshot, WireCodec};
use crate::config::NotificationConfig;
use crate::error::{Error, Result};
use crate::event::{NotificationEvent, RegistrationKey, Value};
use crate::interest::{RegistrationEntry, ResultList};
use crate::listener::{ApplicationListener, CacheListener, ClassLevelListener};
use crate::predicate::Predicate;
use crate::process::ProcessIdentity;
use crate::transport::AdapterFactory;
use crossbeam::channel::{self, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flush::FlushTimer;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use worker::{Task, Worker};

/// Lifecycle of a (subject, entity) subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Accepted; the worker has not installed the adapter handler yet.
    Registering,
    Active,
}

struct Subscription {
    state: SubscriptionState,
    listener: Arc<dyn CacheListener>,
}

/// State shared by the manager handle, the worker, the flush timer and the
/// adapter receive handlers.
struct Shared {
    config: NotificationConfig,
    identity: ProcessIdentity,
    codec: WireCodec,
    subscriptions: DashMap<RegistrationKey, Subscription>,
    periodic: Mutex<HashMap<String, Vec<NotificationEvent>>>,
    flush_pending: AtomicBool,
    metrics: ManagerMetrics,
    tasks: Sender<Task>,
}

impl Shared {
    /// Coalesced: at most one timer flush waits in the queue.
    fn request_flush(&self) {
        if self.flush_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.tasks.send(Task::Flush).is_err() {
            log::debug!("[FLUSH] worker gone, flush request dropped");
        }
    }

    /// Receive path. Runs on the adapter's thread.
    fn on_receive(&self, wire_subject: &str, payload: &[u8]) {
        let subject = wire_subject
            .strip_prefix(self.config.subject_prefix.as_str())
            .unwrap_or(wire_subject);

        let report = match self.codec.decode_with_report(payload) {
            Ok(report) => report,
            Err(e) => {
                self.metrics.batches_rejected.fetch_add(1, Ordering::Relaxed);
                log::warn!("[MANAGER] discarding batch on '{}': {}", subject, e);
                return;
            }
        };
        self.metrics.batches_received.fetch_add(1, Ordering::Relaxed);

        let batch = report.batch;
        let local = self.identity.id();
        if batch.sender_id == local || batch.requestor_id == local {
            self.metrics
                .loopback_suppressed
                .fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "[MANAGER] ignoring own batch on '{}' ({} event(s))",
                subject,
                batch.events.len()
            );
            return;
        }
        if batch.events.is_empty() {
            return;
        }

        log::debug!(
            "[MANAGER] received {} event(s) on '{}' from {}",
            batch.events.len(),
            subject,
            batch.process_name
        );
        let task = Task::Dispatch {
            subject: subject.to_string(),
            events: batch.events,
            done: None,
        };
        if self.tasks.send(task).is_err() {
            log::debug!("[MANAGER] worker gone, inbound batch dropped");
        }
    }
}

/// Cache-coherence notification manager for one process.
pub struct NotificationManager {
    shared: Arc<Shared>,
    accepting: AtomicBool,
    timer: Mutex<Option<FlushTimer>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_thread: ThreadId,
}

impl NotificationManager {
    /// Start a manager identified as the current OS process.
    pub fn new(config: NotificationConfig, factory: Arc<dyn AdapterFactory>) -> Result<Self> {
        Self::with_identity(config, factory, ProcessIdentity::current().clone())
    }

    /// Start a manager with an explicit process identity.
    pub fn with_identity(
        config: NotificationConfig,
        factory: Arc<dyn AdapterFactory>,
        identity: ProcessIdentity,
    ) -> Result<Self> {
        config.validate()?;

        let (tx, rx) = channel::unbounded();
        let codec = WireCodec::new(config.compression_level, config.max_decoded_body_bytes);
        let interval = config.flush_interval();
        let shared = Arc::new(Shared {
            config,
            identity,
            codec,
            subscriptions: DashMap::new(),
            periodic: Mutex::new(HashMap::new()),
            flush_pending: AtomicBool::new(false),
            metrics: ManagerMetrics::new(),
            tasks: tx,
        });

        let worker = Worker::new(Arc::clone(&shared), factory, rx);
        let handle = std::thread::Builder::new()
            .name("coherence-worker".into())
            .spawn(move || worker.run())?;
        let worker_thread = handle.thread().id();

        let timer = match FlushTimer::start(interval, Arc::downgrade(&shared)) {
            Ok(timer) => timer,
            Err(e) => {
                let _ = shared.tasks.send(Task::Shutdown);
                let _ = handle.join();
                return Err(e.into());
            }
        };

        log::debug!(
            "[MANAGER] started as {} (id {:#018x}, flush every {:?})",
            shared.identity.process_name(),
            shared.identity.id(),
            interval
        );

        Ok(Self {
            shared,
            accepting: AtomicBool::new(true),
            timer: Mutex::new(Some(timer)),
            worker: Mutex::new(Some(handle)),
            worker_thread,
        })
    }

    pub fn identity(&self) -> &ProcessIdentity {
        &self.shared.identity
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.shared.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.accepting.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::ShutDown)
        }
    }

    fn submit(&self, task: Task) -> Result<()> {
        self.shared
            .tasks
            .send(task)
            .map_err(|_| Error::WorkerDisconnected)
    }

    fn on_worker_thread(&self) -> bool {
        std::thread::current().id() == self.worker_thread
    }

    fn count_recorded(&self, count: usize) {
        self.shared
            .metrics
            .events_recorded
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Subscribe `listener` to events of `entity` on `subject`.
    ///
    /// Registering a key that is already registered is a no-op; the first
    /// listener stays in place.
    ///
    /// The subscription map is updated on the calling thread before the
    /// worker installs the adapter handler, so [`subscription_state`] may
    /// report `Registering` while the `Subscribe` task is still queued.
    ///
    /// [`subscription_state`]: NotificationManager::subscription_state
    pub fn register_for_notification(
        &self,
        subject: &str,
        entity: &str,
        listener: Arc<dyn CacheListener>,
    ) -> Result<()> {
        self.ensure_open()?;
        let key = RegistrationKey::new(subject, entity);
        match self.shared.subscriptions.entry(key.clone()) {
            Entry::Occupied(_) => {
                log::debug!("[MANAGER] {} already registered", key);
                return Ok(());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Subscription {
                    state: SubscriptionState::Registering,
                    listener,
                });
            }
        }
        log::debug!("[MANAGER] registering {}", key);
        self.submit(Task::Subscribe(key))
    }

    /// Attach an application listener to a result list.
    ///
    /// Without a predicate, updates and deletes of list members fire the
    /// listener. With one, rows matching the predicate do. Only a weak
    /// handle to `list` is kept.
    pub fn register_for_application_notification(
        &self,
        subject: &str,
        entity: &str,
        list: &Arc<ResultList>,
        listener: Arc<dyn ApplicationListener>,
        predicate: Option<Predicate>,
    ) -> Result<()> {
        self.ensure_open()?;
        let entry = match predicate {
            Some(predicate) => RegistrationEntry::predicate(list, predicate, listener),
            None => RegistrationEntry::list(list, listener),
        };
        self.submit(Task::Interest {
            key: RegistrationKey::new(subject, entity),
            entry,
        })
    }

    /// Receive every event of `entity`, optionally only those tagged with
    /// `source_filter`.
    pub fn register_for_class_level_notification(
        &self,
        subject: &str,
        entity: &str,
        listener: Arc<dyn ClassLevelListener>,
        source_filter: Option<Value>,
    ) -> Result<()> {
        self.ensure_open()?;
        self.submit(Task::Interest {
            key: RegistrationKey::new(subject, entity),
            entry: RegistrationEntry::class_level(listener, source_filter),
        })
    }

    /// Application registrations held for a key, including ones whose list
    /// is gone but that have not been reaped yet.
    pub fn application_registration_count(&self, subject: &str, entity: &str) -> Result<usize> {
        if self.on_worker_thread() {
            return Err(Error::WouldDeadlock("application_registration_count"));
        }
        let (reply, rx) = channel::bounded(1);
        self.submit(Task::CountInterest {
            key: RegistrationKey::new(subject, entity),
            reply,
        })?;
        rx.recv().map_err(|_| Error::WorkerDisconnected)
    }

    /// Buffer `event` for the next periodic flush to `destination`.
    pub fn record_event(&self, destination: &str, event: NotificationEvent) -> Result<()> {
        self.ensure_open()?;
        self.shared
            .periodic
            .lock()
            .entry(destination.to_string())
            .or_default()
            .push(event);
        self.count_recorded(1);
        Ok(())
    }

    pub fn begin_transaction(&self) -> NotificationTransaction<'_> {
        NotificationTransaction::new(self)
    }

    /// Send `events` (grouped by destination) on behalf of `requestor_id`.
    ///
    /// The ticket reports the first send failure.
    pub fn broadcast(
        &self,
        events: HashMap<String, Vec<NotificationEvent>>,
        requestor_id: u64,
    ) -> Result<CompletionTicket> {
        self.ensure_open()?;
        let (reply, rx) = channel::bounded(1);
        self.submit(Task::Broadcast {
            events,
            requestor_id,
            reply: Some(reply),
        })?;
        Ok(CompletionTicket::pending(rx, self.worker_thread))
    }

    /// Dispatch `events` to local listeners as if received on `subject`.
    pub fn process_events(
        &self,
        subject: &str,
        events: Vec<NotificationEvent>,
    ) -> Result<CompletionTicket> {
        self.ensure_open()?;
        if events.is_empty() {
            return Ok(CompletionTicket::completed());
        }
        let (done, rx) = channel::bounded(1);
        self.submit(Task::Dispatch {
            subject: subject.to_string(),
            events,
            done: Some(done),
        })?;
        Ok(CompletionTicket::pending(rx, self.worker_thread))
    }

    /// Block until every task enqueued before this call has run.
    pub fn drain_and_wait(&self) -> Result<()> {
        if self.on_worker_thread() {
            return Err(Error::WouldDeadlock("drain_and_wait"));
        }
        let (reply, rx) = channel::bounded(1);
        self.submit(Task::Marker(reply))?;
        rx.recv().map_err(|_| Error::WorkerDisconnected)
    }

    /// Flush the periodic buffers now and wait for the sends.
    pub fn flush_now(&self) -> Result<()> {
        self.submit(Task::Flush)?;
        self.drain_and_wait()
    }

    /// Registered keys, sorted.
    pub fn existing_registrations(&self) -> Vec<RegistrationKey> {
        let mut keys: Vec<RegistrationKey> = self
            .shared
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Registered keys with their listeners, sorted by key.
    pub fn notification_subscribers(&self) -> Vec<(RegistrationKey, Arc<dyn CacheListener>)> {
        let mut subscribers: Vec<_> = self
            .shared
            .subscriptions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(&entry.listener)))
            .collect();
        subscribers.sort_by(|a, b| a.0.cmp(&b.0));
        subscribers
    }

    /// `Registering` until the worker has run the queued subscribe task.
    pub fn subscription_state(&self, subject: &str, entity: &str) -> Option<SubscriptionState> {
        self.shared
            .subscriptions
            .get(&RegistrationKey::new(subject, entity))
            .map(|subscription| subscription.state)
    }

    /// Forget every cache listener. Adapters stay open. Runs on the calling
    /// thread, so dispatches already queued no longer see the listeners.
    pub fn clear_notification_subscribers(&self) {
        self.shared.subscriptions.clear();
    }

    /// Take over the subscriptions of `old`, which is shut down first so
    /// its buffered events are flushed.
    pub fn initialize_from(&self, old: NotificationManager) -> Result<()> {
        let subscribers = old.notification_subscribers();
        old.shutdown();
        let count = subscribers.len();
        for (key, listener) in subscribers {
            self.register_for_notification(key.subject(), key.entity(), listener)?;
        }
        log::info!("[MANAGER] took over {} subscription(s)", count);
        Ok(())
    }

    pub fn is_queue_empty(&self) -> bool {
        self.shared.tasks.is_empty()
    }

    pub fn metrics(&self) -> ManagerMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn codec_stats(&self) -> CodecStatsSnapshot {
        self.shared.codec.stats()
    }

    /// Stop accepting work, stop the flush timer, send what is buffered,
    /// drain the queue and close every adapter. Idempotent.
    pub fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        log::debug!("[MANAGER] shutting down");

        if let Some(timer) = self.timer.lock().take() {
            timer.stop();
        }

        let _ = self.shared.tasks.send(Task::Flush);
        let _ = self.shared.tasks.send(Task::Shutdown);

        if self.on_worker_thread() {
            log::warn!("[MANAGER] shutdown requested from the worker thread, not joining");
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                log::error!("[MANAGER] worker thread panicked");
            }
        }
        log::debug!("[MANAGER] shut down");
    }
}

impl Drop for NotificationManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ColumnRef, OperationKind, RowKey};
    use crate::transport::{LoopbackBus, LoopbackFactory};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: parking_lot::Mutex<Vec<(OperationKind, Vec<RowKey>)>>,
    }

    impl Recorder {
        fn kinds(&self) -> Vec<OperationKind> {
            self.events.lock().iter().map(|(k, _)| *k).collect()
        }
    }

    impl CacheListener for Recorder {
        fn on_insert(&self, rows: &[RowKey]) {
            self.events
                .lock()
                .push((OperationKind::Insert, rows.to_vec()));
        }

        fn on_update(&self, rows: &[RowKey], _updated_columns: Option<&[ColumnRef]>) {
            self.events
                .lock()
                .push((OperationKind::Update, rows.to_vec()));
        }

        fn on_delete(&self, rows: &[RowKey]) {
            self.events
                .lock()
                .push((OperationKind::Delete, rows.to_vec()));
        }

        fn on_mass_delete(&self, _predicate: Option<&Predicate>) {
            self.events
                .lock()
                .push((OperationKind::MassDelete, Vec::new()));
        }
    }

    fn config() -> NotificationConfig {
        // long interval: tests flush explicitly
        NotificationConfig::default().with_flush_interval(Duration::from_secs(60))
    }

    fn manager(bus: &Arc<LoopbackBus>, pid: u32) -> NotificationManager {
        NotificationManager::with_identity(
            config(),
            Arc::new(LoopbackFactory::new(Arc::clone(bus))),
            ProcessIdentity::new("10.0.0.1", pid, 1_000),
        )
        .unwrap()
    }

    fn row(id: i64) -> RowKey {
        RowKey::new().with("id", id)
    }

    #[test]
    fn test_register_is_idempotent() {
        let bus = LoopbackBus::new("test");
        let factory = Arc::new(LoopbackFactory::new(Arc::clone(&bus)));
        let mgr = NotificationManager::with_identity(
            config(),
            factory.clone(),
            ProcessIdentity::new("10.0.0.1", 1, 1_000),
        )
        .unwrap();

        let first = Arc::new(Recorder::default());
        mgr.register_for_notification("db", "Order", first.clone())
            .unwrap();
        mgr.register_for_notification("db", "Order", Arc::new(Recorder::default()))
            .unwrap();
        mgr.register_for_notification("db", "Trade", Arc::new(Recorder::default()))
            .unwrap();
        mgr.drain_and_wait().unwrap();

        assert_eq!(
            mgr.existing_registrations(),
            vec![
                RegistrationKey::new("db", "Order"),
                RegistrationKey::new("db", "Trade")
            ]
        );
        assert_eq!(
            mgr.subscription_state("db", "Order"),
            Some(SubscriptionState::Active)
        );
        // one adapter per subject
        assert_eq!(factory.created(), 1);
    }

    struct NoBroker;

    impl crate::transport::AdapterFactory for NoBroker {
        fn create_adapter(
            &self,
            subject: &str,
        ) -> Result<Arc<dyn crate::transport::TransportAdapter>> {
            Err(Error::AdapterUnavailable {
                subject: subject.to_string(),
                reason: "no broker".into(),
            })
        }
    }

    #[test]
    fn test_registration_visible_before_worker_runs() {
        let mgr = NotificationManager::with_identity(
            config(),
            Arc::new(NoBroker),
            ProcessIdentity::new("10.0.0.1", 1, 1_000),
        )
        .unwrap();

        mgr.register_for_notification("db", "Order", Arc::new(Recorder::default()))
            .unwrap();
        // recorded on this thread, whether or not the subscribe task ran
        assert!(mgr.subscription_state("db", "Order").is_some());

        mgr.drain_and_wait().unwrap();
        assert_eq!(
            mgr.subscription_state("db", "Order"),
            Some(SubscriptionState::Registering)
        );
        assert_eq!(mgr.existing_registrations().len(), 1);
    }

    #[test]
    fn test_periodic_flush_reaches_peer() {
        let bus = LoopbackBus::new("test");
        let a = manager(&bus, 1);
        let b = manager(&bus, 2);
        let recorder = Arc::new(Recorder::default());
        b.register_for_notification("db", "Order", recorder.clone())
            .unwrap();
        b.drain_and_wait().unwrap();

        a.record_event("db", NotificationEvent::insert("Order", vec![row(1)]))
            .unwrap();
        a.record_event("db", NotificationEvent::delete("Order", vec![row(1)]))
            .unwrap();
        a.flush_now().unwrap();
        b.drain_and_wait().unwrap();

        assert_eq!(
            recorder.kinds(),
            vec![OperationKind::Insert, OperationKind::Delete]
        );
        assert_eq!(a.metrics().batches_sent, 1);
        assert_eq!(a.metrics().events_sent, 2);
    }

    #[test]
    fn test_timer_flushes_without_explicit_call() {
        let bus = LoopbackBus::new("test");
        let a = NotificationManager::with_identity(
            NotificationConfig::default().with_flush_interval(Duration::from_millis(10)),
            Arc::new(LoopbackFactory::new(Arc::clone(&bus))),
            ProcessIdentity::new("10.0.0.1", 1, 1_000),
        )
        .unwrap();
        let b = manager(&bus, 2);
        let recorder = Arc::new(Recorder::default());
        b.register_for_notification("db", "Order", recorder.clone())
            .unwrap();
        b.drain_and_wait().unwrap();

        a.record_event("db", NotificationEvent::insert("Order", vec![row(7)]))
            .unwrap();
        for _ in 0..200 {
            b.drain_and_wait().unwrap();
            if !recorder.kinds().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(recorder.kinds(), vec![OperationKind::Insert]);
    }

    #[test]
    fn test_own_batches_not_dispatched() {
        let bus = LoopbackBus::new("test");
        let mgr = manager(&bus, 1);
        let recorder = Arc::new(Recorder::default());
        mgr.register_for_notification("db", "Order", recorder.clone())
            .unwrap();
        mgr.record_event("db", NotificationEvent::insert("Order", vec![row(1)]))
            .unwrap();
        mgr.flush_now().unwrap();
        mgr.drain_and_wait().unwrap();

        assert!(recorder.kinds().is_empty());
        assert_eq!(mgr.metrics().loopback_suppressed, 1);
    }

    #[test]
    fn test_registration_visible_to_next_dispatch() {
        let bus = LoopbackBus::new("test");
        let mgr = manager(&bus, 1);
        let recorder = Arc::new(Recorder::default());
        mgr.register_for_notification("db", "Order", recorder.clone())
            .unwrap();
        // no drain in between
        mgr.process_events("db", vec![NotificationEvent::update("Order", vec![row(3)], None)])
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(recorder.kinds(), vec![OperationKind::Update]);
    }

    #[test]
    fn test_transaction_commit_and_rollback() {
        let bus = LoopbackBus::new("test");
        let a = manager(&bus, 1);
        let b = manager(&bus, 2);
        let recorder = Arc::new(Recorder::default());
        b.register_for_notification("db", "Order", recorder.clone())
            .unwrap();
        b.drain_and_wait().unwrap();

        let mut tx = a.begin_transaction();
        tx.record_event("db", NotificationEvent::insert("Order", vec![row(1)]));
        assert_eq!(tx.len(), 1);
        drop(tx);

        let mut tx = a.begin_transaction();
        tx.record_event("db", NotificationEvent::delete("Order", vec![row(2)]));
        tx.rollback();

        let mut tx = a.begin_transaction();
        tx.record_event("db", NotificationEvent::mass_delete("Order", None));
        tx.commit().unwrap().wait().unwrap();
        b.drain_and_wait().unwrap();

        assert_eq!(recorder.kinds(), vec![OperationKind::MassDelete]);
        assert_eq!(a.metrics().batches_sent, 1);
        assert_eq!(a.metrics().events_recorded, 1);
    }

    #[test]
    fn test_commit_reports_send_failure() {
        let bus = LoopbackBus::new("test");
        let a = manager(&bus, 1);
        bus.set_online(false);

        let mut tx = a.begin_transaction();
        tx.record_event("db", NotificationEvent::insert("Order", vec![row(1)]));
        let result = tx.commit().unwrap().wait();
        assert!(result.is_err());
        assert_eq!(a.metrics().send_failures, 1);
    }

    #[test]
    fn test_empty_commit_completes_immediately() {
        let bus = LoopbackBus::new("test");
        let a = manager(&bus, 1);
        let ticket = a.begin_transaction().commit().unwrap();
        assert!(ticket.is_complete());
        ticket.wait().unwrap();
    }

    struct Exploding;

    impl CacheListener for Exploding {
        fn on_insert(&self, _rows: &[RowKey]) {
            panic!("listener failure");
        }
        fn on_update(&self, _rows: &[RowKey], _cols: Option<&[ColumnRef]>) {}
        fn on_delete(&self, _rows: &[RowKey]) {}
        fn on_mass_delete(&self, _predicate: Option<&Predicate>) {}
    }

    #[test]
    fn test_panicking_listener_does_not_stop_dispatch() {
        let bus = LoopbackBus::new("test");
        let mgr = manager(&bus, 1);
        let recorder = Arc::new(Recorder::default());
        mgr.register_for_notification("db", "Order", Arc::new(Exploding))
            .unwrap();
        mgr.register_for_notification("db", "Trade", recorder.clone())
            .unwrap();

        mgr.process_events(
            "db",
            vec![
                NotificationEvent::insert("Order", vec![row(1)]),
                NotificationEvent::insert("Trade", vec![row(2)]),
            ],
        )
        .unwrap()
        .wait()
        .unwrap();

        assert_eq!(recorder.kinds(), vec![OperationKind::Insert]);
        assert_eq!(mgr.metrics().listener_failures, 1);
        assert_eq!(mgr.metrics().events_dispatched, 2);
    }

    #[derive(Default)]
    struct CountingApp {
        updated: AtomicUsize,
    }

    impl ApplicationListener for CountingApp {
        fn updated(&self) {
            self.updated.fetch_add(1, Ordering::SeqCst);
        }

        fn deleted(&self) {}
    }

    #[test]
    fn test_application_registration_reaped() {
        let bus = LoopbackBus::new("test");
        let mgr = manager(&bus, 1);
        let kept = ResultList::new("Order", vec!["id".into()], vec![row(1)]);
        let dropped = ResultList::new("Order", vec!["id".into()], vec![row(1)]);
        let live = Arc::new(CountingApp::default());
        let stale = Arc::new(CountingApp::default());
        mgr.register_for_application_notification("db", "Order", &kept, live.clone(), None)
            .unwrap();
        mgr.register_for_application_notification("db", "Order", &dropped, stale.clone(), None)
            .unwrap();
        assert_eq!(mgr.application_registration_count("db", "Order").unwrap(), 2);

        drop(dropped);
        mgr.process_events("db", vec![NotificationEvent::update("Order", vec![row(1)], None)])
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(mgr.application_registration_count("db", "Order").unwrap(), 1);
        assert_eq!(live.updated.load(Ordering::SeqCst), 1);
        assert_eq!(stale.updated.load(Ordering::SeqCst), 0);
        assert_eq!(mgr.metrics().registrations_reaped, 1);
    }

    #[test]
    fn test_shutdown_flushes_then_rejects() {
        let bus = LoopbackBus::new("test");
        let a = manager(&bus, 1);
        let b = manager(&bus, 2);
        let recorder = Arc::new(Recorder::default());
        b.register_for_notification("db", "Order", recorder.clone())
            .unwrap();
        b.drain_and_wait().unwrap();

        a.record_event("db", NotificationEvent::insert("Order", vec![row(1)]))
            .unwrap();
        a.shutdown();
        a.shutdown();
        b.drain_and_wait().unwrap();

        assert_eq!(recorder.kinds(), vec![OperationKind::Insert]);
        assert!(matches!(
            a.record_event("db", NotificationEvent::insert("Order", vec![row(2)])),
            Err(Error::ShutDown)
        ));
        assert!(matches!(
            a.register_for_notification("db", "Trade", Arc::new(Recorder::default())),
            Err(Error::ShutDown)
        ));
        assert!(a.drain_and_wait().is_err());
    }

    #[test]
    fn test_initialize_from_moves_subscriptions() {
        let bus = LoopbackBus::new("test");
        let old = manager(&bus, 1);
        let recorder = Arc::new(Recorder::default());
        old.register_for_notification("db", "Order", recorder.clone())
            .unwrap();

        let new = manager(&bus, 2);
        new.initialize_from(old).unwrap();
        new.drain_and_wait().unwrap();
        assert_eq!(
            new.existing_registrations(),
            vec![RegistrationKey::new("db", "Order")]
        );

        let peer = manager(&bus, 3);
        peer.record_event("db", NotificationEvent::insert("Order", vec![row(1)]))
            .unwrap();
        peer.flush_now().unwrap();
        new.drain_and_wait().unwrap();
        assert_eq!(recorder.kinds(), vec![OperationKind::Insert]);

        new.clear_notification_subscribers();
        assert!(new.existing_registrations().is_empty());
    }
}
