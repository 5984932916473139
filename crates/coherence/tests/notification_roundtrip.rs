// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::needless_pass_by_value)] // Test helpers

//! Multi-process notification tests.
//!
//! Each "process" is a `NotificationManager` with its own identity, talking
//! through a `DualAdapterFactory` over two in-process buses that stand in
//! for two brokers:
//! - duplicate suppression when both buses deliver
//! - loop prevention by sender and requestor id
//! - transaction commit/rollback
//! - single-bus outage
//! - application interest over the wire

use coherence::transport::dual::DualStatsSnapshot;
use coherence::{
    ApplicationListener, CacheListener, ColumnRef, DualAdapterFactory, DuplicateWindowConfig,
    LoopbackBus, LoopbackFactory, NotificationConfig, NotificationEvent, NotificationManager,
    OperationKind, Predicate, ProcessIdentity, ResultList, RowKey,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Process {
    manager: NotificationManager,
    factory: Arc<DualAdapterFactory>,
}

impl Process {
    fn dual_stats(&self) -> DualStatsSnapshot {
        self.factory.stats()
    }
}

struct Brokers {
    a: Arc<LoopbackBus>,
    b: Arc<LoopbackBus>,
}

impl Brokers {
    fn new() -> Self {
        Self {
            a: LoopbackBus::new("broker-a"),
            b: LoopbackBus::new("broker-b"),
        }
    }

    fn process(&self, pid: u32) -> Process {
        let identity = ProcessIdentity::new("10.1.0.1", pid, 1_700_000_000_000);
        let factory = Arc::new(DualAdapterFactory::new(
            Arc::new(LoopbackFactory::new(Arc::clone(&self.a))),
            Arc::new(LoopbackFactory::new(Arc::clone(&self.b))),
            identity.id(),
            &DuplicateWindowConfig::default(),
        ));
        let config = NotificationConfig::default().with_flush_interval(Duration::from_secs(60));
        let manager =
            NotificationManager::with_identity(config, factory.clone(), identity).unwrap();
        Process { manager, factory }
    }
}

#[derive(Default)]
struct CacheRecorder {
    seen: Mutex<Vec<(OperationKind, Vec<RowKey>)>>,
}

impl CacheRecorder {
    fn kinds(&self) -> Vec<OperationKind> {
        self.seen.lock().iter().map(|(k, _)| *k).collect()
    }

    fn count(&self) -> usize {
        self.seen.lock().len()
    }
}

impl CacheListener for CacheRecorder {
    fn on_insert(&self, rows: &[RowKey]) {
        self.seen.lock().push((OperationKind::Insert, rows.to_vec()));
    }

    fn on_update(&self, rows: &[RowKey], _updated_columns: Option<&[ColumnRef]>) {
        self.seen.lock().push((OperationKind::Update, rows.to_vec()));
    }

    fn on_delete(&self, rows: &[RowKey]) {
        self.seen.lock().push((OperationKind::Delete, rows.to_vec()));
    }

    fn on_mass_delete(&self, _predicate: Option<&Predicate>) {
        self.seen.lock().push((OperationKind::MassDelete, Vec::new()));
    }
}

#[derive(Default)]
struct AppCounter {
    updated: AtomicUsize,
    deleted: AtomicUsize,
}

impl ApplicationListener for AppCounter {
    fn updated(&self) {
        self.updated.fetch_add(1, Ordering::SeqCst);
    }

    fn deleted(&self) {
        self.deleted.fetch_add(1, Ordering::SeqCst);
    }
}

fn row(id: i64) -> RowKey {
    RowKey::new().with("id", id)
}

fn subscribe(process: &Process, entity: &str) -> Arc<CacheRecorder> {
    let recorder = Arc::new(CacheRecorder::default());
    process
        .manager
        .register_for_notification("trading", entity, recorder.clone())
        .unwrap();
    process.manager.drain_and_wait().unwrap();
    recorder
}

#[test]
fn test_event_over_two_brokers_delivered_once() {
    let brokers = Brokers::new();
    let sender = brokers.process(1);
    let receiver = brokers.process(2);
    let recorder = subscribe(&receiver, "Order");

    sender
        .manager
        .record_event("trading", NotificationEvent::insert("Order", vec![row(1)]))
        .unwrap();
    sender.manager.flush_now().unwrap();
    receiver.manager.drain_and_wait().unwrap();

    assert_eq!(recorder.kinds(), vec![OperationKind::Insert]);
    let stats = receiver.dual_stats();
    assert_eq!(stats.forwarded, 1);
    assert_eq!(stats.duplicates_dropped, 1);
    assert_eq!(sender.dual_stats().sent, 1);
}

#[test]
fn test_events_keep_enqueue_order() {
    let brokers = Brokers::new();
    let sender = brokers.process(1);
    let receiver = brokers.process(2);
    let recorder = subscribe(&receiver, "Order");

    let mut tx = sender.manager.begin_transaction();
    tx.record_event("trading", NotificationEvent::insert("Order", vec![row(1)]));
    tx.record_event(
        "trading",
        NotificationEvent::update("Order", vec![row(1)], Some(vec![ColumnRef::new("qty")])),
    );
    tx.record_event("trading", NotificationEvent::delete("Order", vec![row(1)]));
    tx.commit().unwrap().wait().unwrap();
    receiver.manager.drain_and_wait().unwrap();

    assert_eq!(
        recorder.kinds(),
        vec![
            OperationKind::Insert,
            OperationKind::Update,
            OperationKind::Delete
        ]
    );
}

#[test]
fn test_own_events_never_dispatched_locally() {
    let brokers = Brokers::new();
    let process = brokers.process(1);
    let recorder = subscribe(&process, "Order");

    let mut tx = process.manager.begin_transaction();
    tx.record_event("trading", NotificationEvent::insert("Order", vec![row(1)]));
    tx.commit().unwrap().wait().unwrap();
    process.manager.drain_and_wait().unwrap();

    assert_eq!(recorder.count(), 0);
    assert_eq!(process.manager.metrics().loopback_suppressed, 1);
}

#[test]
fn test_requestor_does_not_receive_its_own_change() {
    let brokers = Brokers::new();
    let requestor = brokers.process(1);
    let relay = brokers.process(2);
    let bystander = brokers.process(3);
    let at_requestor = subscribe(&requestor, "Order");
    let at_bystander = subscribe(&bystander, "Order");

    let mut events = HashMap::new();
    events.insert(
        "trading".to_string(),
        vec![NotificationEvent::delete("Order", vec![row(4)])],
    );
    relay
        .manager
        .broadcast(events, requestor.manager.identity().id())
        .unwrap()
        .wait()
        .unwrap();
    requestor.manager.drain_and_wait().unwrap();
    bystander.manager.drain_and_wait().unwrap();

    assert_eq!(at_requestor.count(), 0);
    assert_eq!(at_bystander.kinds(), vec![OperationKind::Delete]);
}

#[test]
fn test_rolled_back_events_never_sent() {
    let brokers = Brokers::new();
    let sender = brokers.process(1);
    let receiver = brokers.process(2);
    let recorder = subscribe(&receiver, "Order");

    {
        let mut tx = sender.manager.begin_transaction();
        tx.record_event("trading", NotificationEvent::insert("Order", vec![row(1)]));
        tx.rollback();
    }
    {
        let mut tx = sender.manager.begin_transaction();
        tx.record_event("trading", NotificationEvent::insert("Order", vec![row(2)]));
        // dropped without commit
    }
    let mut tx = sender.manager.begin_transaction();
    tx.record_event("trading", NotificationEvent::insert("Order", vec![row(3)]));
    tx.commit().unwrap().wait().unwrap();
    sender.manager.flush_now().unwrap();
    receiver.manager.drain_and_wait().unwrap();

    let seen = recorder.seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, vec![row(3)]);
    assert_eq!(sender.manager.metrics().batches_sent, 1);
}

#[test]
fn test_one_broker_down_still_delivers() {
    let brokers = Brokers::new();
    let sender = brokers.process(1);
    let receiver = brokers.process(2);
    let recorder = subscribe(&receiver, "Order");

    brokers.a.set_online(false);
    let mut tx = sender.manager.begin_transaction();
    tx.record_event("trading", NotificationEvent::update("Order", vec![row(1)], None));
    tx.commit().unwrap().wait().unwrap();
    receiver.manager.drain_and_wait().unwrap();

    assert_eq!(recorder.kinds(), vec![OperationKind::Update]);
}

#[test]
fn test_both_brokers_down_fails_commit() {
    let brokers = Brokers::new();
    let sender = brokers.process(1);
    brokers.a.set_online(false);
    brokers.b.set_online(false);

    let mut tx = sender.manager.begin_transaction();
    tx.record_event("trading", NotificationEvent::insert("Order", vec![row(1)]));
    assert!(tx.commit().unwrap().wait().is_err());

    // periodic events are dropped with a warning, not reported
    sender
        .manager
        .record_event("trading", NotificationEvent::insert("Order", vec![row(2)]))
        .unwrap();
    sender.manager.flush_now().unwrap();
    assert_eq!(sender.manager.metrics().send_failures, 2);
}

#[test]
fn test_application_interest_over_the_wire() {
    let brokers = Brokers::new();
    let sender = brokers.process(1);
    let receiver = brokers.process(2);

    let open_orders = ResultList::new("Order", vec!["id".into()], vec![row(1), row(2)]);
    let dropped = ResultList::new("Order", vec!["id".into()], vec![row(2)]);
    let live = Arc::new(AppCounter::default());
    let stale = Arc::new(AppCounter::default());
    receiver
        .manager
        .register_for_application_notification("trading", "Order", &open_orders, live.clone(), None)
        .unwrap();
    receiver
        .manager
        .register_for_application_notification("trading", "Order", &dropped, stale.clone(), None)
        .unwrap();
    assert_eq!(
        receiver
            .manager
            .application_registration_count("trading", "Order")
            .unwrap(),
        2
    );
    drop(dropped);

    let mut tx = sender.manager.begin_transaction();
    tx.record_event("trading", NotificationEvent::update("Order", vec![row(9), row(2)], None));
    tx.record_event(
        "trading",
        NotificationEvent::mass_delete("Order", Some(Predicate::parse("id > 1").unwrap())),
    );
    tx.commit().unwrap().wait().unwrap();
    receiver.manager.drain_and_wait().unwrap();

    assert_eq!(live.updated.load(Ordering::SeqCst), 1);
    assert_eq!(live.deleted.load(Ordering::SeqCst), 1);
    assert_eq!(stale.updated.load(Ordering::SeqCst), 0);
    assert_eq!(
        receiver
            .manager
            .application_registration_count("trading", "Order")
            .unwrap(),
        1
    );
}

#[test]
fn test_shutdown_detaches_from_brokers() {
    let brokers = Brokers::new();
    let sender = brokers.process(1);
    let receiver = brokers.process(2);
    let recorder = subscribe(&receiver, "Order");

    receiver.manager.shutdown();
    receiver.manager.shutdown();

    sender
        .manager
        .record_event("trading", NotificationEvent::insert("Order", vec![row(1)]))
        .unwrap();
    sender.manager.flush_now().unwrap();
    assert_eq!(recorder.count(), 0);
    assert!(receiver.manager.is_queue_empty());
}
