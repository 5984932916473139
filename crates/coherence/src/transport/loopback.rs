// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process transport.
//!
//! A [`LoopbackBus`] stands in for one message broker: every adapter attached
//! to it receives what any adapter sends on a subject it listens to, the
//! sender included. Delivery is synchronous on the sending thread. The bus
//! can be taken offline to simulate a broker outage.

use super::{AdapterFactory, ReceiveHandler, TransportAdapter};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared in-process message bus.
pub struct LoopbackBus {
    name: String,
    online: AtomicBool,
    next_adapter_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(u64, ReceiveHandler)>>>,
    delivered: AtomicU64,
}

impl LoopbackBus {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            online: AtomicBool::new(true),
            next_adapter_id: AtomicU64::new(1),
            handlers: RwLock::new(HashMap::new()),
            delivered: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a new adapter to this bus.
    pub fn adapter(self: &Arc<Self>) -> LoopbackAdapter {
        LoopbackAdapter {
            bus: Arc::clone(self),
            id: self.next_adapter_id.fetch_add(1, Ordering::Relaxed),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Offline buses fail every send and deliver nothing.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
        log::debug!(
            "[LOOPBACK] bus '{}' {}",
            self.name,
            if online { "online" } else { "offline" }
        );
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Payload copies handed to handlers so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn publish(&self, subject: &str, payload: &[u8]) -> Result<()> {
        if !self.is_online() {
            return Err(Error::SendFailed {
                subject: subject.to_string(),
                reason: format!("bus '{}' offline", self.name),
            });
        }
        // snapshot so handlers run without the lock held
        let targets: Vec<ReceiveHandler> = self
            .handlers
            .read()
            .get(subject)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        for handler in targets {
            handler(subject, payload);
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn subscribe(&self, adapter_id: u64, subject: &str, handler: ReceiveHandler) {
        let mut handlers = self.handlers.write();
        let list = handlers.entry(subject.to_string()).or_default();
        list.retain(|(id, _)| *id != adapter_id);
        list.push((adapter_id, handler));
    }

    fn detach(&self, adapter_id: u64) {
        let mut handlers = self.handlers.write();
        for list in handlers.values_mut() {
            list.retain(|(id, _)| *id != adapter_id);
        }
        handlers.retain(|_, list| !list.is_empty());
    }
}

/// One endpoint on a [`LoopbackBus`].
pub struct LoopbackAdapter {
    bus: Arc<LoopbackBus>,
    id: u64,
    shut_down: AtomicBool,
}

impl TransportAdapter for LoopbackAdapter {
    fn send(&self, subject: &str, payload: &[u8]) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        self.bus.publish(subject, payload)
    }

    fn set_receive_handler(&self, subject: &str, handler: ReceiveHandler) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        self.bus.subscribe(self.id, subject, handler);
        Ok(())
    }

    fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            self.bus.detach(self.id);
        }
    }
}

impl Drop for LoopbackAdapter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Creates [`LoopbackAdapter`]s on one bus.
pub struct LoopbackFactory {
    bus: Arc<LoopbackBus>,
    created: AtomicU64,
}

impl LoopbackFactory {
    pub fn new(bus: Arc<LoopbackBus>) -> Self {
        Self {
            bus,
            created: AtomicU64::new(0),
        }
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

impl AdapterFactory for LoopbackFactory {
    fn create_adapter(&self, subject: &str) -> Result<Arc<dyn TransportAdapter>> {
        if !self.bus.is_online() {
            return Err(Error::AdapterUnavailable {
                subject: subject.to_string(),
                reason: format!("bus '{}' offline", self.bus.name()),
            });
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(self.bus.adapter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (ReceiveHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (
            Arc::new(move |_: &str, _: &[u8]| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    #[test]
    fn test_subject_routing() {
        let bus = LoopbackBus::new("test");
        let a = bus.adapter();
        let b = bus.adapter();
        let (handler, count) = counter();
        b.set_receive_handler("orders", handler).unwrap();

        a.send("orders", b"1").unwrap();
        a.send("trades", b"2").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.delivered(), 1);
    }

    #[test]
    fn test_offline_bus_fails_send() {
        let bus = LoopbackBus::new("test");
        let a = bus.adapter();
        bus.set_online(false);
        assert!(matches!(a.send("orders", b"1"), Err(Error::SendFailed { .. })));
        let factory = LoopbackFactory::new(Arc::clone(&bus));
        assert!(factory.create_adapter("orders").is_err());
    }

    #[test]
    fn test_shutdown_detaches() {
        let bus = LoopbackBus::new("test");
        let a = bus.adapter();
        let b = bus.adapter();
        let (handler, count) = counter();
        b.set_receive_handler("orders", handler).unwrap();
        b.shutdown();
        b.shutdown();
        a.send("orders", b"1").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
