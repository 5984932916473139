// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire codec for notification batches.
//!
//! # Format Overview
//!
//! ```text
//! +-----------------------------------------------------------+
//! |               BatchHeader (uncompressed)                   |
//! |  version | sender_version | host | process | ids | count   |
//! +-----------------------------------------------------------+
//! |               Body (deflate, whole batch)                  |
//! |  v2: ( len (4) | !len (4) | event payload )*               |
//! |  v1: ( event payload )*                                    |
//! +-----------------------------------------------------------+
//! ```
//!
//! A v2 event whose payload is corrupt or whose entity is not resolvable is
//! dropped with a warning and decoding continues with the next frame. A
//! frame whose length and inverted length disagree ends the batch, since
//! nothing after it can be located reliably. v1 bodies have no framing, so
//! the first bad event ends the batch.

mod event;
mod header;

pub use event::{decode_row_key, encode_row_key};
pub use header::{BatchHeader, PROTOCOL_VERSION, PROTOCOL_VERSION_LEGACY};

use crate::event::{NotificationBatch, NotificationEvent};
use crate::predicate::PredicateError;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Frame prefix: length plus bit-inverted length.
const FRAME_PREFIX_LEN: usize = 8;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    #[error("unknown operation code {0}")]
    UnknownOperation(u8),

    #[error("unknown value tag {0}")]
    UnknownValueTag(u8),

    #[error("invalid presence flag {0}")]
    InvalidFlag(u8),

    #[error("invalid mass-delete predicate: {0}")]
    InvalidPredicate(#[from] PredicateError),

    #[error("unresolvable entity '{0}'")]
    UnknownEntity(String),

    #[error("{0} trailing bytes after event")]
    TrailingBytes(usize),

    #[error("{what} too long ({len})")]
    TooLong { what: &'static str, len: usize },

    #[error("frame {index} corrupt (len {len:#x}, check {check:#x})")]
    FrameMismatch { index: u32, len: u32, check: u32 },

    #[error("decoded body exceeds {0} bytes")]
    BodyTooLarge(usize),
}

/// Outcome of decoding one inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeReport {
    pub batch: NotificationBatch,
    /// Events announced by the header but not delivered.
    pub skipped: usize,
}

/// Codec counters.
#[derive(Debug, Default)]
pub struct CodecStats {
    pub batches_encoded: AtomicU64,
    pub batches_decoded: AtomicU64,
    pub events_skipped: AtomicU64,
}

impl CodecStats {
    pub fn snapshot(&self) -> CodecStatsSnapshot {
        CodecStatsSnapshot {
            batches_encoded: self.batches_encoded.load(Ordering::Relaxed),
            batches_decoded: self.batches_decoded.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecStatsSnapshot {
    pub batches_encoded: u64,
    pub batches_decoded: u64,
    pub events_skipped: u64,
}

type EntityResolver = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Encoder/decoder for [`NotificationBatch`]es. Reentrant: the shared body
/// buffer is guarded by a mutex.
pub struct WireCodec {
    compression: Compression,
    max_body_bytes: usize,
    scratch: Mutex<Vec<u8>>,
    resolver: Option<EntityResolver>,
    stats: CodecStats,
}

impl WireCodec {
    pub fn new(compression_level: u32, max_body_bytes: usize) -> Self {
        Self {
            compression: Compression::new(compression_level.min(9)),
            max_body_bytes,
            scratch: Mutex::new(Vec::with_capacity(4096)),
            resolver: None,
            stats: CodecStats::default(),
        }
    }

    /// Only entities accepted by `resolver` are decoded; others are dropped.
    pub fn with_entity_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn stats(&self) -> CodecStatsSnapshot {
        self.stats.snapshot()
    }

    /// Encode a batch using the layout selected by `batch.protocol_version`.
    pub fn encode(&self, batch: &NotificationBatch) -> Result<Vec<u8>, CodecError> {
        let header = BatchHeader {
            version: batch.protocol_version,
            sender_version: batch.sender_version,
            host_address: batch.host_address.clone(),
            process_name: batch.process_name.clone(),
            sender_id: batch.sender_id,
            requestor_id: batch.requestor_id,
            event_count: u32::try_from(batch.events.len()).map_err(|_| CodecError::TooLong {
                what: "event list",
                len: batch.events.len(),
            })?,
        };

        let mut out = Vec::with_capacity(64);
        header.write(&mut out)?;

        let mut body = self.scratch.lock();
        body.clear();
        for event in &batch.events {
            if header.version == PROTOCOL_VERSION {
                let start = body.len();
                body.write_u64::<BigEndian>(0)?;
                event::write_event(&mut *body, event)?;
                let len = (body.len() - start - FRAME_PREFIX_LEN) as u32;
                BigEndian::write_u32(&mut body[start..start + 4], len);
                BigEndian::write_u32(&mut body[start + 4..start + 8], !len);
            } else {
                event::write_event(&mut *body, event)?;
            }
        }

        let mut encoder = DeflateEncoder::new(out, self.compression);
        encoder.write_all(&body)?;
        let out = encoder.finish()?;
        drop(body);

        self.stats.batches_encoded.fetch_add(1, Ordering::Relaxed);
        Ok(out)
    }

    /// Decode a payload. Recoverable per-event failures are logged and skipped.
    pub fn decode(&self, bytes: &[u8]) -> Result<NotificationBatch, CodecError> {
        self.decode_with_report(bytes).map(|report| report.batch)
    }

    pub fn decode_with_report(&self, bytes: &[u8]) -> Result<DecodeReport, CodecError> {
        let mut cursor = Cursor::new(bytes);
        let header = BatchHeader::read(&mut cursor)?;
        let body_start = cursor.position() as usize;
        let body = self.inflate(&bytes[body_start..])?;

        let expected = header.event_count as usize;
        let events = if header.version == PROTOCOL_VERSION {
            self.decode_framed(&header, &body)
        } else {
            self.decode_legacy(&header, &body)
        };
        let skipped = expected.saturating_sub(events.len());
        if skipped > 0 {
            self.stats
                .events_skipped
                .fetch_add(skipped as u64, Ordering::Relaxed);
        }
        self.stats.batches_decoded.fetch_add(1, Ordering::Relaxed);

        Ok(DecodeReport {
            batch: NotificationBatch {
                protocol_version: header.version,
                sender_version: header.sender_version,
                host_address: header.host_address,
                process_name: header.process_name,
                sender_id: header.sender_id,
                requestor_id: header.requestor_id,
                events,
            },
            skipped,
        })
    }

    fn inflate(&self, compressed: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut body = Vec::with_capacity(compressed.len() * 4);
        DeflateDecoder::new(compressed)
            .take(self.max_body_bytes as u64 + 1)
            .read_to_end(&mut body)?;
        if body.len() > self.max_body_bytes {
            return Err(CodecError::BodyTooLarge(self.max_body_bytes));
        }
        Ok(body)
    }

    fn decode_framed(&self, header: &BatchHeader, body: &[u8]) -> Vec<NotificationEvent> {
        let mut events = Vec::with_capacity((header.event_count as usize).min(4096));
        let mut pos = 0usize;

        for index in 0..header.event_count {
            if body.len() - pos < FRAME_PREFIX_LEN {
                log::warn!(
                    "[CODEC] batch from {} truncated at event {} of {}",
                    header.process_name,
                    index,
                    header.event_count
                );
                break;
            }
            let len = BigEndian::read_u32(&body[pos..pos + 4]);
            let check = BigEndian::read_u32(&body[pos + 4..pos + 8]);
            let payload_start = pos + FRAME_PREFIX_LEN;
            if check != !len || (len as usize) > body.len() - payload_start {
                log::warn!(
                    "[CODEC] batch from {}: {}; dropping {} remaining event(s)",
                    header.process_name,
                    CodecError::FrameMismatch { index, len, check },
                    header.event_count - index
                );
                break;
            }
            let payload = &body[payload_start..payload_start + len as usize];
            pos = payload_start + len as usize;

            match event::read_event_exact(payload).and_then(|e| self.resolve(e)) {
                Ok(event) => events.push(event),
                Err(e) => log::warn!(
                    "[CODEC] batch from {}: dropping event {} of {}: {}",
                    header.process_name,
                    index,
                    header.event_count,
                    e
                ),
            }
        }
        events
    }

    fn decode_legacy(&self, header: &BatchHeader, body: &[u8]) -> Vec<NotificationEvent> {
        let mut events = Vec::with_capacity((header.event_count as usize).min(4096));
        let mut cursor = Cursor::new(body);

        for index in 0..header.event_count {
            match event::read_event(&mut cursor) {
                Ok(event) => match self.resolve(event) {
                    Ok(event) => events.push(event),
                    // payload consumed, so the stream is still aligned
                    Err(e) => log::warn!(
                        "[CODEC] legacy batch from {}: dropping event {}: {}",
                        header.process_name,
                        index,
                        e
                    ),
                },
                Err(e) => {
                    log::warn!(
                        "[CODEC] legacy batch from {}: event {} unreadable ({}); dropping {} remaining event(s)",
                        header.process_name,
                        index,
                        e,
                        header.event_count - index
                    );
                    break;
                }
            }
        }
        events
    }

    fn resolve(&self, event: NotificationEvent) -> Result<NotificationEvent, CodecError> {
        match &self.resolver {
            Some(resolver) if !resolver(event.entity()) => {
                Err(CodecError::UnknownEntity(event.entity().to_string()))
            }
            _ => Ok(event),
        }
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(6, crate::config::DEFAULT_MAX_DECODED_BODY_BYTES)
    }
}

/// Version of this crate packed as `major << 16 | minor << 8 | patch`.
pub fn sender_version() -> u32 {
    let part = |s: &str| s.parse::<u32>().unwrap_or(0) & 0xff;
    (part(env!("CARGO_PKG_VERSION_MAJOR")) << 16)
        | (part(env!("CARGO_PKG_VERSION_MINOR")) << 8)
        | part(env!("CARGO_PKG_VERSION_PATCH"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ColumnRef, RowKey, Value};
    use crate::predicate::Predicate;

    fn batch(version: u8, events: Vec<NotificationEvent>) -> NotificationBatch {
        NotificationBatch {
            protocol_version: version,
            sender_version: sender_version(),
            host_address: "10.0.0.5".into(),
            process_name: "10.0.0.5:100:1".into(),
            sender_id: 11,
            requestor_id: 22,
            events,
        }
    }

    fn three_events() -> Vec<NotificationEvent> {
        vec![
            NotificationEvent::insert("Order", vec![RowKey::new().with("id", 1)]),
            NotificationEvent::update(
                "Order",
                vec![RowKey::new().with("id", 2)],
                Some(vec![ColumnRef::new("qty")]),
            ),
            NotificationEvent::delete("Order", vec![RowKey::new().with("id", 3)]),
        ]
    }

    #[test]
    fn test_roundtrip_empty_single_many() {
        let codec = WireCodec::default();
        let mass = NotificationEvent::mass_delete("Order", None).with_source(Value::Int(3));
        let cases = vec![
            Vec::new(),
            vec![mass.clone()],
            {
                let mut v = three_events();
                v.push(mass);
                v.push(NotificationEvent::mass_delete(
                    "Trade",
                    Some(Predicate::parse("book LIKE 'fx%' AND qty > 10").unwrap()),
                ));
                v
            },
        ];
        for events in cases {
            let original = batch(PROTOCOL_VERSION, events);
            let bytes = codec.encode(&original).unwrap();
            assert_eq!(codec.decode(&bytes).unwrap(), original);
        }
    }

    #[test]
    fn test_legacy_roundtrip() {
        let codec = WireCodec::default();
        let original = batch(PROTOCOL_VERSION_LEGACY, three_events());
        let bytes = codec.encode(&original).unwrap();
        assert_eq!(bytes[0], PROTOCOL_VERSION_LEGACY);
        assert_eq!(codec.decode(&bytes).unwrap(), original);
    }

    /// Build a v2 payload by hand so that one frame can carry garbage.
    fn hand_built(payloads: &[Vec<u8>], frame_check_ok: bool) -> Vec<u8> {
        let mut out = Vec::new();
        BatchHeader {
            version: PROTOCOL_VERSION,
            sender_version: 1,
            host_address: "h".into(),
            process_name: "p".into(),
            sender_id: 1,
            requestor_id: 1,
            event_count: payloads.len() as u32,
        }
        .write(&mut out)
        .unwrap();

        let mut body = Vec::new();
        for (i, payload) in payloads.iter().enumerate() {
            let len = payload.len() as u32;
            body.write_u32::<BigEndian>(len).unwrap();
            let check = if !frame_check_ok && i == 1 { len } else { !len };
            body.write_u32::<BigEndian>(check).unwrap();
            body.extend_from_slice(payload);
        }
        let mut encoder = DeflateEncoder::new(out, Compression::default());
        encoder.write_all(&body).unwrap();
        encoder.finish().unwrap()
    }

    fn payload(event: &NotificationEvent) -> Vec<u8> {
        let mut buf = Vec::new();
        event::write_event(&mut buf, event).unwrap();
        buf
    }

    #[test]
    fn test_corrupt_middle_event_is_skipped() {
        let events = three_events();
        let mut corrupt = payload(&events[1]);
        corrupt[7] = 0xee; // operation code
        let bytes = hand_built(&[payload(&events[0]), corrupt, payload(&events[2])], true);

        let codec = WireCodec::default();
        let report = codec.decode_with_report(&bytes).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.batch.events, vec![events[0].clone(), events[2].clone()]);
        assert_eq!(codec.stats().events_skipped, 1);
    }

    #[test]
    fn test_frame_mismatch_stops_batch() {
        let events = three_events();
        let payloads: Vec<_> = events.iter().map(payload).collect();
        let bytes = hand_built(&payloads, false);

        let report = WireCodec::default().decode_with_report(&bytes).unwrap();
        assert_eq!(report.batch.events, vec![events[0].clone()]);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn test_unresolvable_entity_dropped() {
        let codec = WireCodec::default().with_entity_resolver(|entity| entity != "Ghost");
        let original = batch(
            PROTOCOL_VERSION,
            vec![
                NotificationEvent::delete("Order", Vec::new()),
                NotificationEvent::delete("Ghost", Vec::new()),
            ],
        );
        let decoded = codec.decode(&codec.encode(&original).unwrap()).unwrap();
        assert_eq!(decoded.events.len(), 1);
        assert_eq!(decoded.events[0].entity(), "Order");
    }

    #[test]
    fn test_bad_header_rejects_batch() {
        let codec = WireCodec::default();
        let mut bytes = codec.encode(&batch(PROTOCOL_VERSION, three_events())).unwrap();
        bytes[0] = 0x7f;
        assert!(matches!(
            codec.decode(&bytes),
            Err(CodecError::UnsupportedVersion(0x7f))
        ));
        assert!(codec.decode(&[]).is_err());
    }

    #[test]
    fn test_body_limit() {
        let codec = WireCodec::new(6, 16);
        let bytes = codec.encode(&batch(PROTOCOL_VERSION, three_events())).unwrap();
        assert!(matches!(
            codec.decode(&bytes),
            Err(CodecError::BodyTooLarge(16))
        ));
    }

    #[test]
    fn test_concurrent_encode() {
        let codec = Arc::new(WireCodec::default());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let codec = Arc::clone(&codec);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let event = NotificationEvent::delete(
                            "Order",
                            vec![RowKey::new().with("id", t * 1000 + i)],
                        );
                        let original = batch(PROTOCOL_VERSION, vec![event]);
                        let decoded = codec.decode(&codec.encode(&original).unwrap()).unwrap();
                        assert_eq!(decoded, original);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
