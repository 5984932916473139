// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batch header.
//!
//! ```text
//! +-----------------------------------------------------------+
//! | version (1) | sender_version (4) | host_len (2) | host    |
//! | name_len (2) | process_name | sender_id (8)               |
//! | requestor_id (8) | event_count (4)                        |
//! +-----------------------------------------------------------+
//! ```
//!
//! All fixed-width fields are big-endian.

use super::CodecError;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Layout without per-event framing; decoded for compatibility.
pub const PROTOCOL_VERSION_LEGACY: u8 = 1;

/// Current layout: each event framed by `len | !len`.
pub const PROTOCOL_VERSION: u8 = 2;

/// Decoded batch header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchHeader {
    pub version: u8,
    pub sender_version: u32,
    pub host_address: String,
    pub process_name: String,
    pub sender_id: u64,
    pub requestor_id: u64,
    pub event_count: u32,
}

impl BatchHeader {
    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        if self.version != PROTOCOL_VERSION && self.version != PROTOCOL_VERSION_LEGACY {
            return Err(CodecError::UnsupportedVersion(self.version));
        }
        w.write_u8(self.version)?;
        w.write_u32::<BigEndian>(self.sender_version)?;
        write_str16(w, &self.host_address, "host address")?;
        write_str16(w, &self.process_name, "process name")?;
        w.write_u64::<BigEndian>(self.sender_id)?;
        w.write_u64::<BigEndian>(self.requestor_id)?;
        w.write_u32::<BigEndian>(self.event_count)?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let version = r.read_u8()?;
        if version != PROTOCOL_VERSION && version != PROTOCOL_VERSION_LEGACY {
            return Err(CodecError::UnsupportedVersion(version));
        }
        Ok(Self {
            version,
            sender_version: r.read_u32::<BigEndian>()?,
            host_address: read_str16(r)?,
            process_name: read_str16(r)?,
            sender_id: r.read_u64::<BigEndian>()?,
            requestor_id: r.read_u64::<BigEndian>()?,
            event_count: r.read_u32::<BigEndian>()?,
        })
    }
}

pub(crate) fn write_str16<W: Write>(
    w: &mut W,
    s: &str,
    what: &'static str,
) -> Result<(), CodecError> {
    let len = u16::try_from(s.len()).map_err(|_| CodecError::TooLong {
        what,
        len: s.len(),
    })?;
    w.write_u16::<BigEndian>(len)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

pub(crate) fn read_str16<R: Read>(r: &mut R) -> Result<String, CodecError> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| CodecError::InvalidUtf8)
}
