// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event payload encoding.
//!
//! ```text
//! entity (str16) | kind (1) | row_count (4) | rows...
//! | has_columns (1) [ col_count (2) | name (str16)... ]
//! | has_predicate (1) [ text (str32) ]
//! | has_source (1) [ value ]
//!
//! row   = field_count (2) | ( name (str16) | value )...
//! value = tag (1) | payload
//! ```

use super::header::{read_str16, write_str16};
use super::CodecError;
use crate::event::{ColumnRef, NotificationEvent, OperationKind, RowKey, Value};
use crate::predicate::Predicate;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_TIMESTAMP: u8 = 6;

pub(crate) fn write_event<W: Write>(w: &mut W, event: &NotificationEvent) -> Result<(), CodecError> {
    write_str16(w, event.entity(), "entity name")?;
    w.write_u8(event.kind().code())?;

    w.write_u32::<BigEndian>(event.rows().len() as u32)?;
    for row in event.rows() {
        write_row_key(w, row)?;
    }

    match event.updated_columns() {
        Some(columns) => {
            w.write_u8(1)?;
            let count = u16::try_from(columns.len()).map_err(|_| CodecError::TooLong {
                what: "updated column list",
                len: columns.len(),
            })?;
            w.write_u16::<BigEndian>(count)?;
            for column in columns {
                write_str16(w, column.name(), "column name")?;
            }
        }
        None => w.write_u8(0)?,
    }

    match event.mass_delete_predicate() {
        Some(predicate) => {
            w.write_u8(1)?;
            write_bytes32(w, predicate.as_str().as_bytes())?;
        }
        None => w.write_u8(0)?,
    }

    match event.source() {
        Some(value) => {
            w.write_u8(1)?;
            write_value(w, value)?;
        }
        None => w.write_u8(0)?,
    }
    Ok(())
}

pub(crate) fn read_event<R: Read>(r: &mut R) -> Result<NotificationEvent, CodecError> {
    let entity = read_str16(r)?;
    let code = r.read_u8()?;
    let kind = OperationKind::from_code(code).ok_or(CodecError::UnknownOperation(code))?;

    let row_count = r.read_u32::<BigEndian>()? as usize;
    // cap preallocation; every row needs at least two bytes
    let mut rows = Vec::with_capacity(row_count.min(1024));
    for _ in 0..row_count {
        rows.push(read_row_key(r)?);
    }

    let updated_columns = if read_flag(r)? {
        let count = r.read_u16::<BigEndian>()? as usize;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            columns.push(ColumnRef::new(read_str16(r)?));
        }
        Some(columns)
    } else {
        None
    };

    let mass_delete_predicate = if read_flag(r)? {
        let text = String::from_utf8(read_bytes32(r)?).map_err(|_| CodecError::InvalidUtf8)?;
        Some(Predicate::parse(&text)?)
    } else {
        None
    };

    let source = if read_flag(r)? {
        Some(read_value(r)?)
    } else {
        None
    };

    Ok(NotificationEvent::from_parts(
        entity,
        kind,
        rows,
        updated_columns,
        mass_delete_predicate,
        source,
    ))
}

/// Decode one event that must occupy `payload` exactly.
pub(crate) fn read_event_exact(payload: &[u8]) -> Result<NotificationEvent, CodecError> {
    let mut cursor = Cursor::new(payload);
    let event = read_event(&mut cursor)?;
    let remaining = payload.len() - cursor.position() as usize;
    if remaining != 0 {
        return Err(CodecError::TrailingBytes(remaining));
    }
    Ok(event)
}

/// Serialize a row key on its own (also used by durable stores).
pub fn encode_row_key(row: &RowKey) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(16 * row.len());
    write_row_key(&mut buf, row)?;
    Ok(buf)
}

pub fn decode_row_key(bytes: &[u8]) -> Result<RowKey, CodecError> {
    let mut cursor = Cursor::new(bytes);
    let row = read_row_key(&mut cursor)?;
    let remaining = bytes.len() - cursor.position() as usize;
    if remaining != 0 {
        return Err(CodecError::TrailingBytes(remaining));
    }
    Ok(row)
}

fn write_row_key<W: Write>(w: &mut W, row: &RowKey) -> Result<(), CodecError> {
    let count = u16::try_from(row.len()).map_err(|_| CodecError::TooLong {
        what: "row key",
        len: row.len(),
    })?;
    w.write_u16::<BigEndian>(count)?;
    for (name, value) in row.iter() {
        write_str16(w, name, "field name")?;
        write_value(w, value)?;
    }
    Ok(())
}

fn read_row_key<R: Read>(r: &mut R) -> Result<RowKey, CodecError> {
    let count = r.read_u16::<BigEndian>()?;
    let mut row = RowKey::new();
    for _ in 0..count {
        let name = read_str16(r)?;
        let value = read_value(r)?;
        row.insert(name, value);
    }
    Ok(row)
}

fn write_value<W: Write>(w: &mut W, value: &Value) -> Result<(), CodecError> {
    match value {
        Value::Null => w.write_u8(TAG_NULL)?,
        Value::Bool(b) => {
            w.write_u8(TAG_BOOL)?;
            w.write_u8(u8::from(*b))?;
        }
        Value::Int(i) => {
            w.write_u8(TAG_INT)?;
            w.write_i64::<BigEndian>(*i)?;
        }
        Value::Float(f) => {
            w.write_u8(TAG_FLOAT)?;
            w.write_f64::<BigEndian>(*f)?;
        }
        Value::Str(s) => {
            w.write_u8(TAG_STR)?;
            write_bytes32(w, s.as_bytes())?;
        }
        Value::Bytes(b) => {
            w.write_u8(TAG_BYTES)?;
            write_bytes32(w, b)?;
        }
        Value::Timestamp(ms) => {
            w.write_u8(TAG_TIMESTAMP)?;
            w.write_i64::<BigEndian>(*ms)?;
        }
    }
    Ok(())
}

fn read_value<R: Read>(r: &mut R) -> Result<Value, CodecError> {
    let tag = r.read_u8()?;
    Ok(match tag {
        TAG_NULL => Value::Null,
        TAG_BOOL => Value::Bool(r.read_u8()? != 0),
        TAG_INT => Value::Int(r.read_i64::<BigEndian>()?),
        TAG_FLOAT => Value::Float(r.read_f64::<BigEndian>()?),
        TAG_STR => {
            Value::Str(String::from_utf8(read_bytes32(r)?).map_err(|_| CodecError::InvalidUtf8)?)
        }
        TAG_BYTES => Value::Bytes(read_bytes32(r)?),
        TAG_TIMESTAMP => Value::Timestamp(r.read_i64::<BigEndian>()?),
        other => return Err(CodecError::UnknownValueTag(other)),
    })
}

fn read_flag<R: Read>(r: &mut R) -> Result<bool, CodecError> {
    match r.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(CodecError::InvalidFlag(other)),
    }
}

fn write_bytes32<W: Write>(w: &mut W, bytes: &[u8]) -> Result<(), CodecError> {
    let len = u32::try_from(bytes.len()).map_err(|_| CodecError::TooLong {
        what: "byte string",
        len: bytes.len(),
    })?;
    w.write_u32::<BigEndian>(len)?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_bytes32<R: Read>(r: &mut R) -> Result<Vec<u8>, CodecError> {
    let len = r.read_u32::<BigEndian>()? as usize;
    let mut buf = Vec::with_capacity(len.min(64 * 1024));
    r.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(CodecError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "byte string truncated",
        )));
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_value_tag() {
        let row = RowKey::new()
            .with("n", Value::Null)
            .with("b", true)
            .with("i", -7)
            .with("f", 2.25)
            .with("s", "héllo")
            .with("raw", vec![0u8, 1, 2])
            .with("asof", Value::Timestamp(1_700_000_000_000));
        let bytes = encode_row_key(&row).unwrap();
        assert_eq!(decode_row_key(&bytes).unwrap(), row);
    }

    #[test]
    fn test_unknown_operation_code() {
        let event = NotificationEvent::delete("Order", vec![RowKey::new().with("id", 1)]);
        let mut buf = Vec::new();
        write_event(&mut buf, &event).unwrap();
        // entity str16 = 2 + 5 bytes, kind follows
        buf[7] = 42;
        assert!(matches!(
            read_event_exact(&buf),
            Err(CodecError::UnknownOperation(42))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let event = NotificationEvent::insert("Order", Vec::new());
        let mut buf = Vec::new();
        write_event(&mut buf, &event).unwrap();
        buf.push(0);
        assert!(matches!(
            read_event_exact(&buf),
            Err(CodecError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_invalid_predicate_text() {
        let event = NotificationEvent::mass_delete("Order", Some(Predicate::parse("id = 1").unwrap()));
        let mut buf = Vec::new();
        write_event(&mut buf, &event).unwrap();
        let pos = buf.windows(6).position(|w| w == b"id = 1").unwrap();
        buf[pos + 3] = b'@';
        assert!(matches!(
            read_event_exact(&buf),
            Err(CodecError::InvalidPredicate(_))
        ));
    }
}
