//! Typed value codec.
//!
//! Writes and reads individual field values in the fixed little-endian
//! layouts the format defines:
//!
//! ```text
//! Bool     1 byte (0/1)          Float32  4 bytes IEEE-754 LE
//! Byte     1 byte                Float64  8 bytes IEEE-754 LE
//! Int32    4 bytes LE            Decimal  4xi32 LE (lo, mid, hi, flags)
//! UInt32   4 bytes LE            DateTime 10 bytes (y/mo/d/h/mi/s/ms/kind)
//! Int64    8 bytes LE            String   7-bit varint length + UTF-8
//!                                Guid     16 bytes little-endian-struct
//! Array<T> [count:i32] then count back-to-back encodings of T
//! ```
//!
//! Strings use the .NET 7-bit varint-length convention: low seven bits per
//! byte, high bit set while more bytes follow.
//!
//! [`value_size`] and [`write_value`] agree byte-for-byte; the record codec
//! relies on that to compute frame sizes without a scratch encode.

use bytes::Bytes;
use halite_types::{ArrayValue, DataType, DateTimeKind, DbDateTime, TypeError, Value};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::DbError;

/// Sequential reader over a decoded payload slice.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], DbError> {
        if self.remaining() < n {
            return Err(DbError::corrupted("record payload truncated"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, DbError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_i16(&mut self) -> Result<i16, DbError> {
        Ok(i16::from_le_bytes(self.take(2)?.try_into().expect("2 bytes")))
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, DbError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("2 bytes")))
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32, DbError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, DbError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    pub(crate) fn read_i64(&mut self) -> Result<i64, DbError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    pub(crate) fn read_f32(&mut self) -> Result<f32, DbError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64, DbError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    /// Reads a .NET 7-bit varint length.
    pub(crate) fn read_varint(&mut self) -> Result<u32, DbError> {
        let mut value: u32 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            value |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 28 {
                return Err(DbError::corrupted("varint length overflow"));
            }
        }
    }

    pub(crate) fn read_string(&mut self) -> Result<String, DbError> {
        let len = self.read_varint()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DbError::corrupted("string field is not valid UTF-8"))
    }
}

/// Writes a .NET 7-bit varint length.
pub(crate) fn write_varint(buf: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Number of bytes [`write_varint`] emits.
pub(crate) fn varint_size(value: u32) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        0x20_0000..=0xfff_ffff => 4,
        _ => 5,
    }
}

/// Writes a length-prefixed UTF-8 string.
pub(crate) fn write_string(buf: &mut Vec<u8>, text: &str) {
    write_varint(buf, text.len() as u32);
    buf.extend_from_slice(text.as_bytes());
}

pub(crate) fn string_size(text: &str) -> usize {
    varint_size(text.len() as u32) + text.len()
}

// ============================================================================
// Decimal and DateTime wire forms
// ============================================================================

/// `Decimal::serialize` emits `[flags][lo][mid][hi]`; the wire order is
/// `[lo][mid][hi][flags]`.
fn decimal_to_wire(value: &Decimal) -> [u8; 16] {
    let raw = value.serialize();
    let mut out = [0u8; 16];
    out[0..12].copy_from_slice(&raw[4..16]);
    out[12..16].copy_from_slice(&raw[0..4]);
    out
}

fn decimal_from_wire(wire: &[u8]) -> Decimal {
    let mut raw = [0u8; 16];
    raw[0..4].copy_from_slice(&wire[12..16]);
    raw[4..16].copy_from_slice(&wire[0..12]);
    Decimal::deserialize(raw)
}

fn write_datetime(buf: &mut Vec<u8>, value: &DbDateTime) -> Result<(), TypeError> {
    let (year, month, day, hour, min, sec, ms, kind) =
        value
            .to_parts()
            .ok_or(TypeError::ErrorConvertingValueForField {
                field: String::new(),
                target: DataType::DateTime,
            })?;
    buf.extend_from_slice(&year.to_le_bytes());
    buf.push(month);
    buf.push(day);
    buf.push(hour);
    buf.push(min);
    buf.push(sec);
    buf.extend_from_slice(&ms.to_le_bytes());
    buf.push(kind);
    Ok(())
}

fn read_datetime(r: &mut ByteReader<'_>) -> Result<DbDateTime, DbError> {
    let year = r.read_i16()?;
    let month = r.read_u8()?;
    let day = r.read_u8()?;
    let hour = r.read_u8()?;
    let min = r.read_u8()?;
    let sec = r.read_u8()?;
    let ms = r.read_u16()?;
    let kind = DateTimeKind::from_byte(r.read_u8()?)
        .ok_or_else(|| DbError::corrupted("bad DateTime kind byte"))?;
    DbDateTime::from_parts(year, month, day, hour, min, sec, ms, kind)
        .ok_or_else(|| DbError::corrupted("DateTime components out of range"))
}

// ============================================================================
// Value codec
// ============================================================================

fn type_mismatch(expected: DataType, value: &Value) -> TypeError {
    TypeError::InvalidDataType {
        field: String::new(),
        expected,
        actual: value
            .type_of()
            .map_or_else(|| "Null".to_string(), |(dt, arr)| {
                if arr {
                    format!("{dt} array")
                } else {
                    dt.to_string()
                }
            }),
    }
}

/// Encoded size of a non-null value.
///
/// Must agree byte-for-byte with [`write_value`].
pub(crate) fn value_size(value: &Value, dt: DataType, array: bool) -> Result<usize, TypeError> {
    if array {
        let Value::Array(arr) = value else {
            return Err(type_mismatch(dt, value));
        };
        if arr.element_type() != dt {
            return Err(type_mismatch(dt, value));
        }
        let elements = match (dt.fixed_size(), arr) {
            (Some(size), _) => arr.len() * size,
            (None, ArrayValue::String(items)) => items.iter().map(|s| string_size(s)).sum(),
            (None, _) => return Err(type_mismatch(dt, value)),
        };
        return Ok(4 + elements);
    }

    match dt.fixed_size() {
        Some(size) => {
            // Validate the variant even though the size is static.
            scalar_matches(value, dt)
                .then_some(size)
                .ok_or_else(|| type_mismatch(dt, value))
        }
        None => match value {
            Value::String(s) => Ok(string_size(s)),
            _ => Err(type_mismatch(dt, value)),
        },
    }
}

fn scalar_matches(value: &Value, dt: DataType) -> bool {
    value.type_of() == Some((dt, false))
}

/// Serializes a non-null value in field layout order.
pub(crate) fn write_value(
    buf: &mut Vec<u8>,
    value: &Value,
    dt: DataType,
    array: bool,
) -> Result<(), TypeError> {
    if array {
        let Value::Array(arr) = value else {
            return Err(type_mismatch(dt, value));
        };
        if arr.element_type() != dt {
            return Err(type_mismatch(dt, value));
        }
        buf.extend_from_slice(&(arr.len() as i32).to_le_bytes());
        write_array_elements(buf, arr)?;
        return Ok(());
    }

    match (value, dt) {
        (Value::Bool(v), DataType::Bool) => buf.push(u8::from(*v)),
        (Value::Byte(v), DataType::Byte) => buf.push(*v),
        (Value::Int32(v), DataType::Int32) => buf.extend_from_slice(&v.to_le_bytes()),
        (Value::UInt32(v), DataType::UInt32) => buf.extend_from_slice(&v.to_le_bytes()),
        (Value::Int64(v), DataType::Int64) => buf.extend_from_slice(&v.to_le_bytes()),
        (Value::Float32(v), DataType::Float32) => buf.extend_from_slice(&v.to_le_bytes()),
        (Value::Float64(v), DataType::Float64) => buf.extend_from_slice(&v.to_le_bytes()),
        (Value::Decimal(v), DataType::Decimal) => buf.extend_from_slice(&decimal_to_wire(v)),
        (Value::DateTime(v), DataType::DateTime) => write_datetime(buf, v)?,
        (Value::String(v), DataType::String) => write_string(buf, v),
        (Value::Guid(v), DataType::Guid) => buf.extend_from_slice(&v.to_bytes_le()),
        (other, expected) => return Err(type_mismatch(expected, other)),
    }
    Ok(())
}

fn write_array_elements(buf: &mut Vec<u8>, arr: &ArrayValue) -> Result<(), TypeError> {
    match arr {
        ArrayValue::Bool(items) => {
            for v in items {
                buf.push(u8::from(*v));
            }
        }
        ArrayValue::Byte(items) => buf.extend_from_slice(items),
        ArrayValue::Int32(items) => {
            for v in items {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        ArrayValue::UInt32(items) => {
            for v in items {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        ArrayValue::Int64(items) => {
            for v in items {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        ArrayValue::Float32(items) => {
            for v in items {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        ArrayValue::Float64(items) => {
            for v in items {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        ArrayValue::Decimal(items) => {
            for v in items {
                buf.extend_from_slice(&decimal_to_wire(v));
            }
        }
        ArrayValue::DateTime(items) => {
            for v in items {
                write_datetime(buf, v)?;
            }
        }
        ArrayValue::String(items) => {
            for v in items {
                write_string(buf, v);
            }
        }
        ArrayValue::Guid(items) => {
            for v in items {
                buf.extend_from_slice(&v.to_bytes_le());
            }
        }
    }
    Ok(())
}

/// Deserializes one value of the given type.
pub(crate) fn read_value(
    r: &mut ByteReader<'_>,
    dt: DataType,
    array: bool,
) -> Result<Value, DbError> {
    if array {
        let count = r.read_i32()?;
        if count < 0 {
            return Err(DbError::corrupted("negative array length"));
        }
        return read_array(r, dt, count as usize).map(Value::Array);
    }

    Ok(match dt {
        DataType::Bool => Value::Bool(r.read_u8()? != 0),
        DataType::Byte => Value::Byte(r.read_u8()?),
        DataType::Int32 => Value::Int32(r.read_i32()?),
        DataType::UInt32 => Value::UInt32(r.read_u32()?),
        DataType::Int64 => Value::Int64(r.read_i64()?),
        DataType::Float32 => Value::Float32(r.read_f32()?),
        DataType::Float64 => Value::Float64(r.read_f64()?),
        DataType::Decimal => Value::Decimal(decimal_from_wire(r.take(16)?)),
        DataType::DateTime => Value::DateTime(read_datetime(r)?),
        DataType::String => Value::String(r.read_string()?),
        DataType::Guid => Value::Guid(Uuid::from_bytes_le(
            r.take(16)?.try_into().expect("16 bytes"),
        )),
    })
}

fn read_array(r: &mut ByteReader<'_>, dt: DataType, count: usize) -> Result<ArrayValue, DbError> {
    macro_rules! collect {
        ($variant:ident, $read:expr) => {{
            let mut items = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                items.push($read?);
            }
            ArrayValue::$variant(items)
        }};
    }

    Ok(match dt {
        DataType::Bool => collect!(Bool, r.read_u8().map(|b| b != 0)),
        DataType::Byte => ArrayValue::Byte(Bytes::copy_from_slice(r.take(count)?)),
        DataType::Int32 => collect!(Int32, r.read_i32()),
        DataType::UInt32 => collect!(UInt32, r.read_u32()),
        DataType::Int64 => collect!(Int64, r.read_i64()),
        DataType::Float32 => collect!(Float32, r.read_f32()),
        DataType::Float64 => collect!(Float64, r.read_f64()),
        DataType::Decimal => collect!(Decimal, r.take(16).map(decimal_from_wire)),
        DataType::DateTime => collect!(DateTime, read_datetime(r)),
        DataType::String => collect!(String, r.read_string()),
        DataType::Guid => collect!(
            Guid,
            r.take(16)
                .map(|b| Uuid::from_bytes_le(b.try_into().expect("16 bytes")))
        ),
    })
}
