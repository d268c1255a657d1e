//! Record frame codec.
//!
//! Every record on disk is one frame:
//!
//! ```text
//! [size:i32][nullmask:ceil(field_count/8) bytes][field bytes...]
//! ```
//!
//! `size` counts the nullmask and field bytes only. A negative size marks a
//! tombstone whose slot capacity is `|size|`. Nullmask bits are LSB-first
//! within each byte: bit `i % 8` of byte `i / 8` is set when field `i` is
//! null, in which case the field contributes no bytes.
//!
//! With encryption enabled the nullmask+fields payload is encrypted as one
//! unit and `size` becomes the ciphertext length; slot-capacity arithmetic
//! therefore works on ciphertext sizes throughout.

use halite_types::{DataType, Schema, Value};

use crate::backing::{Backing, BackingExt};
use crate::cipher::Cipher;
use crate::codec::{ByteReader, read_value, value_size, write_value};
use crate::error::DbError;

/// A decoded record frame.
#[derive(Debug)]
pub(crate) struct Frame {
    /// Field values in ordinal order; empty for tombstones.
    pub values: Vec<Value>,
    /// Whether the stored size was negative.
    pub tombstone: bool,
    /// `|size|` as stored.
    pub size: u32,
}

/// Plaintext payload size (nullmask + non-null field bytes).
///
/// Agrees byte-for-byte with [`encode_payload`]; encryption may change the
/// stored size afterwards.
pub(crate) fn payload_size(schema: &Schema, values: &[Value]) -> Result<usize, DbError> {
    debug_assert_eq!(values.len(), schema.len(), "values must cover the schema");
    let mut size = schema.nullmask_len();
    for (field, value) in schema.fields().iter().zip(values) {
        if !value.is_null() {
            size += value_size(value, field.data_type, field.array)
                .map_err(|e| e.with_field(&field.name))?;
        }
    }
    Ok(size)
}

/// Serializes the nullmask and fields into a plaintext payload.
pub(crate) fn encode_payload(schema: &Schema, values: &[Value]) -> Result<Vec<u8>, DbError> {
    debug_assert_eq!(values.len(), schema.len(), "values must cover the schema");
    let mask_len = schema.nullmask_len();
    let mut buf = vec![0u8; mask_len];
    for (i, value) in values.iter().enumerate() {
        if value.is_null() {
            buf[i / 8] |= 1 << (i % 8);
        }
    }
    for (field, value) in schema.fields().iter().zip(values) {
        if !value.is_null() {
            write_value(&mut buf, value, field.data_type, field.array)
                .map_err(|e| e.with_field(&field.name))?;
        }
    }
    Ok(buf)
}

/// Parses a plaintext payload back into ordinal-ordered values.
pub(crate) fn decode_payload(schema: &Schema, payload: &[u8]) -> Result<Vec<Value>, DbError> {
    let mut reader = ByteReader::new(payload);
    let mask = reader.take(schema.nullmask_len())?.to_vec();
    let mut values = Vec::with_capacity(schema.len());
    for (i, field) in schema.fields().iter().enumerate() {
        if mask[i / 8] & (1 << (i % 8)) != 0 {
            values.push(Value::Null);
        } else {
            values.push(read_value(&mut reader, field.data_type, field.array)?);
        }
    }
    Ok(values)
}

/// Applies the optional encryption envelope to a plaintext payload.
pub(crate) fn seal_payload(plain: Vec<u8>, cipher: Option<&dyn Cipher>) -> Vec<u8> {
    match cipher {
        Some(cipher) => cipher.encrypt(&plain),
        None => plain,
    }
}

/// Reads the stored size prefix at `offset`.
pub(crate) fn read_size(backing: &mut dyn Backing, offset: u64) -> Result<i32, DbError> {
    backing.seek(offset)?;
    backing.read_i32()
}

/// Reads a frame's stored size and raw payload bytes (ciphertext when
/// encryption is on). Used for verbatim copies during compaction.
pub(crate) fn read_raw(backing: &mut dyn Backing, offset: u64) -> Result<(i32, Vec<u8>), DbError> {
    backing.seek(offset)?;
    let size = backing.read_i32()?;
    let payload = backing.read_vec(size.unsigned_abs() as usize)?;
    Ok((size, payload))
}

/// Reads and decodes the frame at `offset`.
///
/// Tombstones come back with empty `values`; their stale payload bytes are
/// never decrypted or decoded.
pub(crate) fn read_frame(
    backing: &mut dyn Backing,
    offset: u64,
    schema: &Schema,
    cipher: Option<&dyn Cipher>,
) -> Result<Frame, DbError> {
    let (size, raw) = read_raw(backing, offset)?;
    if size < 0 {
        return Ok(Frame {
            values: Vec::new(),
            tombstone: true,
            size: size.unsigned_abs(),
        });
    }

    let plain = match cipher {
        Some(cipher) => cipher.decrypt(&raw)?,
        None => raw,
    };
    Ok(Frame {
        values: decode_payload(schema, &plain)?,
        tombstone: false,
        size: size as u32,
    })
}

/// Reads only the primary-key value of the live record at `offset`.
///
/// The key field is always at ordinal 0; the plaintext fast path reads just
/// the nullmask plus the key bytes for Int32 keys. Encrypted records must be
/// decrypted whole first.
pub(crate) fn read_key(
    backing: &mut dyn Backing,
    offset: u64,
    schema: &Schema,
    cipher: Option<&dyn Cipher>,
) -> Result<Value, DbError> {
    let key_field = schema
        .primary_key()
        .ok_or(DbError::MissingPrimaryKey)?;
    debug_assert_eq!(key_field.ordinal, 0, "primary key must sit at ordinal 0");

    backing.seek(offset)?;
    let size = backing.read_i32()?;
    if size <= 0 {
        return Err(DbError::corrupted(
            "live index references a tombstoned record",
        ));
    }

    let mask_len = schema.nullmask_len();
    let prefix = match (cipher, key_field.data_type) {
        // Fixed-size plaintext key: size prefix, mask, key bytes.
        (None, DataType::Int32) => backing.read_vec(mask_len + 4)?,
        // Variable-size or encrypted: take the whole payload.
        _ => backing.read_vec(size as usize)?,
    };
    let plain = match cipher {
        Some(cipher) => cipher.decrypt(&prefix)?,
        None => prefix,
    };

    let mut reader = ByteReader::new(&plain);
    let mask = reader.take(mask_len)?.to_vec();
    if mask[0] & 1 != 0 {
        return Err(DbError::corrupted("live record has a null primary key"));
    }
    read_value(&mut reader, key_field.data_type, false)
}

/// Writes `[len][payload]` at `offset`.
pub(crate) fn write_frame(
    backing: &mut dyn Backing,
    offset: u64,
    payload: &[u8],
) -> Result<(), DbError> {
    backing.seek(offset)?;
    backing.write_all(&(payload.len() as i32).to_le_bytes())?;
    backing.write_all(payload)
}

/// Negates the size prefix at `offset`, tombstoning the slot.
///
/// Returns the slot capacity now available for reuse.
pub(crate) fn tombstone_frame(backing: &mut dyn Backing, offset: u64) -> Result<u32, DbError> {
    let size = read_size(backing, offset)?;
    if size <= 0 {
        return Err(DbError::corrupted("record is already tombstoned"));
    }
    backing.seek(offset)?;
    backing.write_all(&(-size).to_le_bytes())?;
    Ok(size as u32)
}

#[cfg(test)]
mod tests {
    use halite_types::{ArrayValue, FieldDef};

    use super::*;
    use crate::backing::MemoryBacking;

    fn schema() -> Schema {
        let mut id = FieldDef::new("id", DataType::Int32).primary_key();
        id.ordinal = 0;
        let mut name = FieldDef::new("name", DataType::String);
        name.ordinal = 1;
        let mut scores = FieldDef::array("scores", DataType::Int32);
        scores.ordinal = 2;
        Schema::new(vec![id, name, scores])
    }

    #[test]
    fn payload_roundtrip_with_nulls() {
        let schema = schema();
        let values = vec![
            Value::Int32(7),
            Value::Null,
            Value::Array(ArrayValue::Int32(vec![1, 2])),
        ];
        let payload = encode_payload(&schema, &values).unwrap();
        assert_eq!(payload.len(), payload_size(&schema, &values).unwrap());
        // Nullmask: only field 1 (bit 1) is null.
        assert_eq!(payload[0], 0b10);
        assert_eq!(decode_payload(&schema, &payload).unwrap(), values);
    }

    #[test]
    fn null_array_distinct_from_empty() {
        let schema = schema();
        let null_arr = vec![Value::Int32(1), Value::String("x".into()), Value::Null];
        let empty_arr = vec![
            Value::Int32(1),
            Value::String("x".into()),
            Value::Array(ArrayValue::Int32(vec![])),
        ];
        let p_null = encode_payload(&schema, &null_arr).unwrap();
        let p_empty = encode_payload(&schema, &empty_arr).unwrap();
        assert_ne!(p_null, p_empty);
        assert_eq!(decode_payload(&schema, &p_null).unwrap()[2], Value::Null);
        assert_eq!(
            decode_payload(&schema, &p_empty).unwrap()[2],
            Value::Array(ArrayValue::Int32(vec![]))
        );
    }

    #[test]
    fn frame_write_read_tombstone_cycle() {
        let schema = schema();
        let mut backing = MemoryBacking::new();
        let values = vec![Value::Int32(1), Value::String("abc".into()), Value::Null];
        let payload = encode_payload(&schema, &values).unwrap();

        write_frame(&mut backing, 0, &payload).unwrap();
        let frame = read_frame(&mut backing, 0, &schema, None).unwrap();
        assert!(!frame.tombstone);
        assert_eq!(frame.size as usize, payload.len());
        assert_eq!(frame.values, values);

        let capacity = tombstone_frame(&mut backing, 0).unwrap();
        assert_eq!(capacity as usize, payload.len());
        assert_eq!(read_size(&mut backing, 0).unwrap(), -(payload.len() as i32));

        let dead = read_frame(&mut backing, 0, &schema, None).unwrap();
        assert!(dead.tombstone);
        assert!(dead.values.is_empty());

        // Tombstoning twice is a corruption signal.
        assert!(tombstone_frame(&mut backing, 0).is_err());
    }

    #[test]
    fn key_only_read_int32() {
        let schema = schema();
        let mut backing = MemoryBacking::new();
        let values = vec![Value::Int32(42), Value::String("zz".into()), Value::Null];
        let payload = encode_payload(&schema, &values).unwrap();
        write_frame(&mut backing, 0, &payload).unwrap();

        assert_eq!(
            read_key(&mut backing, 0, &schema, None).unwrap(),
            Value::Int32(42)
        );
    }

    #[test]
    fn key_only_read_string_key() {
        let mut key = FieldDef::new("code", DataType::String).primary_key();
        key.ordinal = 0;
        let mut n = FieldDef::new("n", DataType::Int32);
        n.ordinal = 1;
        let schema = Schema::new(vec![key, n]);

        let mut backing = MemoryBacking::new();
        let values = vec![Value::String("kx".into()), Value::Int32(1)];
        let payload = encode_payload(&schema, &values).unwrap();
        write_frame(&mut backing, 0, &payload).unwrap();

        assert_eq!(
            read_key(&mut backing, 0, &schema, None).unwrap(),
            Value::String("kx".into())
        );
    }
}
