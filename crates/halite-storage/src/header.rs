//! File header and schema descriptor.
//!
//! Layout from the start of the file (all integers little-endian):
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Offset  │  Size  │  Description                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  0       │  4     │  Signature 0x0123BABE                   │
//! │  4       │  1     │  Major version (current 6)              │
//! │  5       │  1     │  Minor version (current 0)              │
//! │  6       │  4     │  Flags, bit 0 = encrypted (major >= 6)  │
//! │  10      │  4     │  Reserved, zero (major >= 6)            │
//! │  H       │  4     │  num_records                            │
//! │  H+4     │  4     │  num_deleted                            │
//! │  H+8     │  4     │  index_start_offset                     │
//! │  H+12    │  4     │  user_version, f32 (major >= 3)         │
//! │  ...     │  var   │  Schema descriptor                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! `H` is 14 when major >= 6, else 6. The schema descriptor is the
//! primary-key name (length-prefixed string, empty when keyless), an i32
//! field count, then one field record per field in ordinal order: name,
//! type code (i16), flags (i32: 0x1 autoinc, 0x2 array), an
//! `[autoinc_start:i32][cur_autoinc:i32]` pair when the autoinc bit is set,
//! and the comment string (major >= 2; empty means none).
//!
//! Writing counters or an autoinc current value patches the cells in place
//! via the positions captured in [`Layout`]; the schema itself is only
//! rewritten by compaction.

use halite_types::{DataType, FieldDef, Schema};

use crate::backing::{Backing, BackingExt};
use crate::codec::write_string;
use crate::error::DbError;

/// File signature.
pub const SIGNATURE: u32 = 0x0123_BABE;

/// Current format major version.
pub const MAJOR_VERSION: u8 = 6;

/// Current format minor version.
pub const MINOR_VERSION: u8 = 0;

/// Oldest major version the engine can still read.
pub const OLDEST_READABLE_MAJOR: u8 = 2;

const FLAG_ENCRYPTED: u32 = 0x1;
const FIELD_FLAG_AUTOINC: i32 = 0x1;
const FIELD_FLAG_ARRAY: i32 = 0x2;

/// Parsed header state, kept in memory while the database is open.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Header {
    pub major: u8,
    pub minor: u8,
    pub encrypted: bool,
    pub num_records: u32,
    pub num_deleted: u32,
    pub index_start: u32,
    pub user_version: f32,
}

/// File positions captured while reading or writing the header, used for
/// in-place counter patches.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    /// Offset of `num_records` (H).
    pub counters_pos: u64,
    /// Whether the counters block includes the `user_version` float.
    pub has_user_version: bool,
    /// `(ordinal, file offset of cur_autoinc)` per autoinc field.
    pub autoinc_pos: Vec<(usize, u64)>,
    /// First byte past the schema descriptor; records start here.
    pub data_start: u64,
}

/// Writes a complete current-version header + schema descriptor at offset 0.
pub(crate) fn write_full_header(
    backing: &mut dyn Backing,
    header: &Header,
    schema: &Schema,
) -> Result<Layout, DbError> {
    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(&SIGNATURE.to_le_bytes());
    buf.push(MAJOR_VERSION);
    buf.push(MINOR_VERSION);
    let flags = if header.encrypted { FLAG_ENCRYPTED } else { 0 };
    buf.extend_from_slice(&flags.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());

    let counters_pos = buf.len() as u64;
    buf.extend_from_slice(&header.num_records.to_le_bytes());
    buf.extend_from_slice(&header.num_deleted.to_le_bytes());
    buf.extend_from_slice(&header.index_start.to_le_bytes());
    buf.extend_from_slice(&header.user_version.to_le_bytes());

    let pk_name = schema.primary_key().map_or("", |f| f.name.as_str());
    write_string(&mut buf, pk_name);
    buf.extend_from_slice(&(schema.len() as i32).to_le_bytes());

    let mut autoinc_pos = Vec::new();
    for field in schema.fields() {
        write_string(&mut buf, &field.name);
        buf.extend_from_slice(&field.data_type.code().to_le_bytes());
        let mut flags = 0i32;
        if field.is_autoinc() {
            flags |= FIELD_FLAG_AUTOINC;
        }
        if field.array {
            flags |= FIELD_FLAG_ARRAY;
        }
        buf.extend_from_slice(&flags.to_le_bytes());
        if let (Some(start), Some(current)) = (field.autoinc_start, field.autoinc_current) {
            buf.extend_from_slice(&start.to_le_bytes());
            autoinc_pos.push((field.ordinal, buf.len() as u64));
            buf.extend_from_slice(&current.to_le_bytes());
        }
        write_string(&mut buf, field.comment.as_deref().unwrap_or(""));
    }

    let data_start = buf.len() as u64;
    backing.seek(0)?;
    backing.write_all(&buf)?;

    tracing::debug!(
        fields = schema.len(),
        data_start,
        encrypted = header.encrypted,
        "wrote header and schema descriptor"
    );

    Ok(Layout {
        counters_pos,
        has_user_version: true,
        autoinc_pos,
        data_start,
    })
}

/// Reads and validates the header + schema descriptor at offset 0.
pub(crate) fn read_header(
    backing: &mut dyn Backing,
) -> Result<(Header, Schema, Layout), DbError> {
    backing.seek(0)?;
    let found = backing.read_u32()?;
    if found != SIGNATURE {
        return Err(DbError::InvalidSignature { found });
    }

    let major = backing.read_u8()?;
    let minor = backing.read_u8()?;
    if major > MAJOR_VERSION {
        return Err(DbError::UnsupportedNewerVersion { major });
    }
    if major < OLDEST_READABLE_MAJOR {
        return Err(DbError::corrupted(format!(
            "major version {major} predates the readable range"
        )));
    }

    let mut encrypted = false;
    if major >= 6 {
        let flags = backing.read_u32()?;
        encrypted = flags & FLAG_ENCRYPTED != 0;
        let _reserved = backing.read_u32()?;
    }

    let counters_pos = backing.position()?;
    let num_records = backing.read_u32()?;
    let num_deleted = backing.read_u32()?;
    let index_start = backing.read_u32()?;
    let has_user_version = major >= 3;
    let user_version = if has_user_version {
        backing.read_f32()?
    } else {
        0.0
    };

    let pk_name = backing.read_string()?;
    let field_count = backing.read_i32()?;
    if field_count < 0 {
        return Err(DbError::corrupted("negative field count"));
    }

    let mut fields = Vec::with_capacity(field_count as usize);
    let mut autoinc_pos = Vec::new();
    for ordinal in 0..field_count as usize {
        let name = backing.read_string()?;
        let code = backing.read_i16()?;
        let data_type = DataType::from_code(code)
            .ok_or_else(|| DbError::corrupted(format!("unknown field type code {code}")))?;
        let flags = backing.read_i32()?;

        let mut field = FieldDef::new(name, data_type);
        field.ordinal = ordinal;
        field.array = flags & FIELD_FLAG_ARRAY != 0;
        field.primary_key = !pk_name.is_empty() && field.is_named(&pk_name);
        if flags & FIELD_FLAG_AUTOINC != 0 {
            field.autoinc_start = Some(backing.read_i32()?);
            autoinc_pos.push((ordinal, backing.position()?));
            field.autoinc_current = Some(backing.read_i32()?);
        }
        if major >= 2 {
            let comment = backing.read_string()?;
            field.comment = (!comment.is_empty()).then_some(comment);
        }
        fields.push(field);
    }

    let data_start = backing.position()?;
    let header = Header {
        major,
        minor,
        encrypted,
        num_records,
        num_deleted,
        index_start,
        user_version,
    };
    Ok((
        header,
        Schema::new(fields),
        Layout {
            counters_pos,
            has_user_version,
            autoinc_pos,
            data_start,
        },
    ))
}

/// Patches the counter block (and user_version when present) in place.
pub(crate) fn write_counters(
    backing: &mut dyn Backing,
    layout: &Layout,
    header: &Header,
) -> Result<(), DbError> {
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&header.num_records.to_le_bytes());
    buf.extend_from_slice(&header.num_deleted.to_le_bytes());
    buf.extend_from_slice(&header.index_start.to_le_bytes());
    if layout.has_user_version {
        buf.extend_from_slice(&header.user_version.to_le_bytes());
    }
    backing.seek(layout.counters_pos)?;
    backing.write_all(&buf)
}

/// Patches one autoinc `cur_autoinc` cell in place.
pub(crate) fn write_autoinc(
    backing: &mut dyn Backing,
    pos: u64,
    value: i32,
) -> Result<(), DbError> {
    backing.seek(pos)?;
    backing.write_all(&value.to_le_bytes())
}
