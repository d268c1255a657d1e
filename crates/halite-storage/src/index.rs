//! Live index, free-list, and the persisted tail region.
//!
//! The engine keeps two in-memory arrays of file offsets:
//!
//! - [`LiveIndex`]: offsets of live records, sorted by primary key when the
//!   table has one, otherwise in insertion order.
//! - [`FreeList`]: offsets of tombstoned records, scanned first-fit when a
//!   new or relocated record needs a slot.
//!
//! Both are persisted after the data region, at `index_start_offset`:
//!
//! ```text
//! [live offsets: 4 * num_records][free offsets: 4 * num_deleted][user blob]
//! ```
//!
//! The optional user blob is `[type_code:i32][payload]` where the code is
//! the String or Byte type code; a Byte payload carries its own i32 count.
//! The tail is rewritten (and the file truncated to its end) whenever the
//! live index changes.

use halite_types::{ArrayValue, DataType, Value};

use crate::backing::{Backing, BackingExt};
use crate::codec::write_string;
use crate::error::DbError;

/// Offsets of live records, in primary-key order when a key exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LiveIndex {
    offsets: Vec<u32>,
}

impl LiveIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_offsets(offsets: Vec<u32>) -> Self {
        Self { offsets }
    }

    pub(crate) fn len(&self) -> usize {
        self.offsets.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub(crate) fn get(&self, pos: usize) -> Option<u32> {
        self.offsets.get(pos).copied()
    }

    /// Inserts `offset` at `pos`, keeping key order for keyed tables.
    pub(crate) fn insert(&mut self, pos: usize, offset: u32) {
        self.offsets.insert(pos, offset);
    }

    pub(crate) fn push(&mut self, offset: u32) {
        self.offsets.push(offset);
    }

    pub(crate) fn set(&mut self, pos: usize, offset: u32) {
        self.offsets[pos] = offset;
    }

    pub(crate) fn remove(&mut self, pos: usize) -> u32 {
        self.offsets.remove(pos)
    }

    pub(crate) fn position_of(&self, offset: u32) -> Option<usize> {
        self.offsets.iter().position(|&o| o == offset)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.offsets.iter().copied()
    }
}

/// Offsets of tombstoned records, first-fit candidates for reuse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FreeList {
    offsets: Vec<u32>,
}

impl FreeList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_offsets(offsets: Vec<u32>) -> Self {
        Self { offsets }
    }

    pub(crate) fn len(&self) -> usize {
        self.offsets.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub(crate) fn push(&mut self, offset: u32) {
        self.offsets.push(offset);
    }

    pub(crate) fn remove(&mut self, pos: usize) -> u32 {
        self.offsets.remove(pos)
    }

    pub(crate) fn clear(&mut self) {
        self.offsets.clear();
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.offsets.iter().copied()
    }
}

/// Persists the tail region and truncates the file after it.
pub(crate) fn write_tail(
    backing: &mut dyn Backing,
    index_start: u32,
    live: &LiveIndex,
    free: &FreeList,
    user_data: Option<&Value>,
) -> Result<(), DbError> {
    let mut buf = Vec::with_capacity(4 * (live.len() + free.len()) + 16);
    for offset in live.iter() {
        buf.extend_from_slice(&offset.to_le_bytes());
    }
    for offset in free.iter() {
        buf.extend_from_slice(&offset.to_le_bytes());
    }
    if let Some(value) = user_data {
        match value {
            Value::String(text) => {
                buf.extend_from_slice(&i32::from(DataType::String.code()).to_le_bytes());
                write_string(&mut buf, text);
            }
            Value::Array(ArrayValue::Byte(bytes)) => {
                buf.extend_from_slice(&i32::from(DataType::Byte.code()).to_le_bytes());
                buf.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
                buf.extend_from_slice(bytes);
            }
            _ => return Err(DbError::InvalidMetaDataType),
        }
    }

    backing.seek(u64::from(index_start))?;
    backing.write_all(&buf)?;
    let end = backing.position()?;
    backing.truncate(end)?;

    tracing::debug!(
        live = live.len(),
        free = free.len(),
        index_start,
        "rewrote index tail"
    );
    Ok(())
}

/// Loads the tail region using the header counters.
pub(crate) fn read_tail(
    backing: &mut dyn Backing,
    index_start: u32,
    num_records: u32,
    num_deleted: u32,
) -> Result<(LiveIndex, FreeList, Option<Value>), DbError> {
    backing.seek(u64::from(index_start))?;

    let mut live = Vec::with_capacity(num_records as usize);
    for _ in 0..num_records {
        live.push(backing.read_u32()?);
    }
    let mut free = Vec::with_capacity(num_deleted as usize);
    for _ in 0..num_deleted {
        free.push(backing.read_u32()?);
    }

    let user_data = if backing.position()? < backing.len()? {
        let tag = backing.read_i32()?;
        match DataType::from_code(tag as i16) {
            Some(DataType::String) => Some(Value::String(backing.read_string()?)),
            Some(DataType::Byte) => {
                let count = backing.read_i32()?;
                if count < 0 {
                    return Err(DbError::corrupted("negative user blob length"));
                }
                let bytes = backing.read_vec(count as usize)?;
                Some(Value::byte_array(bytes))
            }
            _ => return Err(DbError::corrupted(format!("bad user blob type tag {tag}"))),
        }
    } else {
        None
    };

    Ok((
        LiveIndex::from_offsets(live),
        FreeList::from_offsets(free),
        user_data,
    ))
}
