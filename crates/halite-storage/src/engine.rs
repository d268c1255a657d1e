//! The storage engine.
//!
//! [`Engine`] owns the backing store and all in-memory state for one open
//! database: parsed header, schema, live index, free-list, user blob,
//! cursor, and the optional transaction snapshot. Every public operation
//! runs to completion; the thin handle crate serialises callers with a
//! mutex around the whole engine.
//!
//! # Mutation discipline
//!
//! Record bytes are written first, then in-memory state is updated, then
//! the counters and index tail are persisted. If persisting fails, the
//! in-memory counters and arrays are restored to their pre-mutation state
//! so a later retry sees consistent state.
//!
//! # Cursor invalidation
//!
//! The iterator cursor is a raw position into the live index; any mutation
//! clears it, so `current` after a mutation fails until `move_first` runs
//! again.

use std::sync::Arc;

use halite_filter::{CompiledFilter, Expr, parse};
use halite_types::{DataType, FieldDef, Record, Schema, Table, TypeError, Value};

use crate::backing::{Backing, FileBacking, MemoryBacking};
use crate::cipher::Cipher;
use crate::error::DbError;
use crate::header::{
    Header, Layout, MAJOR_VERSION, MINOR_VERSION, read_header, write_autoinc, write_counters,
    write_full_header,
};
use crate::index::{FreeList, LiveIndex, read_tail, write_tail};
use crate::record::{
    encode_payload, read_frame, read_key, read_size, seal_payload, tombstone_frame, write_frame,
};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Flush the backing store after every mutation.
    pub auto_flush: bool,
    /// Run compaction when `num_deleted` exceeds this after a mutation.
    /// `None` disables auto-clean.
    pub auto_clean_threshold: Option<u32>,
    /// Reject all mutations.
    pub read_only: bool,
}

impl DbConfig {
    /// Defaults: auto-flush on, auto-clean off, writable.
    pub fn new() -> Self {
        Self {
            auto_flush: true,
            auto_clean_threshold: None,
            read_only: false,
        }
    }

    /// Sets the auto-flush behaviour.
    pub fn with_auto_flush(mut self, auto_flush: bool) -> Self {
        self.auto_flush = auto_flush;
        self
    }

    /// Enables auto-clean past `threshold` tombstones.
    pub fn with_auto_clean(mut self, threshold: u32) -> Self {
        self.auto_clean_threshold = Some(threshold);
        self
    }

    /// Opens the database read-only.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Pre-mutation state for rollback on a failed persist.
struct Undo {
    header: Header,
    live: LiveIndex,
    free: FreeList,
    schema: Schema,
}

/// A single open database.
pub struct Engine {
    pub(crate) backing: Box<dyn Backing>,
    pub(crate) cipher: Option<Arc<dyn Cipher>>,
    pub(crate) config: DbConfig,
    pub(crate) header: Header,
    pub(crate) schema: Schema,
    pub(crate) layout: Layout,
    pub(crate) live: LiveIndex,
    pub(crate) free: FreeList,
    pub(crate) user_data: Option<Value>,
    cursor: Option<usize>,
    snapshot: Option<Vec<u8>>,
    autoinc_suspended: bool,
    /// Older-major databases open read-only until `upgrade` runs.
    pub(crate) version_read_only: bool,
}

impl Engine {
    // ======================================================================
    // Construction
    // ======================================================================

    /// Creates a new database in `backing` with the given schema.
    pub fn create(
        mut backing: Box<dyn Backing>,
        fields: Vec<FieldDef>,
        cipher: Option<Arc<dyn Cipher>>,
        config: DbConfig,
    ) -> Result<Self, DbError> {
        if !backing.writable() || config.read_only {
            return Err(DbError::StreamMustBeWritable);
        }
        let schema = validate_new_schema(fields)?;

        backing.truncate(0)?;
        let mut hdr = Header {
            major: MAJOR_VERSION,
            minor: MINOR_VERSION,
            encrypted: cipher.is_some(),
            num_records: 0,
            num_deleted: 0,
            index_start: 0,
            user_version: 0.0,
        };
        let layout = write_full_header(backing.as_mut(), &hdr, &schema)?;
        hdr.index_start = layout.data_start as u32;
        write_counters(backing.as_mut(), &layout, &hdr)?;
        backing.flush()?;

        tracing::info!(
            fields = schema.len(),
            encrypted = hdr.encrypted,
            "created database"
        );

        Ok(Self {
            backing,
            cipher,
            config,
            header: hdr,
            schema,
            layout,
            live: LiveIndex::new(),
            free: FreeList::new(),
            user_data: None,
            cursor: None,
            snapshot: None,
            autoinc_suspended: false,
            version_read_only: false,
        })
    }

    /// Opens an existing database from `backing`.
    pub fn open(
        mut backing: Box<dyn Backing>,
        cipher: Option<Arc<dyn Cipher>>,
        config: DbConfig,
    ) -> Result<Self, DbError> {
        let (hdr, schema, layout) = read_header(backing.as_mut())?;

        if hdr.encrypted && cipher.is_none() {
            return Err(DbError::DbIsEncrypted);
        }
        if !hdr.encrypted && cipher.is_some() {
            return Err(DbError::CipherMismatch);
        }

        let (live, free, user_data) = read_tail(
            backing.as_mut(),
            hdr.index_start,
            hdr.num_records,
            hdr.num_deleted,
        )?;

        let version_read_only = hdr.major < MAJOR_VERSION;
        if version_read_only {
            tracing::warn!(
                major = hdr.major,
                minor = hdr.minor,
                "older-format database opened read-only; run upgrade to mutate"
            );
        }
        tracing::info!(
            records = hdr.num_records,
            deleted = hdr.num_deleted,
            encrypted = hdr.encrypted,
            "opened database"
        );

        Ok(Self {
            backing,
            cipher,
            config,
            header: hdr,
            schema,
            layout,
            live,
            free,
            user_data,
            cursor: None,
            snapshot: None,
            autoinc_suspended: false,
            version_read_only,
        })
    }

    /// Creates a file-backed database at `path`.
    pub fn create_file(
        path: impl AsRef<std::path::Path>,
        fields: Vec<FieldDef>,
        cipher: Option<Arc<dyn Cipher>>,
        config: DbConfig,
    ) -> Result<Self, DbError> {
        if path.as_ref().as_os_str().is_empty() {
            return Err(DbError::EmptyFilename);
        }
        Self::create(Box::new(FileBacking::create(path)?), fields, cipher, config)
    }

    /// Opens a file-backed database at `path`.
    pub fn open_file(
        path: impl AsRef<std::path::Path>,
        cipher: Option<Arc<dyn Cipher>>,
        config: DbConfig,
    ) -> Result<Self, DbError> {
        if path.as_ref().as_os_str().is_empty() {
            return Err(DbError::EmptyFilename);
        }
        let backing = FileBacking::open(path, config.read_only)?;
        Self::open(Box::new(backing), cipher, config)
    }

    /// Creates an in-memory database.
    pub fn create_memory(
        fields: Vec<FieldDef>,
        cipher: Option<Arc<dyn Cipher>>,
        config: DbConfig,
    ) -> Result<Self, DbError> {
        Self::create(Box::new(MemoryBacking::new()), fields, cipher, config)
    }

    /// Flushes and closes the database.
    pub fn close(mut self) -> Result<(), DbError> {
        self.backing.flush()
    }

    // ======================================================================
    // Accessors
    // ======================================================================

    /// Number of live records.
    pub fn num_records(&self) -> usize {
        self.live.len()
    }

    /// Number of tombstoned records awaiting cleanup.
    pub fn num_deleted(&self) -> usize {
        self.free.len()
    }

    /// The table schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Whether records are stored encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.header.encrypted
    }

    /// Whether any mutation would be rejected.
    pub fn is_read_only(&self) -> bool {
        self.config.read_only || self.version_read_only || !self.backing.writable()
    }

    /// Format version of the open file as `(major, minor)`.
    pub fn version(&self) -> (u8, u8) {
        (self.header.major, self.header.minor)
    }

    /// The caller-owned version float stored in the header.
    pub fn user_version(&self) -> f32 {
        self.header.user_version
    }

    /// Stores the caller-owned version float.
    pub fn set_user_version(&mut self, version: f32) -> Result<(), DbError> {
        self.ensure_writable()?;
        self.header.user_version = version;
        write_counters(self.backing.as_mut(), &self.layout, &self.header)?;
        self.flush_if_auto()
    }

    /// The user blob stored after the index, if any.
    pub fn user_data(&self) -> Option<&Value> {
        self.user_data.as_ref()
    }

    /// Stores (or clears) the user blob. Only String and Byte-array values
    /// are accepted.
    pub fn set_user_data(&mut self, value: Option<Value>) -> Result<(), DbError> {
        self.ensure_writable()?;
        if let Some(v) = &value {
            let ok = matches!(v, Value::String(_)) || v.as_byte_array().is_some();
            if !ok {
                return Err(DbError::InvalidMetaDataType);
            }
        }
        self.user_data = value;
        self.persist_tail()?;
        self.flush_if_auto()
    }

    /// Suspends or resumes autoincrement assignment.
    ///
    /// While suspended, `add` uses caller-supplied key values verbatim and
    /// leaves the counters untouched.
    pub fn set_autoinc_suspended(&mut self, suspended: bool) {
        self.autoinc_suspended = suspended;
    }

    /// Runs caller data through the configured record cipher.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, DbError> {
        match &self.cipher {
            Some(cipher) => Ok(cipher.encrypt(data)),
            None => Err(DbError::NoEncryptor),
        }
    }

    /// Reverses [`Engine::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, DbError> {
        match &self.cipher {
            Some(cipher) => Ok(cipher.decrypt(data)?),
            None => Err(DbError::NoEncryptor),
        }
    }

    /// Flushes buffered writes to the backing store.
    pub fn flush(&mut self) -> Result<(), DbError> {
        self.backing.flush()
    }

    // ======================================================================
    // Add
    // ======================================================================

    /// Adds a record, returning its position in the live index.
    ///
    /// The position is volatile: any later mutation may shift it.
    pub fn add(&mut self, input: &Record) -> Result<usize, DbError> {
        self.ensure_writable()?;
        let mut values = self.normalize(input, None)?;

        // Autoincrement fill. Counters advance only on success, below.
        let mut consumed_autoinc: Vec<(usize, i32)> = Vec::new();
        if !self.autoinc_suspended {
            for field in self.schema.fields() {
                if let Some(current) = field.autoinc_current {
                    values[field.ordinal] = Value::Int32(current);
                    consumed_autoinc.push((field.ordinal, current));
                }
            }
        }

        // Primary-key position (and duplicate check).
        let insert_pos = if self.schema.primary_key().is_some() {
            if values[0].is_null() {
                return Err(DbError::MissingPrimaryKey);
            }
            match self.key_search(&values[0])? {
                Ok(_) => {
                    return Err(DbError::DuplicatePrimaryKey {
                        key: values[0].to_string(),
                    });
                }
                Err(pos) => pos,
            }
        } else {
            self.live.len()
        };

        let payload = encode_payload(&self.schema, &values)?;
        let sealed = seal_payload(payload, self.cipher.as_deref());

        let undo = self.begin_undo();
        let result = self.commit_add(insert_pos, &sealed, &consumed_autoinc);
        if let Err(e) = result {
            self.apply_undo(undo);
            return Err(e);
        }
        self.cursor = None;
        self.maybe_auto_clean()?;
        Ok(insert_pos)
    }

    fn commit_add(
        &mut self,
        insert_pos: usize,
        sealed: &[u8],
        consumed_autoinc: &[(usize, i32)],
    ) -> Result<(), DbError> {
        let offset = self.place_record(sealed)?;
        self.live.insert(insert_pos, offset);
        self.header.num_records += 1;

        for &(ordinal, used) in consumed_autoinc {
            self.schema.fields_mut()[ordinal].autoinc_current = Some(used + 1);
        }
        self.persist_counters()?;
        self.persist_tail()?;
        self.flush_if_auto()
    }

    /// Writes a sealed payload into a first-fit free slot or appends it.
    fn place_record(&mut self, sealed: &[u8]) -> Result<u32, DbError> {
        let needed = sealed.len() as u32;
        for (i, offset) in self.free.iter().enumerate().collect::<Vec<_>>() {
            let stored = read_size(self.backing.as_mut(), u64::from(offset))?;
            if stored >= 0 {
                return Err(DbError::corrupted(
                    "free list references a live record",
                ));
            }
            if stored.unsigned_abs() >= needed {
                write_frame(self.backing.as_mut(), u64::from(offset), sealed)?;
                self.free.remove(i);
                self.header.num_deleted -= 1;
                return Ok(offset);
            }
        }

        let offset = self.header.index_start;
        write_frame(self.backing.as_mut(), u64::from(offset), sealed)?;
        self.header.index_start = offset + 4 + needed;
        Ok(offset)
    }

    // ======================================================================
    // Lookup and queries
    // ======================================================================

    /// Position of the live record holding `key`, if any.
    pub fn position_of_key(&mut self, key: &Value) -> Result<Option<usize>, DbError> {
        let key = self.coerce_key(key)?;
        Ok(self.key_search(&key)?.ok())
    }

    /// Fetches a record by primary key. `None` when no live record has it.
    pub fn get_by_key(
        &mut self,
        key: &Value,
        fields: Option<&[&str]>,
        include_index: bool,
    ) -> Result<Option<Record>, DbError> {
        let key = self.coerce_key(key)?;
        match self.key_search(&key)? {
            Ok(pos) => self.get_by_index(pos, fields, include_index).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Fetches a record by its position in the live index.
    pub fn get_by_index(
        &mut self,
        pos: usize,
        fields: Option<&[&str]>,
        include_index: bool,
    ) -> Result<Record, DbError> {
        let offset = self.live.get(pos).ok_or(DbError::IndexOutOfRange {
            index: pos,
            len: self.live.len(),
        })?;
        let values = self.decode_live(offset)?;
        self.project(&values, pos, fields, include_index)
    }

    /// Returns all live records, optionally projected and sorted.
    pub fn select_all(
        &mut self,
        fields: Option<&[&str]>,
        order_by: Option<&[&str]>,
        include_index: bool,
    ) -> Result<Table, DbError> {
        self.select_internal(None, fields, order_by, include_index)
    }

    /// Returns live records matching a filter string.
    pub fn select_where(
        &mut self,
        filter: &str,
        fields: Option<&[&str]>,
        order_by: Option<&[&str]>,
        include_index: bool,
    ) -> Result<Table, DbError> {
        let expr = parse(filter)?;
        self.select_where_expr(&expr, fields, order_by, include_index)
    }

    /// Returns live records matching a pre-built filter expression.
    pub fn select_where_expr(
        &mut self,
        filter: &Expr,
        fields: Option<&[&str]>,
        order_by: Option<&[&str]>,
        include_index: bool,
    ) -> Result<Table, DbError> {
        let compiled = CompiledFilter::compile(filter, &self.schema)?;
        self.select_internal(Some(&compiled), fields, order_by, include_index)
    }

    fn select_internal(
        &mut self,
        filter: Option<&CompiledFilter>,
        fields: Option<&[&str]>,
        order_by: Option<&[&str]>,
        include_index: bool,
    ) -> Result<Table, DbError> {
        let mut rows: Vec<(usize, Vec<Value>)> = Vec::new();
        for pos in 0..self.live.len() {
            let offset = self.live.get(pos).expect("pos < len");
            let values = self.decode_live(offset)?;
            if filter.is_none_or(|f| f.matches(&values)) {
                rows.push((pos, values));
            }
        }

        if let Some(order_by) = order_by {
            let keys = self.parse_order_by(order_by)?;
            rows.sort_by(|(_, a), (_, b)| {
                for key in &keys {
                    let ordering = key.compare(&a[key.ordinal], &b[key.ordinal]);
                    if ordering != std::cmp::Ordering::Equal {
                        return ordering;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        rows.into_iter()
            .map(|(pos, values)| self.project(&values, pos, fields, include_index))
            .collect()
    }

    /// Evaluates a filter and returns matching live-index positions.
    pub fn positions_where(&mut self, filter: &Expr) -> Result<Vec<usize>, DbError> {
        let compiled = CompiledFilter::compile(filter, &self.schema)?;
        let mut positions = Vec::new();
        for pos in 0..self.live.len() {
            let offset = self.live.get(pos).expect("pos < len");
            if compiled.matches(&self.decode_live(offset)?) {
                positions.push(pos);
            }
        }
        Ok(positions)
    }

    // ======================================================================
    // Update
    // ======================================================================

    /// Updates the record with the given key. Partial input merges over the
    /// stored record. Returns the record's (possibly moved) position.
    pub fn update_by_key(&mut self, key: &Value, input: &Record) -> Result<usize, DbError> {
        let key = self.coerce_key(key)?;
        let pos = self
            .key_search(&key)?
            .map_err(|_| DbError::PrimaryKeyValueNotFound)?;
        self.update_at(pos, input)
    }

    /// Updates the record at a live-index position.
    pub fn update_by_index(&mut self, pos: usize, input: &Record) -> Result<usize, DbError> {
        if pos >= self.live.len() {
            return Err(DbError::IndexOutOfRange {
                index: pos,
                len: self.live.len(),
            });
        }
        self.update_at(pos, input)
    }

    /// Updates every record matching the filter. Returns the match count.
    pub fn update_where(&mut self, filter: &str, input: &Record) -> Result<usize, DbError> {
        let expr = parse(filter)?;
        self.update_where_expr(&expr, input)
    }

    /// Updates every record matching a pre-built expression.
    pub fn update_where_expr(&mut self, filter: &Expr, input: &Record) -> Result<usize, DbError> {
        self.ensure_writable()?;
        // Track matches by offset: updates may reorder the live index.
        let offsets: Vec<u32> = self
            .positions_where(filter)?
            .into_iter()
            .map(|pos| self.live.get(pos).expect("filter position valid"))
            .collect();
        let count = offsets.len();
        for offset in offsets {
            let pos = self
                .live
                .position_of(offset)
                .ok_or_else(|| DbError::corrupted("record vanished during update"))?;
            self.update_at(pos, input)?;
        }
        Ok(count)
    }

    fn update_at(&mut self, pos: usize, input: &Record) -> Result<usize, DbError> {
        self.ensure_writable()?;
        let offset = self.live.get(pos).ok_or(DbError::IndexOutOfRange {
            index: pos,
            len: self.live.len(),
        })?;

        let old = read_frame(
            self.backing.as_mut(),
            u64::from(offset),
            &self.schema,
            self.cipher.as_deref(),
        )?;
        if old.tombstone {
            return Err(DbError::corrupted("live index references a tombstone"));
        }

        let merged = self.normalize(input, Some(&old.values))?;

        // A changed primary key must stay unique and re-sorts the index.
        let key_changed = self.schema.primary_key().is_some() && merged[0] != old.values[0];
        if key_changed {
            if merged[0].is_null() {
                return Err(DbError::MissingPrimaryKey);
            }
            if self.key_search(&merged[0])?.is_ok() {
                return Err(DbError::DuplicatePrimaryKey {
                    key: merged[0].to_string(),
                });
            }
        }

        let payload = encode_payload(&self.schema, &merged)?;
        let sealed = seal_payload(payload, self.cipher.as_deref());

        let undo = self.begin_undo();
        let result = self.commit_update(pos, offset, old.size, &sealed, key_changed, &merged);
        let final_pos = match result {
            Ok(p) => p,
            Err(e) => {
                self.apply_undo(undo);
                return Err(e);
            }
        };
        self.cursor = None;
        self.maybe_auto_clean()?;
        Ok(final_pos)
    }

    fn commit_update(
        &mut self,
        pos: usize,
        offset: u32,
        old_size: u32,
        sealed: &[u8],
        key_changed: bool,
        merged: &[Value],
    ) -> Result<usize, DbError> {
        let new_size = sealed.len() as u32;
        if new_size <= old_size {
            write_frame(self.backing.as_mut(), u64::from(offset), sealed)?;
        } else {
            // Relocate: tombstone the old slot, place the new payload.
            let new_offset = self.place_record(sealed)?;
            tombstone_frame(self.backing.as_mut(), u64::from(offset))?;
            self.free.push(offset);
            self.header.num_deleted += 1;
            self.live.set(pos, new_offset);
        }

        let mut final_pos = pos;
        if key_changed {
            // Re-anchor the entry at its new sort position.
            let moved = self.live.remove(pos);
            let insert_pos = match self.key_search(&merged[0])? {
                Ok(_) => {
                    return Err(DbError::corrupted(
                        "duplicate key surfaced during reposition",
                    ));
                }
                Err(p) => p,
            };
            self.live.insert(insert_pos, moved);
            final_pos = insert_pos;
        }

        self.persist_counters()?;
        self.persist_tail()?;
        self.flush_if_auto()?;
        Ok(final_pos)
    }

    // ======================================================================
    // Delete
    // ======================================================================

    /// Deletes the record with the given key. Returns whether one existed.
    pub fn delete_by_key(&mut self, key: &Value) -> Result<bool, DbError> {
        self.ensure_writable()?;
        let key = self.coerce_key(key)?;
        match self.key_search(&key)? {
            Ok(pos) => {
                self.delete_at(pos)?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Deletes the record at a live-index position.
    pub fn delete_by_index(&mut self, pos: usize) -> Result<bool, DbError> {
        self.ensure_writable()?;
        if pos >= self.live.len() {
            return Err(DbError::IndexOutOfRange {
                index: pos,
                len: self.live.len(),
            });
        }
        self.delete_at(pos)?;
        Ok(true)
    }

    /// Deletes every record matching the filter. Returns the count.
    pub fn delete_where(&mut self, filter: &str) -> Result<usize, DbError> {
        let expr = parse(filter)?;
        self.delete_where_expr(&expr)
    }

    /// Deletes every record matching a pre-built expression.
    pub fn delete_where_expr(&mut self, filter: &Expr) -> Result<usize, DbError> {
        self.ensure_writable()?;
        let offsets: Vec<u32> = self
            .positions_where(filter)?
            .into_iter()
            .map(|pos| self.live.get(pos).expect("filter position valid"))
            .collect();
        let count = offsets.len();
        for offset in offsets {
            let pos = self
                .live
                .position_of(offset)
                .ok_or_else(|| DbError::corrupted("record vanished during delete"))?;
            self.delete_at(pos)?;
        }
        Ok(count)
    }

    /// Tombstones every live record. Returns the count.
    pub fn delete_all(&mut self) -> Result<usize, DbError> {
        self.ensure_writable()?;
        let count = self.live.len();

        let undo = self.begin_undo();
        let result = (|| -> Result<(), DbError> {
            while !self.live.is_empty() {
                let offset = self.live.remove(self.live.len() - 1);
                tombstone_frame(self.backing.as_mut(), u64::from(offset))?;
                self.free.push(offset);
                self.header.num_records -= 1;
                self.header.num_deleted += 1;
            }
            self.persist_counters()?;
            self.persist_tail()?;
            self.flush_if_auto()
        })();
        if let Err(e) = result {
            self.apply_undo(undo);
            return Err(e);
        }
        self.cursor = None;
        self.maybe_auto_clean()?;
        Ok(count)
    }

    fn delete_at(&mut self, pos: usize) -> Result<(), DbError> {
        let undo = self.begin_undo();
        let result = (|| -> Result<(), DbError> {
            let offset = self.live.remove(pos);
            tombstone_frame(self.backing.as_mut(), u64::from(offset))?;
            self.free.push(offset);
            self.header.num_records -= 1;
            self.header.num_deleted += 1;
            self.persist_counters()?;
            self.persist_tail()?;
            self.flush_if_auto()
        })();
        if let Err(e) = result {
            self.apply_undo(undo);
            return Err(e);
        }
        self.cursor = None;
        self.maybe_auto_clean()
    }

    // ======================================================================
    // Cursor
    // ======================================================================

    /// Positions the cursor on the first record. Returns whether one exists.
    pub fn move_first(&mut self) -> bool {
        if self.live.is_empty() {
            self.cursor = None;
            false
        } else {
            self.cursor = Some(0);
            true
        }
    }

    /// Advances the cursor. Returns `true` while it remains in range.
    pub fn move_next(&mut self) -> bool {
        match self.cursor {
            Some(pos) if pos + 1 < self.live.len() => {
                self.cursor = Some(pos + 1);
                true
            }
            Some(_) => {
                self.cursor = Some(self.live.len());
                false
            }
            None => false,
        }
    }

    /// Decodes the record under the cursor.
    pub fn current(
        &mut self,
        fields: Option<&[&str]>,
        include_index: bool,
    ) -> Result<Record, DbError> {
        if self.live.is_empty() {
            return Err(DbError::DatabaseEmpty);
        }
        let pos = self.cursor.ok_or(DbError::IteratorPastEndOfFile)?;
        if pos >= self.live.len() {
            return Err(DbError::IteratorPastEndOfFile);
        }
        self.get_by_index(pos, fields, include_index)
    }

    // ======================================================================
    // Transactions
    // ======================================================================

    /// Snapshots the entire backing store. Nested transactions fail.
    pub fn begin_trans(&mut self) -> Result<(), DbError> {
        if self.snapshot.is_some() {
            return Err(DbError::TransactionAlreadyActive);
        }
        self.backing.flush()?;
        self.snapshot = Some(self.backing.read_all()?);
        tracing::debug!("transaction snapshot taken");
        Ok(())
    }

    /// Discards the snapshot, keeping all changes since `begin_trans`.
    pub fn commit_trans(&mut self) -> Result<(), DbError> {
        if self.snapshot.take().is_none() {
            return Err(DbError::NoCurrentTransaction);
        }
        tracing::debug!("transaction committed");
        Ok(())
    }

    /// Restores the snapshot, discarding all changes since `begin_trans`.
    pub fn rollback_trans(&mut self) -> Result<(), DbError> {
        let snapshot = self.snapshot.take().ok_or(DbError::NoCurrentTransaction)?;
        self.backing.replace_all(&snapshot)?;
        self.reload_state()?;
        tracing::info!("transaction rolled back");
        Ok(())
    }

    /// Whether a transaction is active.
    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    // ======================================================================
    // Reindex
    // ======================================================================

    /// Rebuilds the live index and free-list by scanning the data region.
    pub fn reindex(&mut self) -> Result<(), DbError> {
        self.ensure_writable()?;

        let mut live_offsets: Vec<(Option<Value>, u32)> = Vec::new();
        let mut free = FreeList::new();
        let mut pos = self.layout.data_start;
        let end = u64::from(self.header.index_start);
        let keyed = self.schema.primary_key().is_some();

        while pos + 4 <= end {
            let size = read_size(self.backing.as_mut(), pos)?;
            let offset = pos as u32;
            if size < 0 {
                free.push(offset);
            } else {
                let key = if keyed {
                    Some(read_key(
                        self.backing.as_mut(),
                        pos,
                        &self.schema,
                        self.cipher.as_deref(),
                    )?)
                } else {
                    None
                };
                live_offsets.push((key, offset));
            }
            pos += 4 + u64::from(size.unsigned_abs());
        }

        if keyed {
            live_offsets.sort_by(|(a, _), (b, _)| {
                a.as_ref()
                    .zip(b.as_ref())
                    .and_then(|(a, b)| a.compare(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let rebuilt_live = live_offsets.len();
        let rebuilt_free = free.len();
        if rebuilt_live != self.live.len() || rebuilt_free != self.free.len() {
            tracing::warn!(
                live_before = self.live.len(),
                live_after = rebuilt_live,
                free_before = self.free.len(),
                free_after = rebuilt_free,
                "reindex corrected the index tail"
            );
        }

        self.live = LiveIndex::from_offsets(
            live_offsets.into_iter().map(|(_, offset)| offset).collect(),
        );
        self.free = free;
        self.header.num_records = rebuilt_live as u32;
        self.header.num_deleted = rebuilt_free as u32;
        self.cursor = None;

        self.persist_counters()?;
        self.persist_tail()?;
        self.flush()
    }

    // ======================================================================
    // Internals
    // ======================================================================

    pub(crate) fn ensure_writable(&self) -> Result<(), DbError> {
        if self.is_read_only() {
            return Err(DbError::DatabaseReadOnlyMode);
        }
        Ok(())
    }

    /// Validates a caller record against the schema and produces the full
    /// ordinal-ordered value vector. `base` supplies values for fields the
    /// input omits (partial update); without it omitted fields are null.
    fn normalize(
        &self,
        input: &Record,
        base: Option<&[Value]>,
    ) -> Result<Vec<Value>, DbError> {
        let mut values: Vec<Value> = match base {
            Some(base) => base.to_vec(),
            None => vec![Value::Null; self.schema.len()],
        };

        for (name, value) in input.iter() {
            let ordinal = self
                .schema
                .ordinal_of(name)
                .ok_or_else(|| DbError::InvalidFieldName {
                    name: name.to_string(),
                })?;
            let field = &self.schema.fields()[ordinal];
            values[ordinal] = self.convert_for_field(field, value)?;
        }
        Ok(values)
    }

    pub(crate) fn convert_for_field(&self, field: &FieldDef, value: &Value) -> Result<Value, DbError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        if field.array {
            return match value {
                Value::Array(arr) if arr.element_type() == field.data_type => Ok(value.clone()),
                Value::Array(_) => Err(TypeError::InvalidDataType {
                    field: field.name.clone(),
                    expected: field.data_type,
                    actual: value.to_string(),
                }
                .into()),
                _ => Err(TypeError::NonArrayValue {
                    field: field.name.clone(),
                }
                .into()),
            };
        }
        value
            .coerce_to(field.data_type)
            .map_err(|e| e.with_field(&field.name).into())
    }

    /// Coerces a lookup key to the primary-key field's type.
    fn coerce_key(&self, key: &Value) -> Result<Value, DbError> {
        let pk = self.schema.primary_key().ok_or(DbError::MissingPrimaryKey)?;
        if key.is_null() {
            return Err(DbError::MissingPrimaryKey);
        }
        if matches!(key, Value::Array(_)) {
            return Err(TypeError::InvalidKeyFieldType {
                actual: key.to_string(),
            }
            .into());
        }
        key.coerce_to(pk.data_type).map_err(|_| {
            TypeError::MismatchedKeyFieldTypes {
                expected: pk.data_type,
            }
            .into()
        })
    }

    /// Lower-bound binary search over the live index by primary key.
    ///
    /// `Ok(pos)` when a live record holds `key`; `Err(pos)` is the insert
    /// position that keeps the index sorted.
    fn key_search(&mut self, key: &Value) -> Result<Result<usize, usize>, DbError> {
        let mut lo = 0usize;
        let mut hi = self.live.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let offset = self.live.get(mid).expect("mid < len");
            let probe = read_key(
                self.backing.as_mut(),
                u64::from(offset),
                &self.schema,
                self.cipher.as_deref(),
            )?;
            match probe.compare(key) {
                Some(std::cmp::Ordering::Less) => lo = mid + 1,
                Some(std::cmp::Ordering::Greater) => hi = mid,
                Some(std::cmp::Ordering::Equal) => return Ok(Ok(mid)),
                None => {
                    return Err(TypeError::MismatchedKeyFieldTypes {
                        expected: self
                            .schema
                            .primary_key()
                            .map(|f| f.data_type)
                            .unwrap_or(DataType::Int32),
                    }
                    .into());
                }
            }
        }
        Ok(Err(lo))
    }

    /// Decodes the live record stored at `offset`.
    fn decode_live(&mut self, offset: u32) -> Result<Vec<Value>, DbError> {
        let frame = read_frame(
            self.backing.as_mut(),
            u64::from(offset),
            &self.schema,
            self.cipher.as_deref(),
        )?;
        if frame.tombstone {
            return Err(DbError::corrupted("live index references a tombstone"));
        }
        Ok(frame.values)
    }

    /// Builds an output record, applying projection and `include_index`.
    fn project(
        &self,
        values: &[Value],
        pos: usize,
        fields: Option<&[&str]>,
        include_index: bool,
    ) -> Result<Record, DbError> {
        let mut record = Record::new();
        match fields {
            None => {
                for (field, value) in self.schema.fields().iter().zip(values) {
                    record.set(field.name.clone(), value.clone());
                }
            }
            Some(names) => {
                for (i, name) in names.iter().enumerate() {
                    let ordinal = self.schema.ordinal_of(name).ok_or_else(|| {
                        DbError::InvalidFieldName {
                            name: (*name).to_string(),
                        }
                    })?;
                    if names[..i]
                        .iter()
                        .any(|prev| prev.eq_ignore_ascii_case(name))
                    {
                        return Err(DbError::FieldSpecifiedTwice {
                            name: (*name).to_string(),
                        });
                    }
                    let field = &self.schema.fields()[ordinal];
                    record.set(field.name.clone(), values[ordinal].clone());
                }
            }
        }
        if include_index {
            record.set("index", Value::Int32(pos as i32));
        }
        Ok(record)
    }

    /// Parses order-by names with their `!` (descending) and `~`
    /// (case-insensitive) prefixes.
    fn parse_order_by(&self, names: &[&str]) -> Result<Vec<OrderKey>, DbError> {
        let mut keys = Vec::with_capacity(names.len());
        for raw in names {
            let mut name = *raw;
            let mut descending = false;
            let mut case_insensitive = false;
            loop {
                if let Some(rest) = name.strip_prefix('!') {
                    descending = true;
                    name = rest;
                } else if let Some(rest) = name.strip_prefix('~') {
                    case_insensitive = true;
                    name = rest;
                } else {
                    break;
                }
            }
            let ordinal = self.schema.ordinal_of(name).ok_or_else(|| {
                DbError::InvalidOrderByFieldName {
                    name: name.to_string(),
                }
            })?;
            let field = &self.schema.fields()[ordinal];
            if field.array {
                return Err(DbError::CannotOrderByOnArrayField {
                    name: field.name.clone(),
                });
            }
            keys.push(OrderKey {
                ordinal,
                descending,
                case_insensitive,
            });
        }
        Ok(keys)
    }

    fn persist_counters(&mut self) -> Result<(), DbError> {
        debug_assert_eq!(self.header.num_records as usize, self.live.len());
        debug_assert_eq!(self.header.num_deleted as usize, self.free.len());
        write_counters(self.backing.as_mut(), &self.layout, &self.header)?;
        for &(ordinal, pos) in &self.layout.autoinc_pos {
            if let Some(current) = self.schema.fields()[ordinal].autoinc_current {
                write_autoinc(self.backing.as_mut(), pos, current)?;
            }
        }
        Ok(())
    }

    fn persist_tail(&mut self) -> Result<(), DbError> {
        write_tail(
            self.backing.as_mut(),
            self.header.index_start,
            &self.live,
            &self.free,
            self.user_data.as_ref(),
        )
    }

    fn flush_if_auto(&mut self) -> Result<(), DbError> {
        if self.config.auto_flush {
            self.backing.flush()?;
        }
        Ok(())
    }

    fn maybe_auto_clean(&mut self) -> Result<(), DbError> {
        if let Some(threshold) = self.config.auto_clean_threshold
            && self.header.num_deleted > threshold
        {
            tracing::info!(
                deleted = self.header.num_deleted,
                threshold,
                "auto-clean threshold exceeded"
            );
            self.clean()?;
        }
        Ok(())
    }

    fn begin_undo(&self) -> Undo {
        Undo {
            header: self.header,
            live: self.live.clone(),
            free: self.free.clone(),
            schema: self.schema.clone(),
        }
    }

    fn apply_undo(&mut self, undo: Undo) {
        self.header = undo.header;
        self.live = undo.live;
        self.free = undo.free;
        self.schema = undo.schema;
    }

    /// Re-reads all in-memory state from the backing store.
    ///
    /// Used after a rollback or a compaction swap.
    pub(crate) fn reload_state(&mut self) -> Result<(), DbError> {
        let (hdr, schema, layout) = read_header(self.backing.as_mut())?;
        let (live, free, user_data) = read_tail(
            self.backing.as_mut(),
            hdr.index_start,
            hdr.num_records,
            hdr.num_deleted,
        )?;
        self.header = hdr;
        self.schema = schema;
        self.layout = layout;
        self.live = live;
        self.free = free;
        self.user_data = user_data;
        self.cursor = None;
        self.version_read_only = hdr.major < MAJOR_VERSION;
        Ok(())
    }
}

struct OrderKey {
    ordinal: usize,
    descending: bool,
    case_insensitive: bool,
}

impl OrderKey {
    fn compare(&self, a: &Value, b: &Value) -> std::cmp::Ordering {
        let ordering = match (a, b) {
            (Value::String(a), Value::String(b)) if self.case_insensitive => {
                a.to_lowercase().cmp(&b.to_lowercase())
            }
            _ => a.compare(b).unwrap_or(std::cmp::Ordering::Equal),
        };
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

/// Validates a creation schema: moves the primary key to ordinal 0 and
/// assigns ordinals.
fn validate_new_schema(fields: Vec<FieldDef>) -> Result<Schema, DbError> {
    if fields.is_empty() {
        return Err(DbError::FieldListIsEmpty);
    }

    let mut key_count = 0usize;
    for (i, field) in fields.iter().enumerate() {
        if field.name.trim().is_empty() {
            return Err(DbError::FieldNameIsEmpty);
        }
        if fields[..i].iter().any(|prev| prev.is_named(&field.name)) {
            return Err(DbError::FieldNameAlreadyExists {
                name: field.name.clone(),
            });
        }
        if field.primary_key {
            key_count += 1;
            if key_count > 1 {
                return Err(DbError::DatabaseAlreadyHasPrimaryKey);
            }
            if !field.data_type.valid_primary_key() || field.array {
                return Err(DbError::InvalidPrimaryKeyType {
                    field: field.name.clone(),
                });
            }
        }
        if field.is_autoinc() && (field.data_type != DataType::Int32 || field.array) {
            return Err(DbError::InvalidTypeInSchema {
                field: field.name.clone(),
                reason: "autoincrement requires a non-array Int32 field".into(),
            });
        }
    }

    // Primary key first, everything else in declaration order.
    let mut ordered: Vec<FieldDef> = Vec::with_capacity(fields.len());
    let mut rest: Vec<FieldDef> = Vec::new();
    for mut field in fields {
        if field.autoinc_current.is_none() {
            field.autoinc_current = field.autoinc_start;
        }
        if field.primary_key {
            ordered.push(field);
        } else {
            rest.push(field);
        }
    }
    ordered.append(&mut rest);
    for (ordinal, field) in ordered.iter_mut().enumerate() {
        field.ordinal = ordinal;
    }
    Ok(Schema::new(ordered))
}
