//! The mutex-guarded database handle.
//!
//! [`Halite`] wraps an [`Engine`] behind a process-level mutex: every public
//! operation locks for its whole duration, so operations are atomic with
//! respect to other holders of the handle. Event callbacks fire after
//! successful mutations; a panicking callback is swallowed with a warning
//! and never corrupts engine state.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use halite_storage::{Cipher, DbConfig, DbError, Engine};
use halite_types::{FieldDef, Record, Schema, Table, Value};

/// Called after a record lands at a live-index position.
pub type AddHook = Box<dyn Fn(usize) + Send>;
/// Called after an update with the record's position and the caller input.
pub type UpdateHook = Box<dyn Fn(usize, &Record) + Send>;
/// Called after a record is deleted from a live-index position.
pub type DeleteHook = Box<dyn Fn(usize) + Send>;

#[derive(Default)]
struct Hooks {
    on_add: Option<AddHook>,
    on_update: Option<UpdateHook>,
    on_delete: Option<DeleteHook>,
}

impl Hooks {
    fn fire_add(&self, pos: usize) {
        if let Some(hook) = &self.on_add {
            swallow_panic(|| hook(pos));
        }
    }

    fn fire_update(&self, pos: usize, input: &Record) {
        if let Some(hook) = &self.on_update {
            swallow_panic(|| hook(pos, input));
        }
    }

    fn fire_delete(&self, pos: usize) {
        if let Some(hook) = &self.on_delete {
            swallow_panic(|| hook(pos));
        }
    }
}

/// Callback panics are the Rust analogue of callback exceptions: logged,
/// never propagated.
fn swallow_panic(f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!("event callback panicked; ignoring");
    }
}

struct Inner {
    engine: Option<Engine>,
    hooks: Hooks,
}

/// A thread-safe handle to one open database.
///
/// Dropping the handle flushes and closes the database; [`Halite::close`]
/// does the same explicitly and surfaces errors. After `close`, every
/// operation fails with [`DbError::NoOpenDatabase`].
pub struct Halite {
    inner: Mutex<Inner>,
}

impl Halite {
    fn wrap(engine: Engine) -> Self {
        Self {
            inner: Mutex::new(Inner {
                engine: Some(engine),
                hooks: Hooks::default(),
            }),
        }
    }

    /// Creates a file-backed database at `path`.
    pub fn create_file(
        path: impl AsRef<Path>,
        fields: Vec<FieldDef>,
        cipher: Option<Arc<dyn Cipher>>,
        config: DbConfig,
    ) -> Result<Self, DbError> {
        Engine::create_file(path, fields, cipher, config).map(Self::wrap)
    }

    /// Opens an existing file-backed database.
    pub fn open_file(
        path: impl AsRef<Path>,
        cipher: Option<Arc<dyn Cipher>>,
        config: DbConfig,
    ) -> Result<Self, DbError> {
        Engine::open_file(path, cipher, config).map(Self::wrap)
    }

    /// Creates an in-memory database.
    pub fn create_memory(
        fields: Vec<FieldDef>,
        cipher: Option<Arc<dyn Cipher>>,
        config: DbConfig,
    ) -> Result<Self, DbError> {
        Engine::create_memory(fields, cipher, config).map(Self::wrap)
    }

    /// Wraps an already-constructed engine (custom backings).
    pub fn from_engine(engine: Engine) -> Self {
        Self::wrap(engine)
    }

    /// Flushes and closes the database.
    pub fn close(&self) -> Result<(), DbError> {
        let mut inner = self.lock();
        inner.engine.take().ok_or(DbError::NoOpenDatabase)?.close()
    }

    /// Whether the handle still has an open database.
    pub fn is_open(&self) -> bool {
        self.lock().engine.is_some()
    }

    // ======================================================================
    // Callbacks
    // ======================================================================

    /// Installs (or clears) the add callback.
    pub fn on_add(&self, hook: Option<AddHook>) {
        self.lock().hooks.on_add = hook;
    }

    /// Installs (or clears) the update callback.
    pub fn on_update(&self, hook: Option<UpdateHook>) {
        self.lock().hooks.on_update = hook;
    }

    /// Installs (or clears) the delete callback.
    pub fn on_delete(&self, hook: Option<DeleteHook>) {
        self.lock().hooks.on_delete = hook;
    }

    // ======================================================================
    // Mutations
    // ======================================================================

    /// Adds a record, returning its (volatile) live-index position.
    pub fn add(&self, input: &Record) -> Result<usize, DbError> {
        let mut inner = self.lock();
        let pos = engine_mut(&mut inner)?.add(input)?;
        inner.hooks.fire_add(pos);
        Ok(pos)
    }

    /// Updates the record holding `key`; partial input merges over stored
    /// values.
    pub fn update_by_key(&self, key: &Value, input: &Record) -> Result<(), DbError> {
        let mut inner = self.lock();
        let pos = engine_mut(&mut inner)?.update_by_key(key, input)?;
        inner.hooks.fire_update(pos, input);
        Ok(())
    }

    /// Updates the record at a live-index position.
    pub fn update_by_index(&self, pos: usize, input: &Record) -> Result<(), DbError> {
        let mut inner = self.lock();
        let final_pos = engine_mut(&mut inner)?.update_by_index(pos, input)?;
        inner.hooks.fire_update(final_pos, input);
        Ok(())
    }

    /// Updates every record matching `filter`. Returns the match count.
    pub fn update_where(&self, filter: &str, input: &Record) -> Result<usize, DbError> {
        let mut inner = self.lock();
        let expr = halite_filter::parse(filter)?;
        let positions = engine_mut(&mut inner)?.positions_where(&expr)?;
        let count = positions.len();
        for pos in positions {
            let final_pos = engine_mut(&mut inner)?.update_by_index(pos, input)?;
            inner.hooks.fire_update(final_pos, input);
        }
        Ok(count)
    }

    /// Deletes the record holding `key`. Returns whether one existed.
    pub fn delete_by_key(&self, key: &Value) -> Result<bool, DbError> {
        let mut inner = self.lock();
        let engine = engine_mut(&mut inner)?;
        let Some(pos) = engine.position_of_key(key)? else {
            return Ok(false);
        };
        engine.delete_by_index(pos)?;
        inner.hooks.fire_delete(pos);
        Ok(true)
    }

    /// Deletes the record at a live-index position.
    pub fn delete_by_index(&self, pos: usize) -> Result<bool, DbError> {
        let mut inner = self.lock();
        let deleted = engine_mut(&mut inner)?.delete_by_index(pos)?;
        if deleted {
            inner.hooks.fire_delete(pos);
        }
        Ok(deleted)
    }

    /// Deletes every record matching `filter`. Returns the count.
    pub fn delete_where(&self, filter: &str) -> Result<usize, DbError> {
        let mut inner = self.lock();
        let expr = halite_filter::parse(filter)?;
        let positions = engine_mut(&mut inner)?.positions_where(&expr)?;
        let count = positions.len();
        // Highest position first so the remaining ones stay valid.
        for pos in positions.into_iter().rev() {
            engine_mut(&mut inner)?.delete_by_index(pos)?;
            inner.hooks.fire_delete(pos);
        }
        Ok(count)
    }

    /// Deletes every record. Returns the count.
    pub fn delete_all(&self) -> Result<usize, DbError> {
        let mut inner = self.lock();
        engine_mut(&mut inner)?.delete_all()
    }

    // ======================================================================
    // Queries
    // ======================================================================

    /// Fetches a record by primary key.
    pub fn get_by_key(
        &self,
        key: &Value,
        fields: Option<&[&str]>,
        include_index: bool,
    ) -> Result<Option<Record>, DbError> {
        engine_mut(&mut self.lock())?.get_by_key(key, fields, include_index)
    }

    /// Fetches a record by live-index position.
    pub fn get_by_index(
        &self,
        pos: usize,
        fields: Option<&[&str]>,
        include_index: bool,
    ) -> Result<Record, DbError> {
        engine_mut(&mut self.lock())?.get_by_index(pos, fields, include_index)
    }

    /// Returns all records, optionally projected and sorted.
    pub fn select_all(
        &self,
        fields: Option<&[&str]>,
        order_by: Option<&[&str]>,
        include_index: bool,
    ) -> Result<Table, DbError> {
        engine_mut(&mut self.lock())?.select_all(fields, order_by, include_index)
    }

    /// Returns records matching `filter`.
    pub fn select_where(
        &self,
        filter: &str,
        fields: Option<&[&str]>,
        order_by: Option<&[&str]>,
        include_index: bool,
    ) -> Result<Table, DbError> {
        engine_mut(&mut self.lock())?.select_where(filter, fields, order_by, include_index)
    }

    /// Positions the cursor on the first record.
    pub fn move_first(&self) -> Result<bool, DbError> {
        Ok(engine_mut(&mut self.lock())?.move_first())
    }

    /// Advances the cursor.
    pub fn move_next(&self) -> Result<bool, DbError> {
        Ok(engine_mut(&mut self.lock())?.move_next())
    }

    /// Decodes the record under the cursor.
    pub fn current(
        &self,
        fields: Option<&[&str]>,
        include_index: bool,
    ) -> Result<Record, DbError> {
        engine_mut(&mut self.lock())?.current(fields, include_index)
    }

    // ======================================================================
    // Schema evolution and maintenance
    // ======================================================================

    /// Appends new fields, filling existing records with `defaults`.
    pub fn add_fields(
        &self,
        fields: Vec<FieldDef>,
        defaults: &[Option<Value>],
    ) -> Result<(), DbError> {
        engine_mut(&mut self.lock())?.add_fields(fields, defaults)
    }

    /// Removes fields from the schema and every record.
    pub fn delete_fields(&self, names: &[&str]) -> Result<(), DbError> {
        engine_mut(&mut self.lock())?.delete_fields(names)
    }

    /// Renames a field.
    pub fn rename_field(&self, old: &str, new: &str) -> Result<(), DbError> {
        engine_mut(&mut self.lock())?.rename_field(old, new)
    }

    /// Rewrites the file without tombstones.
    pub fn clean(&self) -> Result<(), DbError> {
        engine_mut(&mut self.lock())?.clean()
    }

    /// Rewrites an older-format file at the current version.
    pub fn upgrade(&self) -> Result<(), DbError> {
        engine_mut(&mut self.lock())?.upgrade()
    }

    /// Rebuilds the index tail by scanning the data region.
    pub fn reindex(&self) -> Result<(), DbError> {
        engine_mut(&mut self.lock())?.reindex()
    }

    /// Flushes buffered writes.
    pub fn flush(&self) -> Result<(), DbError> {
        engine_mut(&mut self.lock())?.flush()
    }

    // ======================================================================
    // Transactions
    // ======================================================================

    /// Snapshots the database; see [`Engine::begin_trans`].
    pub fn begin_trans(&self) -> Result<(), DbError> {
        engine_mut(&mut self.lock())?.begin_trans()
    }

    /// Keeps all changes since `begin_trans`.
    pub fn commit_trans(&self) -> Result<(), DbError> {
        engine_mut(&mut self.lock())?.commit_trans()
    }

    /// Discards all changes since `begin_trans`.
    pub fn rollback_trans(&self) -> Result<(), DbError> {
        engine_mut(&mut self.lock())?.rollback_trans()
    }

    // ======================================================================
    // Metadata
    // ======================================================================

    /// Number of live records.
    pub fn num_records(&self) -> Result<usize, DbError> {
        Ok(engine_ref(&self.lock())?.num_records())
    }

    /// Number of tombstoned records.
    pub fn num_deleted(&self) -> Result<usize, DbError> {
        Ok(engine_ref(&self.lock())?.num_deleted())
    }

    /// A clone of the table schema.
    pub fn schema(&self) -> Result<Schema, DbError> {
        Ok(engine_ref(&self.lock())?.schema().clone())
    }

    /// Whether records are stored encrypted.
    pub fn is_encrypted(&self) -> Result<bool, DbError> {
        Ok(engine_ref(&self.lock())?.is_encrypted())
    }

    /// The user blob, if any.
    pub fn user_data(&self) -> Result<Option<Value>, DbError> {
        Ok(engine_ref(&self.lock())?.user_data().cloned())
    }

    /// Stores (or clears) the user blob.
    pub fn set_user_data(&self, value: Option<Value>) -> Result<(), DbError> {
        engine_mut(&mut self.lock())?.set_user_data(value)
    }

    /// The caller-owned header version float.
    pub fn user_version(&self) -> Result<f32, DbError> {
        Ok(engine_ref(&self.lock())?.user_version())
    }

    /// Stores the caller-owned header version float.
    pub fn set_user_version(&self, version: f32) -> Result<(), DbError> {
        engine_mut(&mut self.lock())?.set_user_version(version)
    }

    /// Suspends or resumes autoincrement assignment.
    pub fn set_autoinc_suspended(&self, suspended: bool) -> Result<(), DbError> {
        engine_mut(&mut self.lock())?.set_autoinc_suspended(suspended);
        Ok(())
    }

    /// Runs caller data through the configured record cipher.
    ///
    /// Fails with [`DbError::NoEncryptor`] when the database has none.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, DbError> {
        engine_ref(&self.lock())?.encrypt(data)
    }

    /// Reverses [`Halite::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, DbError> {
        engine_ref(&self.lock())?.decrypt(data)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn engine_mut<'a>(
    inner: &'a mut std::sync::MutexGuard<'_, Inner>,
) -> Result<&'a mut Engine, DbError> {
    inner.engine.as_mut().ok_or(DbError::NoOpenDatabase)
}

fn engine_ref<'a>(
    inner: &'a std::sync::MutexGuard<'_, Inner>,
) -> Result<&'a Engine, DbError> {
    inner.engine.as_ref().ok_or(DbError::NoOpenDatabase)
}

/// Deletes a database file.
pub fn drop_database(path: impl AsRef<Path>) -> Result<(), DbError> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(DbError::EmptyFilename);
    }
    if !path.exists() {
        return Err(DbError::DatabaseFileNotFound {
            path: path.display().to_string(),
        });
    }
    std::fs::remove_file(path)?;
    tracing::info!(path = %path.display(), "dropped database file");
    Ok(())
}
