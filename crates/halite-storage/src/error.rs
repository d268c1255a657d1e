//! Storage engine error types.

use halite_filter::FilterError;
use halite_types::TypeError;

use crate::cipher::CipherError;

/// Errors from the storage engine.
///
/// Value-level problems arrive wrapped as [`DbError::Type`] and filter
/// problems as [`DbError::Filter`], so every failure keeps its identifying
/// kind all the way to the caller.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Underlying I/O error from the backing store.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Value validation or conversion failure.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// Filter parse, compile, or evaluation failure.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Cipher failure while decrypting a record.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    // ------------------------------------------------------------------
    // Format
    // ------------------------------------------------------------------
    /// The file does not start with the Halite signature.
    #[error("invalid signature {found:#010x}: not a Halite database")]
    InvalidSignature { found: u32 },

    /// The file was written by a newer major version.
    #[error("database major version {major} is newer than this library supports")]
    UnsupportedNewerVersion { major: u8 },

    /// `upgrade` was called on a database already at the current version.
    #[error("database schema is already at the current version")]
    SchemaAlreadyUpToDate,

    /// A record frame or tail region did not decode cleanly.
    #[error("corrupted database: {reason}")]
    Corrupted { reason: String },

    // ------------------------------------------------------------------
    // Open / close
    // ------------------------------------------------------------------
    /// An operation was invoked on a closed handle.
    #[error("no open database")]
    NoOpenDatabase,

    /// The database file does not exist.
    #[error("database file not found: {path}")]
    DatabaseFileNotFound { path: String },

    /// An empty path was supplied.
    #[error("filename must not be empty")]
    EmptyFilename,

    /// `create` needs a writable backing store.
    #[error("the backing stream must be writable")]
    StreamMustBeWritable,

    /// A mutation was attempted on a read-only database.
    #[error("database is open in read-only mode")]
    DatabaseReadOnlyMode,

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------
    /// A field declaration is invalid (e.g. autoincrement on a non-Int32).
    #[error("invalid type in schema for field '{field}': {reason}")]
    InvalidTypeInSchema { field: String, reason: String },

    /// Primary keys must be non-array Int32 or String fields.
    #[error("invalid primary key type for field '{field}'")]
    InvalidPrimaryKeyType { field: String },

    /// The schema already declares a primary key.
    #[error("database already has a primary key")]
    DatabaseAlreadyHasPrimaryKey,

    /// A primary key cannot be added to an existing database.
    #[error("a primary key field cannot be added to an existing database")]
    PrimaryKeyCannotBeAdded,

    /// A field with this name already exists.
    #[error("field name '{name}' already exists")]
    FieldNameAlreadyExists { name: String },

    /// The primary-key field cannot be deleted.
    #[error("cannot delete primary key field '{name}'")]
    CannotDeletePrimaryKeyField { name: String },

    /// A schema-change operation was given no fields.
    #[error("the field list is empty")]
    FieldListIsEmpty,

    /// A field name is empty.
    #[error("field names must not be empty")]
    FieldNameIsEmpty,

    /// Schema changes require a clean database (no tombstoned records).
    #[error("cannot add or remove fields while the database has deleted records; run clean first")]
    CantAddOrRemoveFieldWithDeletedRecords,

    // ------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------
    /// The record is missing a primary-key value.
    #[error("record is missing a primary key value")]
    MissingPrimaryKey,

    /// A live record already carries this primary key.
    #[error("duplicate primary key: {key}")]
    DuplicatePrimaryKey { key: String },

    /// No live record carries this primary key.
    #[error("primary key value not found")]
    PrimaryKeyValueNotFound,

    /// The record references a field the schema does not have.
    #[error("invalid field name '{name}'")]
    InvalidFieldName { name: String },

    /// A projection listed the same field twice.
    #[error("field '{name}' specified twice")]
    FieldSpecifiedTwice { name: String },

    // ------------------------------------------------------------------
    // Ranges and state
    // ------------------------------------------------------------------
    /// A record index is outside the live range.
    #[error("index {index} out of range (0..{len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// The cursor moved past the last record.
    #[error("iterator moved past the end of the database")]
    IteratorPastEndOfFile,

    /// The database holds no records.
    #[error("database is empty")]
    DatabaseEmpty,

    /// `commit` or `rollback` without an active transaction.
    #[error("no current transaction")]
    NoCurrentTransaction,

    /// `begin` while a transaction is already active.
    #[error("a transaction is already active")]
    TransactionAlreadyActive,

    /// An order-by clause names an unknown field.
    #[error("invalid order-by field name '{name}'")]
    InvalidOrderByFieldName { name: String },

    /// Array fields cannot be sorted on.
    #[error("cannot order by array field '{name}'")]
    CannotOrderByOnArrayField { name: String },

    // ------------------------------------------------------------------
    // Crypto
    // ------------------------------------------------------------------
    /// The database is encrypted but no cipher was supplied at open.
    #[error("database is encrypted; open it with a cipher")]
    DbIsEncrypted,

    /// A cipher was supplied but the database is not encrypted.
    #[error("database is not encrypted; open it without a cipher")]
    CipherMismatch,

    /// An encryption API was invoked without a cipher configured.
    #[error("no encryptor configured")]
    NoEncryptor,

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------
    /// User data must be a String or a Byte array.
    #[error("user data must be a String or a Byte array")]
    InvalidMetaDataType,
}

impl DbError {
    pub(crate) fn corrupted(reason: impl Into<String>) -> Self {
        DbError::Corrupted {
            reason: reason.into(),
        }
    }
}
