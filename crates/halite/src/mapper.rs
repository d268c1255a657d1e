//! Explicit object mapping.
//!
//! The engine speaks only in [`Record`] maps; user types opt into mapping
//! by implementing [`RecordMapper`]. No reflection, no derive magic: each
//! type states how it becomes a record and how it is rebuilt from one.

use halite_storage::DbError;
use halite_types::{Record, Value};

use crate::halite::Halite;

/// Converts between a user type and a [`Record`].
///
/// ```ignore
/// struct Person { id: i32, name: String }
///
/// impl RecordMapper for Person {
///     fn to_record(&self) -> Record {
///         let mut rec = Record::new();
///         rec.set("id", self.id).set("name", self.name.clone());
///         rec
///     }
///
///     fn from_record(record: &Record) -> Result<Self, DbError> {
///         Ok(Person {
///             id: record.get("id").and_then(Value::as_int32).unwrap_or_default(),
///             name: record
///                 .get("name")
///                 .and_then(Value::as_str)
///                 .unwrap_or_default()
///                 .to_string(),
///         })
///     }
/// }
/// ```
pub trait RecordMapper: Sized {
    /// Renders the object as a record for add/update.
    fn to_record(&self) -> Record;

    /// Rebuilds the object from a stored record.
    fn from_record(record: &Record) -> Result<Self, DbError>;
}

impl Halite {
    /// Adds a mapped object, returning its live-index position.
    pub fn add_mapped<T: RecordMapper>(&self, object: &T) -> Result<usize, DbError> {
        self.add(&object.to_record())
    }

    /// Updates the record holding `key` from a mapped object.
    pub fn update_mapped_by_key<T: RecordMapper>(
        &self,
        key: &Value,
        object: &T,
    ) -> Result<(), DbError> {
        self.update_by_key(key, &object.to_record())
    }

    /// Fetches and maps the record holding `key`.
    pub fn get_mapped_by_key<T: RecordMapper>(&self, key: &Value) -> Result<Option<T>, DbError> {
        self.get_by_key(key, None, false)?
            .map(|record| T::from_record(&record))
            .transpose()
    }

    /// Maps every record matching `filter`.
    pub fn select_mapped_where<T: RecordMapper>(&self, filter: &str) -> Result<Vec<T>, DbError> {
        self.select_where(filter, None, None, false)?
            .iter()
            .map(T::from_record)
            .collect()
    }
}
