//! Field descriptors and the table schema.

use serde::{Deserialize, Serialize};

use crate::datatype::DataType;

/// One column of the table.
///
/// Names compare case-insensitively and are unique per table. At most one
/// field carries the primary-key flag; the engine moves that field to
/// ordinal 0 at creation time so key-only reads can stop after the first
/// decoded value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name, case-insensitive unique.
    pub name: String,
    /// Scalar type of the field (or of its elements when `array` is set).
    pub data_type: DataType,
    /// Whether the field stores a length-prefixed array.
    pub array: bool,
    /// 0-based position in the record layout.
    pub ordinal: usize,
    /// Whether this field is the table's primary key.
    pub primary_key: bool,
    /// Autoincrement seed; `Some` only for non-array Int32 fields.
    pub autoinc_start: Option<i32>,
    /// Next value the autoincrement counter will hand out.
    pub autoinc_current: Option<i32>,
    /// Free-form column comment, persisted with the schema.
    pub comment: Option<String>,
}

impl FieldDef {
    /// A plain nullable field of the given type.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            array: false,
            ordinal: 0,
            primary_key: false,
            autoinc_start: None,
            autoinc_current: None,
            comment: None,
        }
    }

    /// An array-flagged field of the given element type.
    pub fn array(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            array: true,
            ..Self::new(name, data_type)
        }
    }

    /// Marks this field as the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Gives this field an autoincrement counter starting at `start`.
    pub fn autoinc(mut self, start: i32) -> Self {
        self.autoinc_start = Some(start);
        self.autoinc_current = Some(start);
        self
    }

    /// Attaches a column comment.
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Whether the autoincrement flag is set.
    pub fn is_autoinc(&self) -> bool {
        self.autoinc_start.is_some()
    }

    /// Case-insensitive name match.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// The ordered field list of the one table a database holds.
///
/// A schema is immutable once the database is created; the add / delete /
/// rename field operations build a new schema and rewrite the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<FieldDef>,
}

impl Schema {
    /// Wraps an already-ordered field list.
    ///
    /// Validation (unique names, key type rules, ordinal assignment) is the
    /// engine's job; this type only carries the result.
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    /// All fields in ordinal order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Finds a field by case-insensitive name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.is_named(name))
    }

    /// Finds a field's ordinal by case-insensitive name.
    pub fn ordinal_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.is_named(name))
    }

    /// The primary-key field, if the table has one.
    ///
    /// When present it is always at ordinal 0.
    pub fn primary_key(&self) -> Option<&FieldDef> {
        self.fields.first().filter(|f| f.primary_key)
    }

    /// Number of bytes the record nullmask occupies.
    pub fn nullmask_len(&self) -> usize {
        self.fields.len().div_ceil(8)
    }

    /// Mutable access for the engine's schema-evolution paths.
    pub fn fields_mut(&mut self) -> &mut Vec<FieldDef> {
        &mut self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new(vec![
            FieldDef::new("ID", DataType::Int32).primary_key(),
            FieldDef::new("Name", DataType::String),
            FieldDef::array("Tags", DataType::String),
        ])
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let schema = sample();
        assert_eq!(schema.ordinal_of("id"), Some(0));
        assert_eq!(schema.ordinal_of("NAME"), Some(1));
        assert_eq!(schema.ordinal_of("missing"), None);
    }

    #[test]
    fn primary_key_only_at_ordinal_zero() {
        let schema = sample();
        assert_eq!(schema.primary_key().unwrap().name, "ID");

        let no_pk = Schema::new(vec![FieldDef::new("a", DataType::Int32)]);
        assert!(no_pk.primary_key().is_none());
    }

    #[test]
    fn nullmask_rounds_up() {
        assert_eq!(sample().nullmask_len(), 1);
        let nine = Schema::new(
            (0..9)
                .map(|i| FieldDef::new(format!("f{i}"), DataType::Bool))
                .collect(),
        );
        assert_eq!(nine.nullmask_len(), 2);
    }
}
