//! Value and conversion error types.

use crate::DataType;

/// Errors raised while validating or converting typed values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    /// A value's variant does not match the field's declared type.
    #[error("invalid data type for field '{field}': expected {expected}, got {actual}")]
    InvalidDataType {
        field: String,
        expected: DataType,
        actual: String,
    },

    /// A value could not be converted to the field's declared type.
    #[error("error converting value for field '{field}' to {target}")]
    ErrorConvertingValueForField { field: String, target: DataType },

    /// A scalar value was supplied for an array field.
    #[error("field '{field}' is an array field but a non-array value was supplied")]
    NonArrayValue { field: String },

    /// The value cannot be interpreted as a Guid.
    #[error("cannot convert value to Guid")]
    CantConvertTypeToGuid,

    /// A Guid field only accepts Guid values or 16-byte arrays.
    #[error("Guid field values must be a Guid or a Byte array")]
    GuidTypeMustBeGuidOrByteArray,

    /// The lookup key's type does not match the primary key field's type.
    #[error("key type does not match the primary key field type {expected}")]
    MismatchedKeyFieldTypes { expected: DataType },

    /// The lookup key is of a type that can never be a primary key.
    #[error("invalid key field type: {actual}")]
    InvalidKeyFieldType { actual: String },
}

impl TypeError {
    /// Fills in the field name on variants that carry one.
    ///
    /// Conversion helpers don't know which field they are converting for;
    /// the engine attaches the name at the call site.
    pub fn with_field(mut self, name: &str) -> Self {
        match &mut self {
            TypeError::InvalidDataType { field, .. }
            | TypeError::ErrorConvertingValueForField { field, .. }
            | TypeError::NonArrayValue { field } => {
                if field.is_empty() {
                    name.clone_into(field);
                }
            }
            _ => {}
        }
        self
    }
}
