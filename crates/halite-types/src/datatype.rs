//! Field data types and their wire codes.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The scalar type of a table field.
///
/// Every field stores either one value of its type or, when the field's
/// array flag is set, a length-prefixed sequence of them. The `i16` wire
/// codes are part of the file format and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 1 byte, 0 or 1.
    Bool,
    /// 1 unsigned byte.
    Byte,
    /// 32-bit signed integer, little-endian.
    Int32,
    /// 32-bit unsigned integer, little-endian.
    UInt32,
    /// 64-bit signed integer, little-endian.
    Int64,
    /// IEEE-754 single, little-endian.
    Float32,
    /// IEEE-754 double, little-endian.
    Float64,
    /// 128-bit decimal, four i32 words in lo/mid/hi/flags order.
    Decimal,
    /// 10-byte calendar timestamp, see [`crate::DbDateTime`].
    DateTime,
    /// 7-bit varint length prefix followed by UTF-8 bytes.
    String,
    /// 16 bytes in little-endian-struct order.
    Guid,
}

impl DataType {
    /// Returns the on-disk type code.
    pub fn code(self) -> i16 {
        match self {
            DataType::Bool => 0,
            DataType::Byte => 1,
            DataType::Int32 => 2,
            DataType::UInt32 => 3,
            DataType::Int64 => 4,
            DataType::Float32 => 5,
            DataType::Float64 => 6,
            DataType::Decimal => 7,
            DataType::DateTime => 8,
            DataType::String => 9,
            DataType::Guid => 10,
        }
    }

    /// Looks a type up by its on-disk code.
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(DataType::Bool),
            1 => Some(DataType::Byte),
            2 => Some(DataType::Int32),
            3 => Some(DataType::UInt32),
            4 => Some(DataType::Int64),
            5 => Some(DataType::Float32),
            6 => Some(DataType::Float64),
            7 => Some(DataType::Decimal),
            8 => Some(DataType::DateTime),
            9 => Some(DataType::String),
            10 => Some(DataType::Guid),
            _ => None,
        }
    }

    /// Returns the encoded size of one value, or `None` for
    /// variable-length types (String).
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            DataType::Bool | DataType::Byte => Some(1),
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => Some(4),
            DataType::Int64 | DataType::Float64 => Some(8),
            DataType::Decimal => Some(16),
            DataType::DateTime => Some(10),
            DataType::Guid => Some(16),
            DataType::String => None,
        }
    }

    /// Whether a field of this type may carry the primary-key flag.
    pub fn valid_primary_key(self) -> bool {
        matches!(self, DataType::Int32 | DataType::String)
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "Bool",
            DataType::Byte => "Byte",
            DataType::Int32 => "Int32",
            DataType::UInt32 => "UInt32",
            DataType::Int64 => "Int64",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
            DataType::Decimal => "Decimal",
            DataType::DateTime => "DateTime",
            DataType::String => "String",
            DataType::Guid => "Guid",
        };
        f.write_str(name)
    }
}
