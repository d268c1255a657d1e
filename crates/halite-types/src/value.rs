//! Typed field values.

#![allow(clippy::match_same_arms)]

use std::cmp::Ordering;
use std::fmt::{self, Display};

use bytes::Bytes;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datatype::DataType;
use crate::datetime::DbDateTime;
use crate::error::TypeError;

/// A single typed field value.
///
/// One case per [`DataType`], plus a dedicated [`Value::Null`] and
/// [`Value::Array`] for array-flagged fields. Nullness is *not* the same as
/// an empty array: an array field can hold `Null`, an empty array, or a
/// populated one.
///
/// Float cases use total bit ordering for equality and hashing so values
/// can live in hash sets (`IN` filters) and sort deterministically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Value {
    /// The absent value, carried by the record nullmask on disk.
    #[default]
    Null,
    Bool(bool),
    Byte(u8),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Decimal(Decimal),
    DateTime(DbDateTime),
    String(String),
    Guid(Uuid),
    /// An element-typed array for array-flagged fields.
    Array(ArrayValue),
}

/// The payload of an array-flagged field, one vector case per element type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayValue {
    Bool(Vec<bool>),
    Byte(Bytes),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Decimal(Vec<Decimal>),
    DateTime(Vec<DbDateTime>),
    String(Vec<String>),
    Guid(Vec<Uuid>),
}

impl ArrayValue {
    /// The element type of this array.
    pub fn element_type(&self) -> DataType {
        match self {
            ArrayValue::Bool(_) => DataType::Bool,
            ArrayValue::Byte(_) => DataType::Byte,
            ArrayValue::Int32(_) => DataType::Int32,
            ArrayValue::UInt32(_) => DataType::UInt32,
            ArrayValue::Int64(_) => DataType::Int64,
            ArrayValue::Float32(_) => DataType::Float32,
            ArrayValue::Float64(_) => DataType::Float64,
            ArrayValue::Decimal(_) => DataType::Decimal,
            ArrayValue::DateTime(_) => DataType::DateTime,
            ArrayValue::String(_) => DataType::String,
            ArrayValue::Guid(_) => DataType::Guid,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayValue::Bool(v) => v.len(),
            ArrayValue::Byte(v) => v.len(),
            ArrayValue::Int32(v) => v.len(),
            ArrayValue::UInt32(v) => v.len(),
            ArrayValue::Int64(v) => v.len(),
            ArrayValue::Float32(v) => v.len(),
            ArrayValue::Float64(v) => v.len(),
            ArrayValue::Decimal(v) => v.len(),
            ArrayValue::DateTime(v) => v.len(),
            ArrayValue::String(v) => v.len(),
            ArrayValue::Guid(v) => v.len(),
        }
    }

    /// Returns `true` if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::UInt32(a), Value::UInt32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            // Bit equality so NaN == NaN and values stay usable in sets.
            (Value::Float32(a), Value::Float32(b)) => a.to_bits() == b.to_bits(),
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Guid(a), Value::Guid(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Byte(v) => v.hash(state),
            Value::Int32(v) => v.hash(state),
            Value::UInt32(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float32(v) => v.to_bits().hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::Decimal(v) => v.hash(state),
            Value::DateTime(v) => v.hash(state),
            Value::String(v) => v.hash(state),
            Value::Guid(v) => v.hash(state),
            Value::Array(v) => v.to_string_repr().hash(state),
        }
    }
}

impl ArrayValue {
    fn to_string_repr(&self) -> String {
        format!("{self:?}")
    }
}

/// Total ordering for f64: NaN < -Inf < negatives < -0.0 < +0.0 < positives < +Inf.
fn total_cmp_f64(a: f64, b: f64) -> Ordering {
    let a_bits = a.to_bits();
    let b_bits = b.to_bits();
    let a_key = if a.is_sign_negative() {
        !a_bits
    } else {
        a_bits ^ (1u64 << 63)
    };
    let b_key = if b.is_sign_negative() {
        !b_bits
    } else {
        b_bits ^ (1u64 << 63)
    };
    a_key.cmp(&b_key)
}

impl Value {
    /// Returns the value's data type and array flag.
    ///
    /// `None` for `Null`, which has no concrete type.
    pub fn type_of(&self) -> Option<(DataType, bool)> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some((DataType::Bool, false)),
            Value::Byte(_) => Some((DataType::Byte, false)),
            Value::Int32(_) => Some((DataType::Int32, false)),
            Value::UInt32(_) => Some((DataType::UInt32, false)),
            Value::Int64(_) => Some((DataType::Int64, false)),
            Value::Float32(_) => Some((DataType::Float32, false)),
            Value::Float64(_) => Some((DataType::Float64, false)),
            Value::Decimal(_) => Some((DataType::Decimal, false)),
            Value::DateTime(_) => Some((DataType::DateTime, false)),
            Value::String(_) => Some((DataType::String, false)),
            Value::Guid(_) => Some((DataType::Guid, false)),
            Value::Array(a) => Some((a.element_type(), true)),
        }
    }

    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the value as an i32, if it is an `Int32`.
    pub fn as_int32(&self) -> Option<i32> {
        match self {
            Value::Int32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a string slice, if it is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as raw bytes, if it is a Byte array.
    pub fn as_byte_array(&self) -> Option<&Bytes> {
        match self {
            Value::Array(ArrayValue::Byte(b)) => Some(b),
            _ => None,
        }
    }

    /// Builds a Byte-array value from raw bytes.
    pub fn byte_array(bytes: impl Into<Bytes>) -> Self {
        Value::Array(ArrayValue::Byte(bytes.into()))
    }

    /// Compares two same-typed values for ordering.
    ///
    /// `Null` orders before every non-null value. Values of different types
    /// (and arrays) are incomparable and return `None`.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Byte(a), Value::Byte(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::UInt32(a), Value::UInt32(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Float32(a), Value::Float32(b)) => {
                Some(total_cmp_f64(f64::from(*a), f64::from(*b)))
            }
            (Value::Float64(a), Value::Float64(b)) => Some(total_cmp_f64(*a, *b)),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Guid(a), Value::Guid(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Converts the value to `target`, widening, narrowing, or parsing as
    /// needed.
    ///
    /// `Null` converts to `Null` for every target. Narrowing conversions
    /// succeed only when the value fits; floats convert to integer targets
    /// only when integral. Errors carry no field name; callers attach one
    /// with [`TypeError::with_field`].
    pub fn coerce_to(&self, target: DataType) -> Result<Value, TypeError> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        if let Some((dt, false)) = self.type_of()
            && dt == target
        {
            return Ok(self.clone());
        }
        let fail = || TypeError::ErrorConvertingValueForField {
            field: std::string::String::new(),
            target,
        };

        match target {
            DataType::Bool => match self {
                Value::Byte(v) => Ok(Value::Bool(*v != 0)),
                Value::Int32(v) => Ok(Value::Bool(*v != 0)),
                Value::Int64(v) => Ok(Value::Bool(*v != 0)),
                Value::String(s) => match s.to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(Value::Bool(true)),
                    "false" | "0" => Ok(Value::Bool(false)),
                    _ => Err(fail()),
                },
                _ => Err(fail()),
            },
            DataType::Byte => self
                .to_i128()
                .and_then(|v| u8::try_from(v).ok())
                .map(Value::Byte)
                .or_else(|| self.parse_str().map(Value::Byte))
                .ok_or_else(fail),
            DataType::Int32 => self
                .to_i128()
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::Int32)
                .or_else(|| self.parse_str().map(Value::Int32))
                .ok_or_else(fail),
            DataType::UInt32 => self
                .to_i128()
                .and_then(|v| u32::try_from(v).ok())
                .map(Value::UInt32)
                .or_else(|| self.parse_str().map(Value::UInt32))
                .ok_or_else(fail),
            DataType::Int64 => self
                .to_i128()
                .and_then(|v| i64::try_from(v).ok())
                .map(Value::Int64)
                .or_else(|| self.parse_str().map(Value::Int64))
                .ok_or_else(fail),
            DataType::Float32 => self
                .to_f64()
                .map(|v| Value::Float32(v as f32))
                .or_else(|| self.parse_str().map(Value::Float32))
                .ok_or_else(fail),
            DataType::Float64 => self
                .to_f64()
                .map(Value::Float64)
                .or_else(|| self.parse_str().map(Value::Float64))
                .ok_or_else(fail),
            DataType::Decimal => match self {
                Value::Byte(v) => Ok(Value::Decimal(Decimal::from(*v))),
                Value::Int32(v) => Ok(Value::Decimal(Decimal::from(*v))),
                Value::UInt32(v) => Ok(Value::Decimal(Decimal::from(*v))),
                Value::Int64(v) => Ok(Value::Decimal(Decimal::from(*v))),
                Value::Float32(v) => Decimal::from_f32(*v).map(Value::Decimal).ok_or_else(fail),
                Value::Float64(v) => Decimal::from_f64(*v).map(Value::Decimal).ok_or_else(fail),
                Value::String(s) => s.trim().parse().map(Value::Decimal).map_err(|_| fail()),
                _ => Err(fail()),
            },
            DataType::DateTime => match self {
                Value::String(s) => DbDateTime::parse(s).map(Value::DateTime).ok_or_else(fail),
                _ => Err(fail()),
            },
            DataType::String => match self {
                Value::Array(_) => Err(fail()),
                other => Ok(Value::String(other.to_string())),
            },
            DataType::Guid => match self {
                Value::String(s) => Uuid::parse_str(s)
                    .map(Value::Guid)
                    .map_err(|_| TypeError::CantConvertTypeToGuid),
                Value::Array(ArrayValue::Byte(b)) => {
                    let raw: [u8; 16] = b
                        .as_ref()
                        .try_into()
                        .map_err(|_| TypeError::CantConvertTypeToGuid)?;
                    Ok(Value::Guid(Uuid::from_bytes_le(raw)))
                }
                _ => Err(TypeError::GuidTypeMustBeGuidOrByteArray),
            },
        }
    }

    /// Integer view of numeric values (floats only when integral).
    fn to_i128(&self) -> Option<i128> {
        match self {
            Value::Bool(v) => Some(i128::from(*v)),
            Value::Byte(v) => Some(i128::from(*v)),
            Value::Int32(v) => Some(i128::from(*v)),
            Value::UInt32(v) => Some(i128::from(*v)),
            Value::Int64(v) => Some(i128::from(*v)),
            Value::Float32(v) if v.fract() == 0.0 => Some(*v as i128),
            Value::Float64(v) if v.fract() == 0.0 => Some(*v as i128),
            Value::Decimal(d) if d.fract().is_zero() => d.to_i128(),
            _ => None,
        }
    }

    /// Float view of numeric values.
    fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Byte(v) => Some(f64::from(*v)),
            Value::Int32(v) => Some(f64::from(*v)),
            Value::UInt32(v) => Some(f64::from(*v)),
            Value::Int64(v) => Some(*v as f64),
            Value::Float32(v) => Some(f64::from(*v)),
            Value::Float64(v) => Some(*v),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    /// Parses a string value into any `FromStr` target.
    fn parse_str<T: std::str::FromStr>(&self) -> Option<T> {
        match self {
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl Display for Value {
    /// Plain textual form, used by the filter `CONTAINS` and `REGEX`
    /// operators; strings render unquoted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::DateTime(v) => write!(f, "{v}"),
            Value::String(s) => f.write_str(s),
            Value::Guid(v) => write!(f, "{v}"),
            Value::Array(a) => write!(f, "<array of {} {}>", a.len(), a.element_type()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Byte(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<DbDateTime> for Value {
    fn from(v: DbDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Guid(v)
    }
}

impl From<ArrayValue> for Value {
    fn from(v: ArrayValue) -> Self {
        Value::Array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
