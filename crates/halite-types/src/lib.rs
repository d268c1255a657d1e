//! # halite-types: core type definitions for Halite
//!
//! This crate defines the vocabulary shared by every Halite crate:
//!
//! - [`DataType`] - the eleven field types a table column can hold
//! - [`Value`] - a tagged variant carrying one value of any field type
//! - [`ArrayValue`] - an element-typed array payload
//! - [`DbDateTime`] - the wall-clock timestamp a `DateTime` field stores
//! - [`FieldDef`] / [`Schema`] - the table shape
//! - [`Record`] - an ordered, case-insensitive name → value map
//!
//! The storage engine only ever speaks in these types; object mapping and
//! query surfaces live in the outer crates.

mod datatype;
mod datetime;
mod error;
mod field;
mod record;
mod value;

pub use datatype::DataType;
pub use datetime::{DateTimeKind, DbDateTime};
pub use error::TypeError;
pub use field::{FieldDef, Schema};
pub use record::{Record, Table};
pub use value::{ArrayValue, Value};
