//! # Halite
//!
//! A single-file embedded database: one table with a typed, fixed schema,
//! stored in one file (or in memory), queried by primary key or by filter
//! expressions.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                         Halite                            │
//! │  ┌──────────┐   ┌───────────┐   ┌──────────┐              │
//! │  │  Handle  │ → │  Engine   │ → │ Backing  │              │
//! │  │ (mutex)  │   │ (storage) │   │(file/mem)│              │
//! │  └──────────┘   └───────────┘   └──────────┘              │
//! │        ↓ filters via halite-filter, values via            │
//! │          halite-types                                     │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use halite::{DataType, DbConfig, FieldDef, Halite, Record, Value};
//!
//! // Create a database with an autoincrement key.
//! let db = Halite::create_file(
//!     "people.hdb",
//!     vec![
//!         FieldDef::new("id", DataType::Int32).primary_key().autoinc(1),
//!         FieldDef::new("name", DataType::String),
//!         FieldDef::new("age", DataType::Int32),
//!     ],
//!     None,
//!     DbConfig::new(),
//! )?;
//!
//! let mut rec = Record::new();
//! rec.set("name", "Ann").set("age", 30);
//! db.add(&rec)?;
//!
//! // Query by key or by filter.
//! let ann = db.get_by_key(&Value::Int32(1), None, false)?;
//! let adults = db.select_where("age >= 18", None, Some(&["~name"]), false)?;
//! db.close()?;
//! ```
//!
//! Every operation runs under the handle's mutex for its whole duration;
//! operations are not reentrant (a callback must not call back into the
//! same handle).

mod aes;
mod halite;
mod mapper;

pub use aes::Aes256GcmCipher;
pub use halite::{AddHook, DeleteHook, Halite, UpdateHook, drop_database};
pub use mapper::RecordMapper;

// Re-export the value model.
pub use halite_types::{
    ArrayValue, DataType, DateTimeKind, DbDateTime, FieldDef, Record, Schema, Table, TypeError,
    Value,
};

// Re-export the engine surface.
pub use halite_storage::{
    Backing, Cipher, CipherError, DbConfig, DbError, Engine, FileBacking, MemoryBacking,
};

// Re-export the filter model for programmatic predicates.
pub use halite_filter::{
    Atom, BoolOp, CompareOp, Expr, FilterError, Group, MatchMode, Rhs, parse as parse_filter,
};
