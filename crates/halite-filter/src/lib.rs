//! # halite-filter: predicate expressions over Halite records
//!
//! A filter is a boolean combination of per-field comparisons, written in a
//! small SQL-like syntax:
//!
//! ```text
//! (~FirstName = 'ann' AND LastName ~= 'lee') OR Age > 35
//! Id IN (1, 2, 3)
//! [Last Name] CONTAINS 'smi'
//! Email REGEX '.*@example\.com'
//! ```
//!
//! - `~` before a field name or `~=` as the operator makes the comparison
//!   case-insensitive.
//! - `!=` and `<>` are equality with the result negated; `NOT` before an
//!   operator negates any comparison.
//! - Strings are single-quoted with `''` escaping a quote; `null` is a
//!   literal; `IN` takes a parenthesised list.
//! - Square brackets quote field names containing spaces.
//!
//! [`parse`] turns the text into an [`Expr`]; [`CompiledFilter::compile`]
//! binds the expression to a schema (resolving ordinals, coercing literals
//! to field types, building regexes and `IN` hash sets once); `matches`
//! then evaluates decoded records.
//!
//! Array-typed fields never match any comparison; this mirrors the storage
//! engine's documented limitation.

mod ast;
mod error;
mod eval;
mod parser;

pub use ast::{Atom, BoolOp, CompareOp, Expr, Group, MatchMode, Rhs};
pub use error::FilterError;
pub use eval::CompiledFilter;
pub use parser::parse;
