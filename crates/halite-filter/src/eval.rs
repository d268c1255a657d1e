//! Filter evaluation against decoded records.
//!
//! [`CompiledFilter::compile`] binds an [`Expr`] to a schema once per query
//! pass: field names resolve to ordinals, literals coerce to the field's
//! type, regexes compile (honouring the case flag), and `IN` lists become
//! hash sets. Evaluation itself is then infallible.
//!
//! Null semantics: `=` treats null = null as true and null = value as
//! false; the ordering operators are false whenever either side is null.
//! Array-typed fields never match any comparison.

use std::collections::HashSet;

use halite_types::{DataType, Schema, Value};
use regex::{Regex, RegexBuilder};

use crate::ast::{Atom, BoolOp, CompareOp, Expr, MatchMode, Rhs};
use crate::error::FilterError;

/// A filter bound to a schema, ready to test records.
#[derive(Debug)]
pub struct CompiledFilter {
    root: Node,
}

#[derive(Debug)]
enum Node {
    Atom(CompiledAtom),
    Group { op: BoolOp, children: Vec<Node> },
}

#[derive(Debug)]
struct CompiledAtom {
    ordinal: usize,
    array: bool,
    op: CompareOp,
    mode: MatchMode,
    negated: bool,
    rhs: CompiledRhs,
}

#[derive(Debug)]
enum CompiledRhs {
    /// Single comparison operand, already coerced to the field's type.
    Value(Value),
    /// `IN` membership set (string members pre-folded when
    /// case-insensitive).
    Set(HashSet<Value>),
    /// `CONTAINS` needle (pre-folded when case-insensitive).
    Needle(String),
    /// Compiled `REGEX` pattern.
    Pattern(Box<Regex>),
}

impl CompiledFilter {
    /// Binds `expr` to `schema`.
    pub fn compile(expr: &Expr, schema: &Schema) -> Result<Self, FilterError> {
        Ok(Self {
            root: compile_node(expr, schema)?,
        })
    }

    /// Tests a decoded record (values in field-ordinal order).
    pub fn matches(&self, values: &[Value]) -> bool {
        eval_node(&self.root, values)
    }
}

fn compile_node(expr: &Expr, schema: &Schema) -> Result<Node, FilterError> {
    match expr {
        Expr::Atom(atom) => compile_atom(atom, schema).map(Node::Atom),
        Expr::Group(group) => {
            let children = group
                .children
                .iter()
                .map(|child| compile_node(child, schema))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Node::Group {
                op: group.op,
                children,
            })
        }
    }
}

fn compile_atom(atom: &Atom, schema: &Schema) -> Result<CompiledAtom, FilterError> {
    let ordinal = schema
        .ordinal_of(&atom.field)
        .ok_or_else(|| FilterError::UnknownField {
            name: atom.field.clone(),
        })?;
    let field = &schema.fields()[ordinal];
    let case_insensitive = atom.match_mode == MatchMode::CaseInsensitive;

    let rhs = match atom.op {
        CompareOp::In => {
            let Rhs::Set(literals) = &atom.rhs else {
                return Err(FilterError::HashSetExpected);
            };
            let mut set = HashSet::with_capacity(literals.len());
            for literal in literals {
                let coerced = coerce_literal(literal, field.data_type, &atom.field)?;
                set.insert(fold_value(coerced, case_insensitive));
            }
            CompiledRhs::Set(set)
        }
        CompareOp::Regex => {
            let pattern = match &atom.rhs {
                Rhs::Pattern(p) => p.as_str(),
                Rhs::Value(Value::String(p)) => p.as_str(),
                _ => return Err(FilterError::HashSetExpected),
            };
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(case_insensitive)
                .build()
                .map_err(|e| FilterError::InvalidRegex {
                    reason: e.to_string(),
                })?;
            CompiledRhs::Pattern(Box::new(regex))
        }
        CompareOp::Contains => {
            let Rhs::Value(literal) = &atom.rhs else {
                return Err(FilterError::HashSetExpected);
            };
            let needle = literal.to_string();
            CompiledRhs::Needle(fold_text(needle, case_insensitive))
        }
        _ => {
            let Rhs::Value(literal) = &atom.rhs else {
                return Err(FilterError::HashSetExpected);
            };
            CompiledRhs::Value(coerce_literal(literal, field.data_type, &atom.field)?)
        }
    };

    Ok(CompiledAtom {
        ordinal,
        array: field.array,
        op: atom.op,
        mode: atom.match_mode,
        negated: atom.negated,
        rhs,
    })
}

/// Coerces a parsed literal to the field's type; nulls pass through.
fn coerce_literal(literal: &Value, target: DataType, field: &str) -> Result<Value, FilterError> {
    if literal.is_null() {
        return Ok(Value::Null);
    }
    literal
        .coerce_to(target)
        .map_err(|e| FilterError::Type(e.with_field(field)))
}

fn fold_value(value: Value, fold: bool) -> Value {
    match value {
        Value::String(s) if fold => Value::String(s.to_lowercase()),
        other => other,
    }
}

fn fold_text(text: String, fold: bool) -> String {
    if fold { text.to_lowercase() } else { text }
}

fn eval_node(node: &Node, values: &[Value]) -> bool {
    match node {
        Node::Atom(atom) => eval_atom(atom, values),
        Node::Group { op, children } => match op {
            BoolOp::And => children.iter().all(|child| eval_node(child, values)),
            BoolOp::Or => children.iter().any(|child| eval_node(child, values)),
        },
    }
}

fn eval_atom(atom: &CompiledAtom, values: &[Value]) -> bool {
    // Array fields never match, negated or not.
    if atom.array {
        return false;
    }

    let value = values.get(atom.ordinal).unwrap_or(&Value::Null);
    let fold = atom.mode == MatchMode::CaseInsensitive;

    let result = match (&atom.op, &atom.rhs) {
        (CompareOp::Eq, CompiledRhs::Value(rhs)) => eval_eq(value, rhs, fold),
        (CompareOp::Ne, CompiledRhs::Value(rhs)) => !eval_eq(value, rhs, fold),
        (CompareOp::Lt, CompiledRhs::Value(rhs)) => eval_ord(value, rhs, fold, |o| o.is_lt()),
        (CompareOp::Le, CompiledRhs::Value(rhs)) => eval_ord(value, rhs, fold, |o| o.is_le()),
        (CompareOp::Gt, CompiledRhs::Value(rhs)) => eval_ord(value, rhs, fold, |o| o.is_gt()),
        (CompareOp::Ge, CompiledRhs::Value(rhs)) => eval_ord(value, rhs, fold, |o| o.is_ge()),
        (CompareOp::In, CompiledRhs::Set(set)) => {
            let probe = fold_value(value.clone(), fold);
            set.contains(&probe)
        }
        (CompareOp::Contains, CompiledRhs::Needle(needle)) => {
            if value.is_null() {
                false
            } else {
                fold_text(value.to_string(), fold).contains(needle.as_str())
            }
        }
        (CompareOp::Regex, CompiledRhs::Pattern(regex)) => {
            !value.is_null() && regex.is_match(&value.to_string())
        }
        // Compile never pairs an op with the wrong operand shape.
        _ => false,
    };

    result != atom.negated
}

fn eval_eq(value: &Value, rhs: &Value, fold: bool) -> bool {
    match (value.is_null(), rhs.is_null()) {
        (true, true) => return true,
        (true, false) | (false, true) => return false,
        (false, false) => {}
    }
    if let (Value::String(a), Value::String(b)) = (value, rhs)
        && fold
    {
        return a.to_lowercase() == b.to_lowercase();
    }
    value.compare(rhs) == Some(std::cmp::Ordering::Equal)
}

fn eval_ord(
    value: &Value,
    rhs: &Value,
    fold: bool,
    test: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    if value.is_null() || rhs.is_null() {
        return false;
    }
    let ordering = if let (Value::String(a), Value::String(b)) = (value, rhs) {
        if fold {
            Some(a.to_lowercase().cmp(&b.to_lowercase()))
        } else {
            Some(a.cmp(b))
        }
    } else {
        value.compare(rhs)
    };
    ordering.is_some_and(test)
}
