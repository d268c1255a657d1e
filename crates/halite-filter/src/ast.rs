//! The predicate AST.

use halite_types::Value;

/// How string comparisons treat letter case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchMode {
    /// Exact comparison.
    #[default]
    CaseSensitive,
    /// Both sides are case-folded before comparing.
    CaseInsensitive,
}

/// The comparison an [`Atom`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Membership in a literal set.
    In,
    /// Regular-expression match on the field's textual form.
    Regex,
    /// Substring match on the field's textual form.
    Contains,
}

/// The right-hand side of an atom.
#[derive(Debug, Clone, PartialEq)]
pub enum Rhs {
    /// A single literal (possibly `Null`).
    Value(Value),
    /// A literal list, only legal with [`CompareOp::In`].
    Set(Vec<Value>),
    /// A regex pattern, only legal with [`CompareOp::Regex`].
    Pattern(String),
}

/// One field comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    /// Field name (resolved case-insensitively against the schema).
    pub field: String,
    pub op: CompareOp,
    pub rhs: Rhs,
    pub match_mode: MatchMode,
    /// Invert the comparison result (`!=`, `<>`, or a leading `NOT`).
    pub negated: bool,
}

impl Atom {
    /// A case-sensitive, non-negated comparison.
    pub fn new(field: impl Into<String>, op: CompareOp, rhs: Rhs) -> Self {
        Self {
            field: field.into(),
            op,
            rhs,
            match_mode: MatchMode::CaseSensitive,
            negated: false,
        }
    }
}

/// The boolean connective of a [`Group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

/// A boolean combination of child expressions.
///
/// Children evaluate left to right with short-circuiting: `And` stops on
/// the first false child, `Or` on the first true one. Mixed `AND`/`OR`
/// chains parse left-associatively, so `a AND b OR c` is `(a AND b) OR c`.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub op: BoolOp,
    pub children: Vec<Expr>,
}

/// A filter expression: a single atom or a group of them.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Atom(Atom),
    Group(Group),
}

impl From<Atom> for Expr {
    fn from(atom: Atom) -> Self {
        Expr::Atom(atom)
    }
}

impl From<Group> for Expr {
    fn from(group: Group) -> Self {
        Expr::Group(group)
    }
}
