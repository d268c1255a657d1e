//! Filter error types.

use halite_types::TypeError;

/// Errors from parsing, compiling, or evaluating a filter expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    /// The filter text is malformed; `position` is the byte offset near the
    /// offending token.
    #[error("invalid filter construct near position {position}: {message}")]
    InvalidFilterConstruct { position: usize, message: String },

    /// The filter references a field the schema does not have.
    #[error("unknown field '{name}' in filter")]
    UnknownField { name: String },

    /// `IN` was evaluated against something other than a value list.
    #[error("the IN operator requires a hash set of values")]
    HashSetExpected,

    /// A `REGEX` pattern failed to compile.
    #[error("invalid regex pattern: {reason}")]
    InvalidRegex { reason: String },

    /// A literal could not be coerced to the field's type.
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl FilterError {
    pub(crate) fn construct(position: usize, message: impl Into<String>) -> Self {
        FilterError::InvalidFilterConstruct {
            position,
            message: message.into(),
        }
    }
}
