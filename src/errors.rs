use thiserror::Error;

use crate::term::FilterOperator;
use crate::value::ValueKind;

/// Everything that can go wrong between receiving a query string and
/// returning a result set.
#[derive(Debug, Error)]
pub enum QueryError {
    /// An opening parenthesis with no matching close. `position` is the
    /// byte offset of the offending `(` in the filter string.
    #[error("unmatched opening parenthesis at position {position}")]
    UnmatchedGroup { position: usize },

    /// A filter or sort name matched no registered property and no custom
    /// method of any record type.
    #[error("custom method `{name}` not found")]
    MethodNotFound { name: String },

    /// A custom method with this name exists, but only for a different
    /// record type.
    #[error("custom method `{name}` expects record type `{expected}` but is registered for `{actual}`")]
    IncompatibleMethod {
        name: String,
        expected: &'static str,
        actual: String,
    },

    /// A filter literal could not be converted to the property's declared
    /// value kind.
    #[error("cannot convert `{value}` to {kind:?} for property `{name}`")]
    ValueConversion {
        name: String,
        value: String,
        kind: ValueKind,
    },

    /// The operator is not defined for the property's declared value kind,
    /// e.g. `@=` on a numeric property.
    #[error("operator {operator:?} is not supported for {kind:?} properties")]
    UnsupportedOperator {
        operator: FilterOperator,
        kind: ValueKind,
    },

    /// `end_group` without `begin_group`, or `build` with a group still
    /// open.
    #[error("unbalanced begin_group/end_group calls on the query builder")]
    UnbalancedBuilder,
}

pub type Result<T> = std::result::Result<T, QueryError>;
