use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::term::FilterOperator;

/// The semantic type a registered property declares. The comparison
/// behavior of every operator is fixed by this kind at compile time, not
/// discovered from the runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Str,
    DateTime,
}

impl FromStr for ValueKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bool" => Ok(ValueKind::Bool),
            "int" => Ok(ValueKind::Int),
            "float" => Ok(ValueKind::Float),
            "str" | "string" => Ok(ValueKind::Str),
            "datetime" | "date" => Ok(ValueKind::DateTime),
            other => Err(format!("unknown value kind `{other}`")),
        }
    }
}

/// A boxed field value pulled out of a record, or supplied as a filter
/// literal after conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    DateTime(DateTime<Utc>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Str(s) => write!(f, "{s}"),
            FieldValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
        }
    }
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Convert a filter literal to this kind. Returns `None` when the text
    /// does not convert; the caller turns that into a `ValueConversion`
    /// error carrying the property name.
    pub fn parse_literal(raw: &str, kind: ValueKind) -> Option<FieldValue> {
        match kind {
            ValueKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Some(FieldValue::Bool(true)),
                "false" | "0" => Some(FieldValue::Bool(false)),
                _ => None,
            },
            ValueKind::Int => raw.parse::<i64>().ok().map(FieldValue::Int),
            ValueKind::Float => raw.parse::<f64>().ok().map(FieldValue::Float),
            ValueKind::Str => Some(FieldValue::Str(raw.to_string())),
            ValueKind::DateTime => parse_datetime(raw).map(FieldValue::DateTime),
        }
    }

    /// Total ordering for sorting: null sorts below everything, float uses
    /// IEEE total ordering with NaN greatest. Values of different kinds
    /// never meet here because a sort key has one declared kind.
    pub fn total_cmp(&self, other: &FieldValue) -> Ordering {
        use FieldValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }

    /// Partial ordering for filter comparisons: defined only for non-null
    /// operands of the same kind.
    fn ordering(&self, other: &FieldValue) -> Option<Ordering> {
        use FieldValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Str(a), Str(b)) => Some(a.cmp(b)),
            (DateTime(a), DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Apply a filter operator to a record value and a converted literal.
/// Both operands are non-null and of the term's declared kind; the null
/// policy lives in the compiler. `case_insensitive` upper-cases both sides
/// of string comparisons (the `*` modifier).
pub fn compare_op(
    op: FilterOperator,
    lhs: &FieldValue,
    rhs: &FieldValue,
    case_insensitive: bool,
) -> bool {
    if case_insensitive {
        if let (FieldValue::Str(a), FieldValue::Str(b)) = (lhs, rhs) {
            return compare_op(
                op,
                &FieldValue::Str(a.to_uppercase()),
                &FieldValue::Str(b.to_uppercase()),
                false,
            );
        }
    }

    match op {
        FilterOperator::Equals => lhs.ordering(rhs) == Some(Ordering::Equal),
        FilterOperator::NotEquals => lhs.ordering(rhs) != Some(Ordering::Equal),
        FilterOperator::GreaterThan => lhs.ordering(rhs) == Some(Ordering::Greater),
        FilterOperator::LessThan => lhs.ordering(rhs) == Some(Ordering::Less),
        FilterOperator::GreaterOrEqual => {
            matches!(lhs.ordering(rhs), Some(Ordering::Greater | Ordering::Equal))
        }
        FilterOperator::LessOrEqual => {
            matches!(lhs.ordering(rhs), Some(Ordering::Less | Ordering::Equal))
        }
        FilterOperator::Contains => match (lhs, rhs) {
            (FieldValue::Str(a), FieldValue::Str(b)) => a.contains(b.as_str()),
            _ => false,
        },
        FilterOperator::StartsWith => match (lhs, rhs) {
            (FieldValue::Str(a), FieldValue::Str(b)) => a.starts_with(b.as_str()),
            _ => false,
        },
        FilterOperator::EndsWith => match (lhs, rhs) {
            (FieldValue::Str(a), FieldValue::Str(b)) => a.ends_with(b.as_str()),
            _ => false,
        },
    }
}

/// Accepts RFC 3339 (`2024-03-01T10:00:00.000Z`, offset variants), a bare
/// `yyyy-mm-ddThh:mm:ss[.fff]`, or a bare date. Naive inputs are read as
/// UTC.
fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}
