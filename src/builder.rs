use chrono::{DateTime, Utc};

use crate::errors::{QueryError, Result};
use crate::model::QueryModel;
use crate::term::FilterOperator;

/// Fluent, persistent builder for query strings — the inverse of the
/// grammar parser. Every call consumes and returns the builder by value,
/// so intermediate states are plain values: clone one to branch a query,
/// compare snapshots with `==`.
///
/// ```ignore
/// let model = QueryBuilder::new()
///     .begin_group()
///     .filter_eq("Processor", "Intel i9")
///     .or()
///     .filter_eq("Processor", "AMD Ryzen 9")
///     .end_group()
///     .filter_gt("Price", 1000)
///     .sort_by_desc("Price")
///     .page(1)
///     .page_size(20)
///     .build()?;
/// // filters: (Processor==Intel i9 || Processor==AMD Ryzen 9),Price>1000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryBuilder {
    current: Segment,
    stack: Vec<Segment>,
    sorts: Vec<String>,
    page: Option<usize>,
    page_size: Option<usize>,
    unbalanced: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Segment {
    parts: Vec<Part>,
    is_or: bool,
    wrap: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Term(String),
    Group(Segment),
}

impl Segment {
    fn render(&self) -> String {
        let separator = if self.is_or { " || " } else { "," };
        let rendered: Vec<String> = self
            .parts
            .iter()
            .map(|p| match p {
                Part::Term(t) => t.clone(),
                Part::Group(g) => g.render(),
            })
            .filter(|s| !s.is_empty())
            .collect();
        let joined = rendered.join(separator);
        if self.wrap && rendered.len() > 1 {
            format!("({joined})")
        } else {
            joined
        }
    }
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter clause with an explicit operator.
    pub fn filter(self, name: &str, op: FilterOperator, value: impl ToFilterValue) -> Self {
        self.filter_symbol(name, op.symbol(), value)
    }

    /// Append a filter clause with a raw operator symbol, for the negated
    /// and case-insensitive forms (`!@=`, `==*`, ...).
    pub fn filter_symbol(
        mut self,
        name: &str,
        symbol: &str,
        value: impl ToFilterValue,
    ) -> Self {
        let term = format!("{name}{symbol}{}", value.to_filter_value());
        self.current.parts.push(Part::Term(term));
        self
    }

    pub fn filter_eq(self, name: &str, value: impl ToFilterValue) -> Self {
        self.filter(name, FilterOperator::Equals, value)
    }

    pub fn filter_ne(self, name: &str, value: impl ToFilterValue) -> Self {
        self.filter(name, FilterOperator::NotEquals, value)
    }

    pub fn filter_gt(self, name: &str, value: impl ToFilterValue) -> Self {
        self.filter(name, FilterOperator::GreaterThan, value)
    }

    pub fn filter_lt(self, name: &str, value: impl ToFilterValue) -> Self {
        self.filter(name, FilterOperator::LessThan, value)
    }

    pub fn filter_gte(self, name: &str, value: impl ToFilterValue) -> Self {
        self.filter(name, FilterOperator::GreaterOrEqual, value)
    }

    pub fn filter_lte(self, name: &str, value: impl ToFilterValue) -> Self {
        self.filter(name, FilterOperator::LessOrEqual, value)
    }

    pub fn filter_contains(self, name: &str, value: impl ToFilterValue) -> Self {
        self.filter(name, FilterOperator::Contains, value)
    }

    pub fn filter_starts_with(self, name: &str, value: impl ToFilterValue) -> Self {
        self.filter(name, FilterOperator::StartsWith, value)
    }

    pub fn filter_ends_with(self, name: &str, value: impl ToFilterValue) -> Self {
        self.filter(name, FilterOperator::EndsWith, value)
    }

    /// Switch the current (group or top-level) chain to OR separators.
    pub fn or(mut self) -> Self {
        self.current.is_or = true;
        self
    }

    /// Open a parenthesized group; clauses added until the matching
    /// [`end_group`](Self::end_group) belong to it.
    pub fn begin_group(mut self) -> Self {
        let parent = std::mem::take(&mut self.current);
        self.stack.push(parent);
        self.current = Segment {
            wrap: true,
            ..Segment::default()
        };
        self
    }

    pub fn end_group(mut self) -> Self {
        match self.stack.pop() {
            Some(mut parent) => {
                let finished = std::mem::replace(&mut self.current, Segment::default());
                parent.parts.push(Part::Group(finished));
                self.current = parent;
            }
            None => self.unbalanced = true,
        }
        self
    }

    /// One property, several accepted values: emits a parenthesized OR
    /// group (`(Name==a || Name==b)`). No-op for an empty slice.
    pub fn filter_any<V: ToFilterValue>(mut self, name: &str, values: &[V]) -> Self {
        if values.is_empty() {
            return self;
        }
        self = self.begin_group();
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self = self.or();
            }
            self = self.filter_eq(name, value);
        }
        self.end_group()
    }

    pub fn sort_by(mut self, name: &str) -> Self {
        self.sorts.push(name.to_string());
        self
    }

    pub fn sort_by_desc(mut self, name: &str) -> Self {
        self.sorts.push(format!("-{name}"));
        self
    }

    pub fn page(mut self, page: usize) -> Self {
        self.page = Some(page);
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Render the filter string. Errors if any group is still open or
    /// `end_group` ran without a matching `begin_group`.
    pub fn filters_string(&self) -> Result<String> {
        if self.unbalanced || !self.stack.is_empty() {
            return Err(QueryError::UnbalancedBuilder);
        }
        Ok(self.current.render())
    }

    pub fn sorts_string(&self) -> String {
        self.sorts.join(",")
    }

    /// Render the full URL query string
    /// (`filters=...&sorts=...&page=...&pageSize=...`).
    pub fn query_string(&self) -> Result<String> {
        let mut parts = Vec::new();
        let filters = self.filters_string()?;
        if !filters.is_empty() {
            parts.push(format!("filters={}", urlencoding::encode(&filters)));
        }
        let sorts = self.sorts_string();
        if !sorts.is_empty() {
            parts.push(format!("sorts={}", urlencoding::encode(&sorts)));
        }
        if let Some(page) = self.page {
            parts.push(format!("page={page}"));
        }
        if let Some(page_size) = self.page_size {
            parts.push(format!("pageSize={page_size}"));
        }
        Ok(parts.join("&"))
    }

    pub fn build(self) -> Result<QueryModel> {
        let filters = self.filters_string()?;
        let sorts = self.sorts_string();
        Ok(QueryModel {
            filters: (!filters.is_empty()).then_some(filters),
            sorts: (!sorts.is_empty()).then_some(sorts),
            page: self.page,
            page_size: self.page_size,
        })
    }
}

/// Values the builder can render into a filter string. Strings get their
/// separator characters escaped so they round-trip through the parser;
/// datetimes render as RFC 3339 UTC with millisecond precision.
pub trait ToFilterValue {
    fn to_filter_value(&self) -> String;
}

fn escape_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, ',' | '|' | '(' | ')') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl ToFilterValue for str {
    fn to_filter_value(&self) -> String {
        escape_value(self)
    }
}

impl ToFilterValue for String {
    fn to_filter_value(&self) -> String {
        escape_value(self)
    }
}

impl ToFilterValue for bool {
    fn to_filter_value(&self) -> String {
        self.to_string()
    }
}

impl ToFilterValue for DateTime<Utc> {
    fn to_filter_value(&self) -> String {
        self.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }
}

macro_rules! filter_value_display {
    ($($ty:ty),*) => {
        $(impl ToFilterValue for $ty {
            fn to_filter_value(&self) -> String {
                self.to_string()
            }
        })*
    };
}

filter_value_display!(i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);

impl<T: ToFilterValue + ?Sized> ToFilterValue for &T {
    fn to_filter_value(&self) -> String {
        (**self).to_filter_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_and_chain() {
        let s = QueryBuilder::new()
            .filter_eq("Title", "A")
            .filter_gt("LikeCount", 100)
            .filters_string()
            .unwrap();
        assert_eq!(s, "Title==A,LikeCount>100");
    }

    #[test]
    fn renders_top_level_or() {
        let s = QueryBuilder::new()
            .filter_eq("CpuModel", "Intel i9")
            .or()
            .filter_eq("CpuModel", "AMD Ryzen 9")
            .filters_string()
            .unwrap();
        assert_eq!(s, "CpuModel==Intel i9 || CpuModel==AMD Ryzen 9");
    }

    #[test]
    fn renders_group_with_shared_constraints() {
        let s = QueryBuilder::new()
            .begin_group()
            .filter_eq("Processor", "Intel")
            .or()
            .filter_eq("Processor", "AMD")
            .end_group()
            .filter_gte("Price", 1000)
            .filter_lte("Price", 2000)
            .filters_string()
            .unwrap();
        assert_eq!(s, "(Processor==Intel || Processor==AMD),Price>=1000,Price<=2000");
    }

    #[test]
    fn single_clause_group_drops_parens() {
        let s = QueryBuilder::new()
            .begin_group()
            .filter_eq("A", 1)
            .end_group()
            .filter_eq("B", 2)
            .filters_string()
            .unwrap();
        assert_eq!(s, "A==1,B==2");
    }

    #[test]
    fn filter_any_builds_alternative_group() {
        let s = QueryBuilder::new()
            .filter_any("Processor", &["Intel i9", "AMD Ryzen 9", "Apple M2"])
            .filter_gt("Price", 1000)
            .filters_string()
            .unwrap();
        assert_eq!(
            s,
            "(Processor==Intel i9 || Processor==AMD Ryzen 9 || Processor==Apple M2),Price>1000"
        );
    }

    #[test]
    fn escapes_separator_characters_in_values() {
        let s = QueryBuilder::new()
            .filter_eq("Text", "a,b|c(d)")
            .filters_string()
            .unwrap();
        assert_eq!(s, r"Text==a\,b\|c\(d\)");
    }

    #[test]
    fn raw_symbol_filters() {
        let s = QueryBuilder::new()
            .filter_symbol("Title", "!@=", "draft")
            .filter_symbol("Author", "==*", "bob")
            .filters_string()
            .unwrap();
        assert_eq!(s, "Title!@=draft,Author==*bob");
    }

    #[test]
    fn datetime_renders_utc_millis() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let s = QueryBuilder::new()
            .filter_gte("CreatedDate", dt)
            .filters_string()
            .unwrap();
        assert_eq!(s, "CreatedDate>=2024-03-01T10:00:00.000Z");
    }

    #[test]
    fn sorts_and_paging() {
        let model = QueryBuilder::new()
            .filter_eq("A", 1)
            .sort_by("Title")
            .sort_by_desc("CreatedDate")
            .page(2)
            .page_size(25)
            .build()
            .unwrap();
        assert_eq!(model.sorts.as_deref(), Some("Title,-CreatedDate"));
        assert_eq!(model.page, Some(2));
        assert_eq!(model.page_size, Some(25));
    }

    #[test]
    fn query_string_is_urlencoded() {
        let q = QueryBuilder::new()
            .filter_gt("Price", 100)
            .sort_by_desc("Price")
            .page(1)
            .page_size(10)
            .query_string()
            .unwrap();
        assert_eq!(q, "filters=Price%3E100&sorts=-Price&page=1&pageSize=10");
    }

    #[test]
    fn unbalanced_groups_error() {
        assert!(matches!(
            QueryBuilder::new().begin_group().filter_eq("A", 1).build(),
            Err(QueryError::UnbalancedBuilder)
        ));
        assert!(matches!(
            QueryBuilder::new().end_group().build(),
            Err(QueryError::UnbalancedBuilder)
        ));
    }

    #[test]
    fn builder_snapshots_are_values() {
        let base = QueryBuilder::new().filter_eq("A", 1);
        let left = base.clone().filter_eq("B", 2);
        let right = base.filter_eq("B", 2);
        assert_eq!(left, right);
    }
}
