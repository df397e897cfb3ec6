use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::errors::{QueryError, Result};
use crate::extensions::{Extensions, FilterFn, SortFn};
use crate::grammar::ParsedFilter;
use crate::options::QueryOptions;
use crate::registry::{Getter, PropertyMapper, PropertyMapping};
use crate::term::{FilterOperator, FilterTerm, SortTerm};
use crate::value::{compare_op, FieldValue, ValueKind};

type Predicate<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// The executable form of a parsed filter: an OR-of-ANDs predicate over
/// the registered properties, plus the custom-method invocations for
/// names the registry did not resolve. Custom methods run against the
/// whole partial result in term order, before the predicate — they live
/// outside the boolean expression, as in the original processor.
pub struct CompiledFilter<R> {
    predicate: Option<Predicate<R>>,
    custom: Vec<CustomFilterCall<R>>,
}

struct CustomFilterCall<R> {
    func: FilterFn<R>,
    operator: String,
    values: Vec<String>,
}

impl<R> std::fmt::Debug for CompiledFilter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFilter")
            .field("has_predicate", &self.predicate.is_some())
            .field("custom_count", &self.custom.len())
            .finish()
    }
}

impl<R> CompiledFilter<R> {
    pub fn execute(&self, mut records: Vec<R>) -> Vec<R> {
        for call in &self.custom {
            records = (call.func)(records, &call.operator, &call.values);
        }
        if let Some(predicate) = &self.predicate {
            records.retain(|r| predicate(r));
        }
        records
    }

    /// Evaluate the property predicate against a single record. Custom
    /// method invocations are set-level and are not reflected here.
    pub fn matches(&self, record: &R) -> bool {
        self.predicate.as_ref().map(|p| p(record)).unwrap_or(true)
    }
}

/// Compile a parsed filter against the registry. All-or-nothing: any term
/// that fails (bad literal, unknown method, incompatible method) aborts
/// the whole compilation, so a partial filter is never applied.
pub fn compile_filter<R: 'static>(
    parsed: &ParsedFilter,
    registry: &PropertyMapper<R>,
    extensions: &Extensions,
    options: &QueryOptions,
) -> Result<CompiledFilter<R>> {
    let mut group_predicates: Vec<Predicate<R>> = Vec::new();
    let mut custom: Vec<CustomFilterCall<R>> = Vec::new();

    for group in &parsed.groups {
        let mut term_predicates: Vec<Predicate<R>> = Vec::new();

        for term in &group.terms {
            let mut atoms: Vec<Predicate<R>> = Vec::new();

            for name in &term.names {
                match registry.resolve(name, true, false, options.case_sensitive) {
                    Some(mapping) => {
                        for raw_value in &term.values {
                            atoms.push(build_atom(mapping, term, raw_value, options)?);
                        }
                    }
                    None => {
                        let func =
                            extensions.resolve_filter::<R>(name, options.case_sensitive)?;
                        custom.push(CustomFilterCall {
                            func,
                            operator: term.raw_symbol(),
                            values: term.values.clone(),
                        });
                    }
                }
            }

            // name alternatives and value alternatives both OR together
            if !atoms.is_empty() {
                term_predicates.push(any_of(atoms));
            }
        }

        if !term_predicates.is_empty() {
            group_predicates.push(all_of(term_predicates));
        }
    }

    debug!(
        groups = group_predicates.len(),
        custom_methods = custom.len(),
        "compiled filter"
    );

    let predicate = if group_predicates.is_empty() {
        None
    } else {
        Some(any_of(group_predicates))
    };

    Ok(CompiledFilter { predicate, custom })
}

fn all_of<R: 'static>(preds: Vec<Predicate<R>>) -> Predicate<R> {
    Arc::new(move |r| preds.iter().all(|p| p(r)))
}

fn any_of<R: 'static>(preds: Vec<Predicate<R>>) -> Predicate<R> {
    Arc::new(move |r| preds.iter().any(|p| p(r)))
}

/// One atomic comparison: a single name against a single value literal.
fn build_atom<R: 'static>(
    mapping: &PropertyMapping<R>,
    term: &FilterTerm,
    raw_value: &str,
    options: &QueryOptions,
) -> Result<Predicate<R>> {
    let op = term.operator;
    let kind = mapping.kind();

    let is_string_op = matches!(
        op,
        FilterOperator::Contains | FilterOperator::StartsWith | FilterOperator::EndsWith
    );
    if is_string_op && kind != ValueKind::Str {
        return Err(QueryError::UnsupportedOperator { operator: op, kind });
    }

    // `null` targets the property's absence; `\null` is the literal string
    // "null". For string properties only `==`/`!=` treat `null` specially,
    // so `Title@=null` searches for the text "null".
    let is_null_literal = raw_value.eq_ignore_ascii_case("null")
        && (kind != ValueKind::Str
            || matches!(op, FilterOperator::Equals | FilterOperator::NotEquals));

    let literal = if is_null_literal {
        None
    } else {
        let effective = if raw_value.eq_ignore_ascii_case("\\null") {
            "null"
        } else {
            raw_value
        };
        Some(FieldValue::parse_literal(effective, kind).ok_or_else(|| {
            QueryError::ValueConversion {
                name: mapping.name().to_string(),
                value: raw_value.to_string(),
                kind,
            }
        })?)
    };

    let getter = mapping.getter();
    let case_insensitive = term.case_insensitive && kind == ValueKind::Str;
    let negated = term.negated;
    let ignore_nulls = options.ignore_nulls_on_not_equal;

    Ok(Arc::new(move |record: &R| {
        match (getter(record), &literal) {
            // Absent intermediate path: the access is guarded off, except
            // that `!=` against a non-null literal matches when the
            // null-ignoring policy is off.
            (None, Some(_)) => op == FilterOperator::NotEquals && !ignore_nulls,
            (None, None) => false,
            (Some(value), None) => {
                let hit = match op {
                    FilterOperator::Equals => value.is_null(),
                    FilterOperator::NotEquals => !value.is_null(),
                    _ => false,
                };
                if negated {
                    !hit
                } else {
                    hit
                }
            }
            (Some(value), Some(literal)) => {
                if value.is_null() {
                    // the null guard sits outside the negation, so a null
                    // value never matches a negated operator either
                    return op == FilterOperator::NotEquals && !ignore_nulls;
                }
                let hit = compare_op(op, &value, literal, case_insensitive);
                if negated {
                    !hit
                } else {
                    hit
                }
            }
        }
    }))
}

/// One stage of a multi-key sort, in declaration order (first = primary).
enum SortStage<R> {
    Property {
        getter: Getter<R>,
        descending: bool,
    },
    Custom {
        func: SortFn<R>,
        descending: bool,
    },
}

/// The executable form of a sort string. Stages apply as stable sorts from
/// the last key to the first, which leaves the first term as the primary
/// order — the then-by chain of the original, without ordered-queryable
/// bookkeeping.
pub struct SortPlan<R> {
    stages: Vec<SortStage<R>>,
    nulls_last: bool,
}

impl<R> SortPlan<R> {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn execute(&self, mut records: Vec<R>) -> Vec<R> {
        for (index, stage) in self.stages.iter().enumerate().rev() {
            match stage {
                SortStage::Property { getter, descending } => {
                    let nulls_last = self.nulls_last;
                    records.sort_by(|a, b| {
                        let ord = cmp_values(
                            &getter(a).unwrap_or(FieldValue::Null),
                            &getter(b).unwrap_or(FieldValue::Null),
                            nulls_last,
                        );
                        if *descending {
                            ord.reverse()
                        } else {
                            ord
                        }
                    });
                }
                SortStage::Custom { func, descending } => {
                    records = func(records, index > 0, *descending);
                }
            }
        }
        records
    }
}

/// Null sorts below any non-null value unless `nulls_last` flips it; the
/// direction reversal happens after, so descending puts nulls at the back
/// by default.
fn cmp_values(a: &FieldValue, b: &FieldValue, nulls_last: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => {
            if nulls_last {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, true) => {
            if nulls_last {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, false) => a.total_cmp(b),
    }
}

/// Compile sort terms into a [`SortPlan`]. Unresolved names dispatch to
/// custom sort methods; dispatch failures abort compilation.
pub fn compile_sort<R: 'static>(
    terms: &[SortTerm],
    registry: &PropertyMapper<R>,
    extensions: &Extensions,
    options: &QueryOptions,
) -> Result<SortPlan<R>> {
    let mut stages = Vec::new();
    for term in terms {
        match registry.resolve(&term.name, false, true, options.case_sensitive) {
            Some(mapping) => stages.push(SortStage::Property {
                getter: mapping.getter(),
                descending: term.descending,
            }),
            None => {
                let func = extensions.resolve_sort::<R>(&term.name, options.case_sensitive)?;
                stages.push(SortStage::Custom {
                    func,
                    descending: term.descending,
                });
            }
        }
    }
    debug!(stages = stages.len(), "compiled sort plan");
    Ok(SortPlan {
        stages,
        nulls_last: options.nulls_last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parse_filters;
    use crate::registry::Queryable;

    #[derive(Debug, Clone, PartialEq)]
    struct Post {
        id: i64,
        title: &'static str,
        likes: i64,
        category: Option<i64>,
    }

    impl Queryable for Post {}

    fn posts() -> Vec<Post> {
        vec![
            Post { id: 0, title: "A", likes: 100, category: None },
            Post { id: 1, title: "B", likes: 50, category: Some(1) },
            Post { id: 2, title: "C", likes: 0, category: Some(1) },
            Post { id: 3, title: "D", likes: 3, category: Some(2) },
        ]
    }

    fn registry() -> PropertyMapper<Post> {
        let mut mapper = PropertyMapper::new();
        mapper
            .property("Title", ValueKind::Str, |p: &Post| {
                Some(FieldValue::Str(p.title.to_string()))
            })
            .can_filter()
            .can_sort();
        mapper
            .property("LikeCount", ValueKind::Int, |p: &Post| {
                Some(FieldValue::Int(p.likes))
            })
            .can_filter()
            .can_sort();
        mapper
            .property("CategoryId", ValueKind::Int, |p: &Post| {
                Some(p.category.map(FieldValue::Int).unwrap_or(FieldValue::Null))
            })
            .can_filter()
            .can_sort();
        mapper
    }

    fn run(filter: &str, options: &QueryOptions) -> Vec<i64> {
        let parsed = parse_filters(filter).unwrap().unwrap();
        let compiled =
            compile_filter(&parsed, &registry(), &Extensions::new(), options).unwrap();
        compiled
            .execute(posts())
            .into_iter()
            .map(|p| p.id)
            .collect()
    }

    #[test]
    fn and_group_intersects() {
        assert_eq!(run("CategoryId==1,LikeCount>10", &QueryOptions::default()), vec![1]);
    }

    #[test]
    fn or_groups_union() {
        assert_eq!(
            run("Title==A || Title==D", &QueryOptions::default()),
            vec![0, 3]
        );
    }

    #[test]
    fn name_alternatives_or_together() {
        // id 3 matches via LikeCount, no title equals "3"
        assert_eq!(
            run("(Title|LikeCount)==3", &QueryOptions::default()),
            vec![3]
        );
    }

    #[test]
    fn value_alternatives_or_together() {
        assert_eq!(run("Title==C|D", &QueryOptions::default()), vec![2, 3]);
    }

    #[test]
    fn negated_contains() {
        assert_eq!(run("Title!@=A", &QueryOptions::default()), vec![1, 2, 3]);
    }

    #[test]
    fn null_literal_matches_absent_category() {
        assert_eq!(run("CategoryId==null", &QueryOptions::default()), vec![0]);
        assert_eq!(
            run("CategoryId!=null", &QueryOptions::default()),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn not_equals_null_policy_branches() {
        // policy on (default): the null-category row is excluded
        assert_eq!(run("CategoryId!=1", &QueryOptions::default()), vec![3]);

        // policy off: null counts as "not equal to 1"
        let lenient = QueryOptions {
            ignore_nulls_on_not_equal: false,
            ..QueryOptions::default()
        };
        assert_eq!(run("CategoryId!=1", &lenient), vec![0, 3]);
    }

    #[test]
    fn string_operator_on_int_property_errors() {
        let parsed = parse_filters("LikeCount@=5").unwrap().unwrap();
        let err = compile_filter(
            &parsed,
            &registry(),
            &Extensions::new(),
            &QueryOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedOperator { .. }));
    }

    #[test]
    fn bad_literal_errors_with_context() {
        let parsed = parse_filters("LikeCount==abc").unwrap().unwrap();
        let err = compile_filter(
            &parsed,
            &registry(),
            &Extensions::new(),
            &QueryOptions::default(),
        )
        .unwrap_err();
        match err {
            QueryError::ValueConversion { name, value, .. } => {
                assert_eq!(name, "LikeCount");
                assert_eq!(value, "abc");
            }
            other => panic!("expected ValueConversion, got {other:?}"),
        }
    }

    #[test]
    fn escaped_null_is_the_string_null() {
        let mut mapper: PropertyMapper<Post> = registry();
        mapper
            .property("Raw", ValueKind::Str, |_p: &Post| {
                Some(FieldValue::Str("null".into()))
            })
            .can_filter();
        let parsed = parse_filters(r"Raw==\null").unwrap().unwrap();
        let compiled = compile_filter(
            &parsed,
            &mapper,
            &Extensions::new(),
            &QueryOptions::default(),
        )
        .unwrap();
        assert_eq!(compiled.execute(posts()).len(), 4);
    }

    #[test]
    fn contains_null_on_string_is_textual() {
        let mut mapper: PropertyMapper<Post> = registry();
        mapper
            .property("Raw", ValueKind::Str, |p: &Post| {
                Some(FieldValue::Str(if p.id == 2 {
                    "a null here".into()
                } else {
                    "other".into()
                }))
            })
            .can_filter();
        let parsed = parse_filters("Raw@=null").unwrap().unwrap();
        let compiled = compile_filter(
            &parsed,
            &mapper,
            &Extensions::new(),
            &QueryOptions::default(),
        )
        .unwrap();
        let ids: Vec<i64> = compiled.execute(posts()).into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn custom_method_applies_to_partial_result() {
        let mut ext = Extensions::new();
        ext.filter_method::<Post, _>("IsNew", |posts, _op, _values| {
            posts.into_iter().filter(|p: &Post| p.likes < 100).collect()
        });
        let parsed = parse_filters("IsNew").unwrap().unwrap();
        let compiled =
            compile_filter(&parsed, &registry(), &ext, &QueryOptions::default()).unwrap();
        let ids: Vec<i64> = compiled.execute(posts()).into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn property_sort_orders_records() {
        let plan = compile_sort(
            &crate::grammar::parse_sorts("-LikeCount"),
            &registry(),
            &Extensions::new(),
            &QueryOptions::default(),
        )
        .unwrap();
        let ids: Vec<i64> = plan.execute(posts()).into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 3, 2]);
    }

    #[test]
    fn multi_key_sort_first_term_is_primary() {
        let mut items = posts();
        items.push(Post { id: 4, title: "B", likes: 500, category: Some(3) });
        let plan = compile_sort(
            &crate::grammar::parse_sorts("Title,-LikeCount"),
            &registry(),
            &Extensions::new(),
            &QueryOptions::default(),
        )
        .unwrap();
        let ids: Vec<i64> = plan.execute(items).into_iter().map(|p| p.id).collect();
        // Titles ascending; within "B" the higher like count first
        assert_eq!(ids, vec![0, 4, 1, 2, 3]);
    }

    #[test]
    fn null_sorts_first_by_default_and_last_when_configured() {
        let plan = compile_sort(
            &crate::grammar::parse_sorts("CategoryId"),
            &registry(),
            &Extensions::new(),
            &QueryOptions::default(),
        )
        .unwrap();
        let first: Vec<i64> = plan.execute(posts()).into_iter().map(|p| p.id).collect();
        assert_eq!(first[0], 0, "null category sorts first");

        let plan = compile_sort(
            &crate::grammar::parse_sorts("CategoryId"),
            &registry(),
            &Extensions::new(),
            &QueryOptions {
                nulls_last: true,
                ..QueryOptions::default()
            },
        )
        .unwrap();
        let last: Vec<i64> = plan.execute(posts()).into_iter().map(|p| p.id).collect();
        assert_eq!(*last.last().unwrap(), 0, "null category sorts last");
    }

    #[test]
    fn custom_sort_stage_receives_subsequent_flag() {
        let mut ext = Extensions::new();
        ext.sort_method::<Post, _>("Popularity", |mut posts, subsequent, desc| {
            assert!(!subsequent, "primary key");
            posts.sort_by_key(|p: &Post| p.likes);
            if desc {
                posts.reverse();
            }
            posts
        });
        let plan = compile_sort(
            &crate::grammar::parse_sorts("Popularity"),
            &registry(),
            &ext,
            &QueryOptions::default(),
        )
        .unwrap();
        let ids: Vec<i64> = plan.execute(posts()).into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2, 3, 1, 0]);
    }
}
