use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

use crate::errors::{QueryError, Result};

/// A custom filter method: receives the current partial result, the raw
/// operator symbol, and the term's values, and returns the filtered
/// records.
pub type FilterFn<R> = Arc<dyn Fn(Vec<R>, &str, &[String]) -> Vec<R> + Send + Sync>;

/// A custom sort method: receives the records, whether this is a
/// subsequent (then-by) key, and the direction. A subsequent invocation
/// must sort stably by its own key so earlier keys keep precedence.
pub type SortFn<R> = Arc<dyn Fn(Vec<R>, bool, bool) -> Vec<R> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MethodKind {
    Filter,
    Sort,
}

/// Whether the method was registered for the record type directly or as an
/// instantiation of a generic method. Exact registrations win dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Exact,
    Generic,
}

struct Entry {
    name: String,
    kind: MethodKind,
    shape: Shape,
    type_id: TypeId,
    type_name: &'static str,
    callable: Box<dyn Any + Send + Sync>,
}

/// Named custom filter/sort methods for any number of record types.
/// Unrecognized query names fall through to this registry; a name known
/// only for a *different* record type is a distinct, diagnosable failure.
#[derive(Default)]
pub struct Extensions {
    entries: Vec<Entry>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter_method<R, F>(&mut self, name: &str, f: F)
    where
        R: 'static,
        F: Fn(Vec<R>, &str, &[String]) -> Vec<R> + Send + Sync + 'static,
    {
        self.push::<R>(name, MethodKind::Filter, Shape::Exact, Box::new(Arc::new(f) as FilterFn<R>));
    }

    /// Register a generic method instantiated for `R`. Equivalent to the
    /// original's `Filter<T>(...) where T : SomeTrait` overloads:
    /// monomorphization happens here, the shape tag keeps the dispatch
    /// preference (an exact method with the same name wins).
    pub fn filter_method_generic<R, F>(&mut self, name: &str, f: F)
    where
        R: 'static,
        F: Fn(Vec<R>, &str, &[String]) -> Vec<R> + Send + Sync + 'static,
    {
        self.push::<R>(name, MethodKind::Filter, Shape::Generic, Box::new(Arc::new(f) as FilterFn<R>));
    }

    pub fn sort_method<R, F>(&mut self, name: &str, f: F)
    where
        R: 'static,
        F: Fn(Vec<R>, bool, bool) -> Vec<R> + Send + Sync + 'static,
    {
        self.push::<R>(name, MethodKind::Sort, Shape::Exact, Box::new(Arc::new(f) as SortFn<R>));
    }

    pub fn sort_method_generic<R, F>(&mut self, name: &str, f: F)
    where
        R: 'static,
        F: Fn(Vec<R>, bool, bool) -> Vec<R> + Send + Sync + 'static,
    {
        self.push::<R>(name, MethodKind::Sort, Shape::Generic, Box::new(Arc::new(f) as SortFn<R>));
    }

    fn push<R: 'static>(
        &mut self,
        name: &str,
        kind: MethodKind,
        shape: Shape,
        callable: Box<dyn Any + Send + Sync>,
    ) {
        self.entries.retain(|e| {
            !(e.name == name
                && e.kind == kind
                && e.shape == shape
                && e.type_id == TypeId::of::<R>())
        });
        self.entries.push(Entry {
            name: name.to_string(),
            kind,
            shape,
            type_id: TypeId::of::<R>(),
            type_name: type_name::<R>(),
            callable,
        });
    }

    pub(crate) fn resolve_filter<R: 'static>(
        &self,
        name: &str,
        case_sensitive: bool,
    ) -> Result<FilterFn<R>> {
        self.resolve::<R, FilterFn<R>>(name, MethodKind::Filter, case_sensitive)
    }

    pub(crate) fn resolve_sort<R: 'static>(
        &self,
        name: &str,
        case_sensitive: bool,
    ) -> Result<SortFn<R>> {
        self.resolve::<R, SortFn<R>>(name, MethodKind::Sort, case_sensitive)
    }

    /// Dispatch: exact method for `R` first, then a generic instantiation
    /// for `R`; a name registered only for other record types is
    /// `IncompatibleMethod`, an unknown name is `MethodNotFound`.
    fn resolve<R: 'static, C: Clone + 'static>(
        &self,
        name: &str,
        kind: MethodKind,
        case_sensitive: bool,
    ) -> Result<C> {
        let candidates: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|e| {
                e.kind == kind
                    && if case_sensitive {
                        e.name == name
                    } else {
                        e.name.eq_ignore_ascii_case(name)
                    }
            })
            .collect();

        if candidates.is_empty() {
            return Err(QueryError::MethodNotFound {
                name: name.to_string(),
            });
        }

        for shape in [Shape::Exact, Shape::Generic] {
            if let Some(entry) = candidates
                .iter()
                .find(|e| e.shape == shape && e.type_id == TypeId::of::<R>())
            {
                let callable = entry
                    .callable
                    .downcast_ref::<C>()
                    .expect("entry type id matches the stored callable");
                return Ok(callable.clone());
            }
        }

        Err(QueryError::IncompatibleMethod {
            name: name.to_string(),
            expected: type_name::<R>(),
            actual: candidates[0].type_name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Post {
        likes: i64,
    }

    #[derive(Clone)]
    struct Comment;

    #[test]
    fn exact_method_dispatches() {
        let mut ext = Extensions::new();
        ext.filter_method::<Post, _>("IsNew", |posts, _op, _values| {
            posts.into_iter().filter(|p: &Post| p.likes < 100).collect()
        });

        let f = ext.resolve_filter::<Post>("IsNew", true).unwrap();
        let out = f(
            vec![Post { likes: 10 }, Post { likes: 500 }],
            "==",
            &[],
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn exact_wins_over_generic() {
        let mut ext = Extensions::new();
        ext.filter_method_generic::<Post, _>("Latest", |posts, _, _| posts);
        ext.filter_method::<Post, _>("Latest", |_, _, _| Vec::new());

        let f = ext.resolve_filter::<Post>("Latest", true).unwrap();
        assert!(f(vec![Post { likes: 1 }], "==", &[]).is_empty());
    }

    #[test]
    fn generic_method_reachable_when_no_exact() {
        let mut ext = Extensions::new();
        ext.filter_method_generic::<Post, _>("Latest", |posts, _, _| posts);
        assert!(ext.resolve_filter::<Post>("Latest", true).is_ok());
    }

    #[test]
    fn unknown_name_is_method_not_found() {
        let ext = Extensions::new();
        match ext.resolve_filter::<Post>("Nope", true) {
            Err(QueryError::MethodNotFound { name }) => assert_eq!(name, "Nope"),
            other => panic!("expected MethodNotFound, got {:?}", other.err()),
        }
    }

    #[test]
    fn wrong_record_type_is_incompatible() {
        let mut ext = Extensions::new();
        ext.filter_method::<Comment, _>("TestComment", |c, _, _| c);

        match ext.resolve_filter::<Post>("TestComment", true) {
            Err(QueryError::IncompatibleMethod { name, .. }) => {
                assert_eq!(name, "TestComment")
            }
            other => panic!("expected IncompatibleMethod, got {:?}", other.err()),
        }
    }

    #[test]
    fn filter_and_sort_namespaces_are_separate() {
        let mut ext = Extensions::new();
        ext.sort_method::<Post, _>("Popularity", |p, _, _| p);
        assert!(matches!(
            ext.resolve_filter::<Post>("Popularity", true),
            Err(QueryError::MethodNotFound { .. })
        ));
        assert!(ext.resolve_sort::<Post>("Popularity", true).is_ok());
    }

    #[test]
    fn case_insensitive_lookup() {
        let mut ext = Extensions::new();
        ext.filter_method::<Post, _>("IsNew", |p, _, _| p);
        assert!(ext.resolve_filter::<Post>("isnew", false).is_ok());
        assert!(matches!(
            ext.resolve_filter::<Post>("isnew", true),
            Err(QueryError::MethodNotFound { .. })
        ));
    }
}
