use tracing::debug;

use crate::compiler::{compile_filter, compile_sort, CompiledFilter, SortPlan};
use crate::errors::{QueryError, Result};
use crate::extensions::Extensions;
use crate::model::QueryModel;
use crate::options::QueryOptions;
use crate::registry::{PropertyMapper, Queryable};

/// Which of the three phases `apply_parts` runs. The order is always
/// filter, then sort, then paginate.
#[derive(Debug, Clone, Copy)]
pub struct ApplyParts {
    pub filter: bool,
    pub sort: bool,
    pub paginate: bool,
}

impl Default for ApplyParts {
    fn default() -> Self {
        ApplyParts {
            filter: true,
            sort: true,
            paginate: true,
        }
    }
}

/// The single entry point: holds the configured options, the property
/// registry, and the custom-method registry, all read-only after
/// [`QueryEngineBuilder::build`]. Queries running concurrently share the
/// engine by reference.
pub struct QueryEngine<R> {
    options: QueryOptions,
    mapper: PropertyMapper<R>,
    extensions: Extensions,
}

impl<R: Queryable + Clone + 'static> QueryEngine<R> {
    pub fn builder() -> QueryEngineBuilder<R> {
        QueryEngineBuilder::new()
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Filter, sort, and paginate `source` according to `model`.
    pub fn apply<I>(&self, model: &QueryModel, source: I) -> Result<Vec<R>>
    where
        I: IntoIterator<Item = R>,
    {
        self.apply_parts(model, source, ApplyParts::default())
    }

    /// Like [`apply`](Self::apply) with individual phases switched off.
    /// With `throw_errors` disabled a failing phase returns the records as
    /// they stood after the last successful phase; a partially compiled
    /// filter is never applied.
    pub fn apply_parts<I>(&self, model: &QueryModel, source: I, parts: ApplyParts) -> Result<Vec<R>>
    where
        I: IntoIterator<Item = R>,
    {
        let mut records: Vec<R> = source.into_iter().collect();

        if parts.filter {
            match self.compile_filter(model) {
                Ok(Some(compiled)) => {
                    let before = records.len();
                    records = compiled.execute(records);
                    debug!(before, after = records.len(), "applied filtering");
                }
                Ok(None) => {}
                Err(e) => return self.fail(records, e),
            }
        }

        if parts.sort {
            match self.compile_sort(model) {
                Ok(plan) if !plan.is_empty() => records = plan.execute(records),
                Ok(_) => {}
                Err(e) => return self.fail(records, e),
            }
        }

        if parts.paginate {
            records = self.paginate(model, records);
        }

        Ok(records)
    }

    /// Compile the model's filter string without running it. `None` when
    /// the model carries no filter.
    pub fn compile_filter(&self, model: &QueryModel) -> Result<Option<CompiledFilter<R>>> {
        match model.filters_parsed()? {
            Some(parsed) => Ok(Some(compile_filter(
                &parsed,
                &self.mapper,
                &self.extensions,
                &self.options,
            )?)),
            None => Ok(None),
        }
    }

    /// Compile the model's sort string without running it. The plan is
    /// empty when the model carries no usable sort terms.
    pub fn compile_sort(&self, model: &QueryModel) -> Result<SortPlan<R>> {
        compile_sort(
            &model.sorts_parsed(),
            &self.mapper,
            &self.extensions,
            &self.options,
        )
    }

    fn paginate(&self, model: &QueryModel, records: Vec<R>) -> Vec<R> {
        let page = model.page.unwrap_or(1).max(1);
        let page_size = model.page_size.unwrap_or(self.options.default_page_size);
        if page_size == 0 {
            return records;
        }
        let take = if self.options.max_page_size > 0 {
            page_size.min(self.options.max_page_size)
        } else {
            page_size
        };
        // the offset stride stays the requested page size even when
        // max_page_size trims the returned count
        records
            .into_iter()
            .skip((page - 1) * page_size)
            .take(take)
            .collect()
    }

    fn fail(&self, records: Vec<R>, error: QueryError) -> Result<Vec<R>> {
        if self.options.throw_errors {
            Err(error)
        } else {
            debug!(%error, "suppressed query error");
            Ok(records)
        }
    }
}

/// Configures a [`QueryEngine`]: options, property mappings, and custom
/// methods. The record's own [`Queryable::declared_properties`] merge in
/// at build time as the lower-priority source.
pub struct QueryEngineBuilder<R> {
    options: QueryOptions,
    mapper: PropertyMapper<R>,
    extensions: Extensions,
}

impl<R: Queryable + Clone + 'static> Default for QueryEngineBuilder<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Queryable + Clone + 'static> QueryEngineBuilder<R> {
    pub fn new() -> Self {
        QueryEngineBuilder {
            options: QueryOptions::default(),
            mapper: PropertyMapper::new(),
            extensions: Extensions::new(),
        }
    }

    pub fn options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Register property mappings through the fluent mapper API.
    pub fn configure(mut self, f: impl FnOnce(&mut PropertyMapper<R>)) -> Self {
        f(&mut self.mapper);
        self
    }

    /// Register a custom filter method. `T` is usually `R`; registering
    /// for another record type leaves the name visible for diagnostics
    /// (querying it from this engine raises `IncompatibleMethod`).
    pub fn filter_method<T, F>(mut self, name: &str, f: F) -> Self
    where
        T: 'static,
        F: Fn(Vec<T>, &str, &[String]) -> Vec<T> + Send + Sync + 'static,
    {
        self.extensions.filter_method::<T, _>(name, f);
        self
    }

    /// Register a generic custom filter method instantiated for `T`.
    pub fn filter_method_generic<T, F>(mut self, name: &str, f: F) -> Self
    where
        T: 'static,
        F: Fn(Vec<T>, &str, &[String]) -> Vec<T> + Send + Sync + 'static,
    {
        self.extensions.filter_method_generic::<T, _>(name, f);
        self
    }

    /// Register a custom sort method. A subsequent-key invocation must
    /// sort stably by its own key so earlier keys keep precedence.
    pub fn sort_method<T, F>(mut self, name: &str, f: F) -> Self
    where
        T: 'static,
        F: Fn(Vec<T>, bool, bool) -> Vec<T> + Send + Sync + 'static,
    {
        self.extensions.sort_method::<T, _>(name, f);
        self
    }

    /// Register a generic custom sort method instantiated for `T`.
    pub fn sort_method_generic<T, F>(mut self, name: &str, f: F) -> Self
    where
        T: 'static,
        F: Fn(Vec<T>, bool, bool) -> Vec<T> + Send + Sync + 'static,
    {
        self.extensions.sort_method_generic::<T, _>(name, f);
        self
    }

    /// Replace the whole extensions registry, e.g. to share one across
    /// engines for several record types.
    pub fn extensions(mut self, extensions: Extensions) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn build(mut self) -> QueryEngine<R> {
        self.mapper.set_declared(R::declared_properties());
        QueryEngine {
            options: self.options,
            mapper: self.mapper,
            extensions: self.extensions,
        }
    }
}
