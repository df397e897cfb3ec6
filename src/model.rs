use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::grammar::{self, ParsedFilter};
use crate::term::SortTerm;

/// The query a client submits: raw filter and sort strings plus 1-based
/// pagination. This is the unit the engine's `apply` consumes and the
/// query builder produces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryModel {
    pub filters: Option<String>,
    pub sorts: Option<String>,
    pub page: Option<usize>,
    #[serde(alias = "page_size")]
    pub page_size: Option<usize>,
}

impl QueryModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filters(mut self, filters: impl Into<String>) -> Self {
        self.filters = Some(filters.into());
        self
    }

    pub fn with_sorts(mut self, sorts: impl Into<String>) -> Self {
        self.sorts = Some(sorts.into());
        self
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Parse the filter string, if any.
    pub fn filters_parsed(&self) -> Result<Option<ParsedFilter>> {
        match &self.filters {
            Some(raw) => grammar::parse_filters(raw),
            None => Ok(None),
        }
    }

    /// Parse the sort string, if any. Blank and duplicate entries are
    /// dropped.
    pub fn sorts_parsed(&self) -> Vec<SortTerm> {
        match &self.sorts {
            Some(raw) => grammar::parse_sorts(raw),
            None => Vec::new(),
        }
    }
}
