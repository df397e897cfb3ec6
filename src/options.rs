use serde::{Deserialize, Serialize};

/// Engine configuration. There are no process-wide defaults: an options
/// value is handed to the engine builder explicitly and never mutated
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Match property and custom-method names exactly. Off by default.
    pub case_sensitive: bool,

    /// Page size used when the query model carries none. `0` leaves
    /// pagination off unless the query asks for it.
    pub default_page_size: usize,

    /// Upper bound on the number of records a page may return; `0` means
    /// unbounded. The offset stride stays the requested page size even
    /// when this cap shrinks the page.
    pub max_page_size: usize,

    /// Propagate errors to the caller (the default). When off, a failing
    /// phase is swallowed and the records pass through as they stood
    /// after the last successful phase.
    pub throw_errors: bool,

    /// When on (the default), records whose value is null — or whose
    /// access path breaks off at an absent intermediate — are excluded
    /// from `!=` matches, same as for every other operator. When off,
    /// null is considered "not equal" to any non-null literal.
    pub ignore_nulls_on_not_equal: bool,

    /// Sort null values after non-null values instead of before.
    pub nulls_last: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            case_sensitive: false,
            default_page_size: 0,
            max_page_size: 0,
            throw_errors: true,
            ignore_nulls_on_not_equal: true,
            nulls_last: false,
        }
    }
}
