//! Filter, sort, and paginate typed collections from a compact query
//! grammar.
//!
//! A client describes its query as plain text — `Price>100,(Brand==Dell
//! || Brand==HP)` — and `sifter` compiles it into an executable filter
//! and ordering over a whitelisted set of properties. Nothing outside the
//! registered whitelist is reachable, so the grammar is safe to expose on
//! an API surface.
//!
//! ```ignore
//! use sifter::{FieldValue, QueryEngine, QueryModel, Queryable, ValueKind};
//!
//! #[derive(Clone)]
//! struct Product { brand: String, price: i64 }
//! impl Queryable for Product {}
//!
//! let engine = QueryEngine::builder()
//!     .configure(|map| {
//!         map.property("Brand", ValueKind::Str,
//!             |p: &Product| Some(FieldValue::Str(p.brand.clone())))
//!             .can_filter();
//!         map.property("Price", ValueKind::Int,
//!             |p: &Product| Some(FieldValue::Int(p.price)))
//!             .can_filter()
//!             .can_sort();
//!     })
//!     .build();
//!
//! let model = QueryModel::new()
//!     .with_filters("Price>100,(Brand==Dell || Brand==HP)")
//!     .with_sorts("-Price");
//! let hits = engine.apply(&model, products)?;
//! ```
//!
//! Names the registry does not know fall through to named custom
//! filter/sort methods, so computed filters plug in without widening the
//! grammar. [`QueryBuilder`] assembles query strings programmatically and
//! round-trips through the parser.

pub mod builder;
pub mod compiler;
pub mod engine;
pub mod errors;
pub mod extensions;
pub mod grammar;
pub mod model;
pub mod options;
pub mod registry;
pub mod term;
pub mod value;

pub use builder::{QueryBuilder, ToFilterValue};
pub use engine::{ApplyParts, QueryEngine, QueryEngineBuilder};
pub use errors::{QueryError, Result};
pub use extensions::Extensions;
pub use grammar::{parse_filters, parse_sorts, FilterGroup, ParsedFilter};
pub use model::QueryModel;
pub use options::QueryOptions;
pub use registry::{PropertyMapper, PropertyMapping, Queryable};
pub use term::{FilterOperator, FilterTerm, SortTerm};
pub use value::{FieldValue, ValueKind};
