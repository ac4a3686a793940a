//! Generic record filtering.
//!
//! A filter source is either a loosely-typed key/value map (query
//! parameters) or a structured filter record. Its set fields become field
//! predicates which are ANDed into one [`CompiledCondition`]:
//!
//! - collections match by membership (`IN_SET`)
//! - on the map path, everything else is a case-insensitive substring match
//!   against the stored value rendered as text, and the paging keys
//!   (`page`, `size`, `sortBy`, `sortDir`) are skipped
//! - on the record path, text is a case-insensitive substring match and any
//!   other value must match exactly
//!
//! # Example
//!
//! ```ignore
//! let schema = EntitySchema::new("employee", ["fullname", "designation"]);
//! let params = json!({"fullname": "ann", "page": 0, "size": 20});
//!
//! let condition = build_condition(&schema, FilterSource::Map(params.as_object().unwrap()))?;
//! let page = table.find_page(&condition, &PageRequest::from_params(params.as_object().unwrap())?)?;
//! ```

mod compiler;
mod reserved;
mod source;
mod strategy;
mod value;

pub use compiler::{
    build_condition, compile, plan_predicates, Comparison, CompiledCondition, FieldPredicate,
};
pub use reserved::{is_reserved, RESERVED_KEYS};
pub use source::{extract_fields, DeclaredField, FieldRead, FilterSource, Introspectable, SourcePath};
pub use strategy::{select_strategy, Strategy};
pub use value::{FilterValue, ToFilterValue};
