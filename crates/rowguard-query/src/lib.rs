//! Structured Query Layer
//!
//! Provides the schema-aware half of the engine:
//! - Schema registry with a two-phase (open, then sealed) lifecycle
//! - Typed filter trees with a canonical form
//! - Validation of untrusted raw queries into the intermediate representation

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod filter;
pub mod parser;
pub mod raw;
pub mod schema;

pub use filter::{FilterNode, FilterValue, Leaf, Operator};
pub use parser::QueryParser;
pub use raw::{Include, Iqr, Pagination, RawQuery, SortDirection, SortSpec};
pub use schema::{
    FieldDef, FieldType, JunctionLink, RelationDef, RelationKind, SchemaDefinition, SchemaRegistry,
};
