//! # cargoquery: the Cargo query compiler
//!
//! Wiki authors query Cargo tables with nine SQL-like clause strings
//! (`tables`, `fields`, `where`, `join on`, `group by`, `having`,
//! `order by`, `limit`, `offset`). This crate validates those clauses,
//! rewrites Cargo's virtual field types (lists, hierarchies, coordinates,
//! dates, searchtext) into plain SQL over the tables Cargo really stores,
//! and runs the result against MySQL.
//!
//! ## Quick Example
//!
//! ```
//! use cargoquery::prelude::*;
//!
//! let schemas = SchemaRegistry::new().with_table(
//!     TableSchema::new("Cities")
//!         .field_def("Population", FieldDescription::new(FieldType::Integer))
//!         .field_def("Tags", FieldDescription::new(FieldType::String).list(",")),
//! );
//!
//! let query = cargoquery::compile(
//!     QueryClauses::new("Cities")
//!         .fields("_pageName,Population")
//!         .where_clause("Tags HOLDS 'coastal'"),
//!     &schemas,
//! )
//! .unwrap();
//!
//! assert!(query.to_sql().contains("`cargo__Cities__Tags`"));
//! ```
//!
//! ## Operators
//!
//! | Operator          | Field type | Compiles to                          |
//! |-------------------|------------|--------------------------------------|
//! | `HOLDS`           | list       | `_ID IN (SELECT _rowID …)` subquery  |
//! | `HOLDS LIKE`      | list       | same, with `LIKE` on `_value`        |
//! | `WITHIN`          | hierarchy  | nested-set range subquery            |
//! | `HOLDS WITHIN`    | list + hierarchy | both of the above              |
//! | `NEAR (lat, lon, "d unit")` | coordinates | bounding box on `__lat`/`__lon` |
//! | `MATCHES 'terms'` | searchtext | `MATCH(…) AGAINST (… IN BOOLEAN MODE)` |

pub mod ast;
pub mod config;
pub mod engine;
pub mod error;
pub mod joins;
pub mod parser;
pub mod query;
pub mod resolver;
pub mod rewrite;
pub mod schema;
pub mod tokenizer;
pub mod transpiler;
pub mod validator;

pub mod prelude {
    pub use crate::ast::{AliasedField, AliasedTable, JoinCondition, JoinOperator, JoinType, Node};
    pub use crate::config::CargoConfig;
    pub use crate::engine::{Backend, CargoDb, ResultRow};
    pub use crate::error::*;
    pub use crate::query::{CargoQuery, QueryClauses};
    pub use crate::resolver::ResolvedField;
    pub use crate::schema::{FieldDescription, FieldType, SchemaRegistry, SchemaSource, TableSchema};
}

/// Compile a query with the default configuration.
///
/// # Example
///
/// ```
/// use cargoquery::prelude::*;
///
/// let schemas = SchemaRegistry::new().with_table(TableSchema::new("Cities"));
/// let query = cargoquery::compile(QueryClauses::new("Cities"), &schemas).unwrap();
/// assert_eq!(query.fields()[0].alias, "Page");
/// ```
pub fn compile(
    clauses: query::QueryClauses,
    schemas: &impl schema::SchemaSource,
) -> error::CargoResult<query::CargoQuery> {
    query::CargoQuery::new_from_values(clauses, schemas, &config::CargoConfig::default())
}
