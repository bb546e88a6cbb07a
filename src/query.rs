//! The Cargo query compiler.
//!
//! A [`CargoQuery`] is built once from the nine raw clause strings and
//! passes through the pipeline exactly once:
//!
//! ```text
//! validate → tables/schemas → join graph → fields/clauses → resolve
//!   → hierarchy → list fields → coordinates → dates → search text
//!   → leftover-operator check → resolve again → qualify
//! ```
//!
//! After that it is read-only, apart from [`CargoQuery::append_where`].

use std::collections::HashMap;

use crate::ast::*;
use crate::config::CargoConfig;
use crate::error::{CargoError, CargoResult};
use crate::joins::validate_join_graph;
use crate::parser::{parse_clause, parse_count, parse_fields, parse_join_on, parse_list_clause, parse_tables};
use crate::resolver::{self, ResolvedField, Scope};
use crate::rewrite;
use crate::schema::{FieldDescription, SchemaSource, TableSchema};
use crate::tokenizer::split;
use crate::transpiler::{self, Qualifier, render};
use crate::validator;

/// Number of declared fields the default ORDER BY uses.
const DEFAULT_ORDER_FIELDS: usize = 5;

/// The nine raw clause strings of a query, as authored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryClauses {
    pub tables: String,
    pub fields: String,
    pub where_clause: String,
    pub join_on: String,
    pub group_by: String,
    pub having: String,
    pub order_by: String,
    pub limit: String,
    pub offset: String,
}

impl QueryClauses {
    /// Start a query over `tables`.
    pub fn new(tables: &str) -> Self {
        Self {
            tables: tables.to_string(),
            ..Self::default()
        }
    }

    pub fn fields(mut self, value: &str) -> Self {
        self.fields = value.to_string();
        self
    }

    pub fn where_clause(mut self, value: &str) -> Self {
        self.where_clause = value.to_string();
        self
    }

    pub fn join_on(mut self, value: &str) -> Self {
        self.join_on = value.to_string();
        self
    }

    pub fn group_by(mut self, value: &str) -> Self {
        self.group_by = value.to_string();
        self
    }

    pub fn having(mut self, value: &str) -> Self {
        self.having = value.to_string();
        self
    }

    pub fn order_by(mut self, value: &str) -> Self {
        self.order_by = value.to_string();
        self
    }

    pub fn limit(mut self, value: &str) -> Self {
        self.limit = value.to_string();
        self
    }

    pub fn offset(mut self, value: &str) -> Self {
        self.offset = value.to_string();
        self
    }

    /// Clause names and values, in wiki parameter order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("tables", self.tables.as_str()),
            ("fields", self.fields.as_str()),
            ("where", self.where_clause.as_str()),
            ("join on", self.join_on.as_str()),
            ("group by", self.group_by.as_str()),
            ("having", self.having.as_str()),
            ("order by", self.order_by.as_str()),
            ("limit", self.limit.as_str()),
            ("offset", self.offset.as_str()),
        ]
        .into_iter()
    }

    /// Build from wiki parser-function arguments such as `tables=Cities` or `join on=C.x=K.y`.
    ///
    /// Only the first `=` separates name from value. Names are matched
    /// case-insensitively, with `_` accepted for the space in `join on`,
    /// `group by` and `order by`.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> CargoResult<Self> {
        let mut clauses = QueryClauses::default();

        for arg in args {
            let arg = arg.as_ref();
            let Some((name, value)) = arg.split_once('=') else {
                return Err(CargoError::syntax(format!("expected name=value, got '{}'", arg)));
            };
            let value = value.trim().to_string();
            let slot = match name.trim().to_lowercase().replace('_', " ").as_str() {
                "tables" | "table" => &mut clauses.tables,
                "fields" => &mut clauses.fields,
                "where" => &mut clauses.where_clause,
                "join on" => &mut clauses.join_on,
                "group by" => &mut clauses.group_by,
                "having" => &mut clauses.having,
                "order by" => &mut clauses.order_by,
                "limit" => &mut clauses.limit,
                "offset" => &mut clauses.offset,
                other => {
                    return Err(CargoError::syntax(format!("unknown query parameter '{}'", other)));
                }
            };
            *slot = value;
        }
        Ok(clauses)
    }
}

/// A compiled Cargo query.
#[derive(Debug, Clone)]
pub struct CargoQuery {
    clauses: QueryClauses,
    pub(crate) tables: Vec<AliasedTable>,
    /// Main-table schemas keyed by real table name.
    pub(crate) schemas: HashMap<String, TableSchema>,
    pub(crate) fields: Vec<AliasedField>,
    original_fields: Vec<AliasedField>,
    pub(crate) join_conditions: Vec<JoinCondition>,
    pub(crate) where_clause: Vec<Node>,
    pub(crate) group_by: Vec<Vec<Node>>,
    pub(crate) having: Vec<Node>,
    pub(crate) order_by: Vec<Vec<Node>>,
    limit: u64,
    offset: u64,
    pub(crate) descriptions: Vec<(String, ResolvedField)>,
    pub(crate) search_terms: HashMap<String, Vec<String>>,
    table_prefix: String,
}

impl CargoQuery {
    /// Compile a query from its raw clauses.
    ///
    /// # Example
    ///
    /// ```
    /// use cargoquery::prelude::*;
    ///
    /// let schemas = SchemaRegistry::new().with_table(
    ///     TableSchema::new("Cities")
    ///         .field_def("Population", FieldDescription::new(FieldType::Integer)),
    /// );
    /// let query = CargoQuery::new_from_values(
    ///     QueryClauses::new("Cities")
    ///         .fields("_pageName,Population")
    ///         .where_clause("Population>100000"),
    ///     &schemas,
    ///     &CargoConfig::default(),
    /// )
    /// .unwrap();
    /// assert!(query.to_sql().contains("WHERE Population > 100000"));
    /// ```
    pub fn new_from_values(
        clauses: QueryClauses,
        source: &impl SchemaSource,
        config: &CargoConfig,
    ) -> CargoResult<Self> {
        validator::validate(&clauses, config)?;

        let mut tables = parse_tables(&clauses.tables)?;
        let schemas = load_schemas(&mut tables, source)?;
        tracing::debug!(
            "Tables: {}",
            tables
                .iter()
                .map(|t| format!("{}={}", t.name, t.alias))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let join_conditions = parse_join_on(&clauses.join_on)?;
        validate_join_graph(&tables, &join_conditions)?;

        let fields = parse_fields(&clauses.fields)?;
        let where_clause = parse_clause(&clauses.where_clause)?;
        let group_by = parse_list_clause(&clauses.group_by)?;
        let having = parse_clause(&clauses.having)?;
        let mut order_by = parse_list_clause(&clauses.order_by)?;
        if order_by.is_empty() {
            order_by = default_order_by(&fields);
        }

        let limit = match parse_count("limit", &clauses.limit)? {
            None => config.default_query_limit,
            Some(n) if n > config.max_query_limit => {
                tracing::warn!("LIMIT {} clamped to {}", n, config.max_query_limit);
                config.max_query_limit
            }
            Some(n) => n,
        };
        let offset = parse_count("offset", &clauses.offset)?.unwrap_or(0);

        let mut query = CargoQuery {
            clauses,
            tables,
            schemas,
            original_fields: fields.clone(),
            fields,
            join_conditions,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
            descriptions: Vec::new(),
            search_terms: HashMap::new(),
            table_prefix: config.table_prefix.clone(),
        };

        let original = resolver::resolve_fields(&query.scope(), &query.fields)?;

        rewrite::hierarchy::apply(&mut query)?;
        rewrite::virtual_fields::apply(&mut query)?;
        rewrite::coordinates::apply(&mut query)?;
        rewrite::dates::apply(&mut query, &original);
        rewrite::search_text::apply(&mut query)?;
        rewrite::reject_leftover_operators(&query)?;

        query.descriptions = resolver::resolve_fields(&query.scope(), &query.fields)?;
        transpiler::qualify_fields(&mut query);

        tracing::debug!("Compiled query: {}", query.to_sql());
        Ok(query)
    }

    pub(crate) fn scope(&self) -> Scope<'_> {
        Scope::new(&self.tables, &self.schemas)
    }

    /// Main (non side-table) entries of `tables=`.
    pub(crate) fn main_tables(&self) -> impl Iterator<Item = &AliasedTable> {
        self.tables.iter().filter(|t| t.side.is_none())
    }

    pub(crate) fn table_by_alias(&self, alias: &str) -> Option<&AliasedTable> {
        self.tables.iter().find(|t| t.alias == alias)
    }

    /// Description of `field` in the table behind `alias`, if it is a main table.
    pub(crate) fn field_of_alias(&self, alias: &str, field: &str) -> Option<&FieldDescription> {
        let table = self.table_by_alias(alias)?;
        if table.side.is_some() {
            return None;
        }
        self.schemas.get(&table.name)?.field(field)
    }

    /// Splice the side table of `owner_alias.field` into the table list right
    /// after its owner (and any side tables already there). Returns its alias.
    pub(crate) fn insert_side_table(&mut self, owner_alias: &str, field: &str) -> CargoResult<String> {
        let alias = side_alias(owner_alias, field);
        if self.table_by_alias(&alias).is_some() {
            return Ok(alias);
        }

        let owner_index = self
            .tables
            .iter()
            .position(|t| t.alias == owner_alias)
            .ok_or_else(|| CargoError::schema(format!("unknown table alias '{}'", owner_alias)))?;
        let owner_table = self.tables[owner_index].name.clone();

        let mut index = owner_index + 1;
        while index < self.tables.len() && self.tables[index].alias.starts_with(&format!("{}__", owner_alias)) {
            index += 1;
        }

        self.tables.insert(
            index,
            AliasedTable {
                alias: alias.clone(),
                name: side_table_name(&owner_table, field),
                side: Some(SideTable {
                    owner_table,
                    field: field.to_string(),
                }),
            },
        );
        tracing::debug!("Added side table '{}' for {}.{}", alias, owner_alias, field);
        Ok(alias)
    }

    /// Like [`insert_side_table`](Self::insert_side_table), also joining the side table to its owner.
    pub(crate) fn ensure_side_join(&mut self, owner_alias: &str, field: &str) -> CargoResult<String> {
        let alias = self.insert_side_table(owner_alias, field)?;
        if !self.join_conditions.iter().any(|c| c.table2 == alias) {
            self.join_conditions.push(JoinCondition::new(
                JoinType::LeftOuter,
                (owner_alias, "_ID"),
                JoinOperator::Eq,
                (&alias, "_rowID"),
            ));
        }
        Ok(alias)
    }

    /// Patch an extra condition into the compiled WHERE.
    ///
    /// This is the one mutation allowed after construction, used by faceted
    /// browsing to narrow an existing query. The condition goes through the
    /// security validator but not through the field rewriters, so it must
    /// already be plain SQL over real columns.
    pub fn append_where(&mut self, condition: &str, config: &CargoConfig) -> CargoResult<()> {
        validator::validate_clause(condition, config)?;
        let nodes = parse_clause(condition)?;
        if nodes.is_empty() {
            return Ok(());
        }

        if self.where_clause.is_empty() {
            self.where_clause = vec![Node::Group(nodes)];
        } else {
            let existing = std::mem::take(&mut self.where_clause);
            self.where_clause = vec![Node::Group(existing), Node::word("AND"), Node::Group(nodes)];
        }
        Ok(())
    }

    /// Patch an extra condition into the `ON` of the join that brings
    /// `alias` into the FROM clause.
    ///
    /// Unlike [`append_where`](Self::append_where), rows of the other tables
    /// are kept when the joined table has no match. Validated the same way
    /// and likewise not rewritten.
    pub fn append_join_condition(&mut self, alias: &str, condition: &str, config: &CargoConfig) -> CargoResult<()> {
        validator::validate_clause(condition, config)?;
        if self.table_by_alias(alias).is_none() {
            return Err(CargoError::schema(format!("unknown table alias '{}'", alias)));
        }
        let nodes = parse_clause(condition)?;
        if nodes.is_empty() {
            return Ok(());
        }

        let index = self
            .join_plan()
            .joined
            .iter()
            .find(|step| step.table.alias == alias)
            .and_then(|step| step.conditions.first().copied())
            .ok_or_else(|| CargoError::structure(format!("table '{}' is not joined to another table", alias)))?;

        let extra = &mut self.join_conditions[index].extra_condition;
        *extra = Some(match extra.take() {
            Some(existing) => vec![Node::Group(existing), Node::word("AND"), Node::Group(nodes)],
            None => nodes,
        });
        Ok(())
    }

    /// The raw clause strings the query was built from.
    pub fn clauses(&self) -> &QueryClauses {
        &self.clauses
    }

    /// Tables in FROM order, including spliced side tables.
    pub fn tables(&self) -> &[AliasedTable] {
        &self.tables
    }

    /// Final field list (after rewrites and added companions).
    pub fn fields(&self) -> &[AliasedField] {
        &self.fields
    }

    /// Field list as parsed, before any rewrite.
    pub fn original_fields(&self) -> &[AliasedField] {
        &self.original_fields
    }

    pub fn join_conditions(&self) -> &[JoinCondition] {
        &self.join_conditions
    }

    /// Resolved description of every field alias, in field order.
    pub fn field_descriptions(&self) -> &[(String, ResolvedField)] {
        &self.descriptions
    }

    /// Resolved description of one field alias.
    pub fn field_description(&self, alias: &str) -> Option<&FieldDescription> {
        self.descriptions
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, r)| &r.description)
    }

    /// Owning table alias of every field alias whose table is known.
    pub fn field_tables(&self) -> Vec<(&str, &str)> {
        self.descriptions
            .iter()
            .filter_map(|(alias, r)| r.table.as_deref().map(|t| (alias.as_str(), t)))
            .collect()
    }

    /// Search terms recorded per field alias by `MATCHES`.
    pub fn search_terms(&self) -> &HashMap<String, Vec<String>> {
        &self.search_terms
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    /// Physical (prefixed) name of a real table.
    pub fn physical_table_name(&self, table: &str) -> String {
        format!("{}{}", self.table_prefix, table)
    }

    /// Compiled WHERE clause, without the keyword.
    pub fn rewritten_where(&self) -> String {
        render(&self.where_clause, &Qualifier::for_query(self))
    }

    /// Compiled HAVING clause, without the keyword.
    pub fn rewritten_having(&self) -> String {
        render(&self.having, &Qualifier::for_query(self))
    }

    /// Compiled GROUP BY items.
    pub fn rewritten_group_by(&self) -> Vec<String> {
        let qualifier = Qualifier::for_query(self);
        self.group_by.iter().map(|item| render(item, &qualifier)).collect()
    }

    /// Compiled ORDER BY items, default order included.
    pub fn rewritten_order_by(&self) -> Vec<String> {
        let qualifier = Qualifier::for_query(self);
        self.order_by.iter().map(|item| render(item, &qualifier)).collect()
    }
}

/// Fetch one schema per referenced table and mark side tables.
///
/// A name `T__F` that is not itself registered is accepted when `T` has a
/// list field `F`.
fn load_schemas(
    tables: &mut [AliasedTable],
    source: &impl SchemaSource,
) -> CargoResult<HashMap<String, TableSchema>> {
    let mut schemas: HashMap<String, TableSchema> = HashMap::new();

    for table in tables.iter_mut() {
        if schemas.contains_key(&table.name) {
            continue;
        }
        match source.table_schema(&table.name) {
            Ok(schema) => {
                schemas.insert(table.name.clone(), schema);
            }
            Err(err) => {
                let Some((owner, field)) = table.name.rsplit_once("__") else {
                    return Err(err);
                };
                let owner_schema = match schemas.get(owner) {
                    Some(schema) => schema.clone(),
                    None => source.table_schema(owner).map_err(|_| err)?,
                };
                if !owner_schema.field(field).is_some_and(|d| d.is_list) {
                    return Err(CargoError::schema(format!("unknown table '{}'", table.name)));
                }
                table.side = Some(SideTable {
                    owner_table: owner.to_string(),
                    field: field.to_string(),
                });
                schemas.insert(owner.to_string(), owner_schema);
            }
        }
    }
    Ok(schemas)
}

/// Order by up to the first five fields that are plain column references.
fn default_order_by(fields: &[AliasedField]) -> Vec<Vec<Node>> {
    fields
        .iter()
        .filter(|f| f.single_column().is_some())
        .take(DEFAULT_ORDER_FIELDS)
        .map(|f| f.expr.clone())
        .collect()
}

/// Split a wiki-style argument list (`tables=Cities|fields=...`) on `|`.
pub fn split_wiki_args(text: &str) -> CargoResult<Vec<String>> {
    split("|", text, false)
}
