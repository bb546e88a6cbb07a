//! Field description resolver.
//!
//! Works out the type of every output field from the table schemas:
//! special columns, literals, function results, side-table `_value`
//! columns and the `__full`/`__lat`/`__lon`/`__precision` companions that
//! the rewriters introduce.

use std::collections::HashMap;

use crate::ast::{AliasedField, AliasedTable, Node, is_keyword_name, split_commas};
use crate::error::{CargoError, CargoResult};
use crate::schema::{FieldDescription, FieldType, TableSchema};

/// A field's resolved description and the alias of the table it reads from.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    pub description: FieldDescription,
    pub table: Option<String>,
}

impl ResolvedField {
    fn new(field_type: FieldType, table: Option<String>) -> Self {
        Self {
            description: FieldDescription::new(field_type),
            table,
        }
    }

    /// Expressions the resolver cannot type default to a plain string.
    fn unresolved() -> Self {
        Self::new(FieldType::String, None)
    }
}

/// Tables and schemas an expression is resolved against.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    tables: &'a [AliasedTable],
    schemas: &'a HashMap<String, TableSchema>,
}

impl<'a> Scope<'a> {
    pub fn new(tables: &'a [AliasedTable], schemas: &'a HashMap<String, TableSchema>) -> Self {
        Self { tables, schemas }
    }

    fn table(&self, alias: &str) -> CargoResult<&'a AliasedTable> {
        self.tables
            .iter()
            .find(|t| t.alias == alias)
            .ok_or_else(|| CargoError::schema(format!("unknown table alias '{}'", alias)))
    }

    fn schema(&self, table: &str) -> CargoResult<&'a TableSchema> {
        self.schemas
            .get(table)
            .ok_or_else(|| CargoError::schema(format!("unknown table '{}'", table)))
    }
}

/// Integer-valued columns every Cargo table carries.
const INTEGER_SPECIALS: &[&str] = &["_ID", "_rowID", "_pageID", "_pageNamespace", "_position"];

#[derive(Clone, Copy)]
enum Companion {
    Full,
    Coordinate,
    Precision,
}

const COMPANIONS: &[(&str, Companion)] = &[
    ("__full", Companion::Full),
    ("__lat", Companion::Coordinate),
    ("__lon", Companion::Coordinate),
    ("__precision", Companion::Precision),
];

/// Resolve every field, keyed by alias, in field order.
pub fn resolve_fields(scope: &Scope<'_>, fields: &[AliasedField]) -> CargoResult<Vec<(String, ResolvedField)>> {
    fields
        .iter()
        .map(|field| {
            let resolved = resolve_expression(scope, &field.expr)?;
            tracing::debug!(
                "Field '{}' resolved to {}{}",
                field.alias,
                resolved.description.field_type,
                if resolved.description.is_list { " list" } else { "" }
            );
            Ok((field.alias.clone(), resolved))
        })
        .collect()
}

/// Resolve one field expression.
pub fn resolve_expression(scope: &Scope<'_>, expr: &[Node]) -> CargoResult<ResolvedField> {
    match expr {
        [Node::Ident { table, name }] if !is_keyword_name(name) => {
            resolve_column(scope, table.as_deref(), name)
        }
        [Node::Str { .. }] => Ok(ResolvedField::new(FieldType::String, None)),
        [Node::Number(n)] => {
            let field_type = if n.contains(['.', 'e', 'E']) {
                FieldType::Float
            } else {
                FieldType::Integer
            };
            Ok(ResolvedField::new(field_type, None))
        }
        [Node::Group(inner)] => resolve_expression(scope, inner),
        _ => match first_call(expr) {
            Some((name, args)) => resolve_call(scope, name, args),
            None => Ok(ResolvedField::unresolved()),
        },
    }
}

fn first_call(nodes: &[Node]) -> Option<(&str, &[Node])> {
    nodes.iter().find_map(|node| match node {
        Node::Call { name, args } => Some((name.as_str(), args.as_slice())),
        Node::Group(inner) => first_call(inner),
        _ => None,
    })
}

fn resolve_call(scope: &Scope<'_>, name: &str, args: &[Node]) -> CargoResult<ResolvedField> {
    let upper = name.to_uppercase();
    let field_type = match upper.as_str() {
        "MAX" | "MIN" | "AVG" => {
            let first = split_commas(args).first().copied().unwrap_or_default();
            let mut inner = resolve_expression(scope, first)?;
            inner.description = inner.description.element();
            if upper == "AVG" && inner.description.field_type == FieldType::Integer {
                inner.description.field_type = FieldType::Float;
            }
            return Ok(inner);
        }
        "COUNT" | "FLOOR" | "CEIL" | "CEILING" => FieldType::Integer,
        "SUM" | "POWER" | "LN" | "LOG" => FieldType::Float,
        "DATE" | "DATE_ADD" | "DATE_SUB" | "DATE_DIFF" => FieldType::Date,
        "TRIM" => FieldType::String,
        _ => return Ok(ResolvedField::unresolved()),
    };
    Ok(ResolvedField::new(field_type, None))
}

fn resolve_column(scope: &Scope<'_>, qualifier: Option<&str>, name: &str) -> CargoResult<ResolvedField> {
    if let Some(field_type) = special_column_type(name) {
        let table = match qualifier {
            Some(alias) => scope.table(alias)?.alias.clone(),
            None => match scope.tables.first() {
                Some(first) => first.alias.clone(),
                None => return Err(CargoError::schema("no tables to resolve against")),
            },
        };
        return Ok(ResolvedField::new(field_type, Some(table)));
    }

    if name == "_value" {
        return resolve_side_value(scope, qualifier);
    }

    for (suffix, companion) in COMPANIONS {
        if let Some(base) = name.strip_suffix(suffix) {
            let base = resolve_column(scope, qualifier, base)?;
            return Ok(match companion {
                Companion::Full => base,
                Companion::Coordinate => ResolvedField::new(FieldType::Float, base.table),
                Companion::Precision => ResolvedField::new(FieldType::Integer, base.table),
            });
        }
    }

    match qualifier {
        Some(alias) => {
            let table = scope.table(alias)?;
            if table.side.is_some() {
                return Err(CargoError::schema(format!(
                    "unknown field '{}.{}': list tables only have _value, _rowID and _position",
                    alias, name
                )));
            }
            let description = scope.schema(&table.name)?.field(name).ok_or_else(|| {
                CargoError::schema(format!("unknown field '{}.{}'", alias, name))
            })?;
            Ok(ResolvedField {
                description: description.clone(),
                table: Some(table.alias.clone()),
            })
        }
        None => {
            for table in scope.tables.iter().filter(|t| t.side.is_none()) {
                if let Some(description) = scope.schema(&table.name)?.field(name) {
                    return Ok(ResolvedField {
                        description: description.clone(),
                        table: Some(table.alias.clone()),
                    });
                }
            }
            Err(CargoError::schema(format!("unknown field '{}'", name)))
        }
    }
}

/// `_value` of a list field's side table resolves to one list element.
fn resolve_side_value(scope: &Scope<'_>, qualifier: Option<&str>) -> CargoResult<ResolvedField> {
    let table = match qualifier {
        Some(alias) => scope.table(alias)?,
        None => {
            let mut sides = scope.tables.iter().filter(|t| t.side.is_some());
            match (sides.next(), sides.next()) {
                (Some(side), None) => side,
                (None, _) => {
                    return Err(CargoError::schema("_value can only be used with a list field table"));
                }
                (Some(_), Some(_)) => {
                    return Err(CargoError::structure(
                        "_value is ambiguous between several list field tables; qualify it with the table alias",
                    ));
                }
            }
        }
    };

    let Some(side) = &table.side else {
        return Err(CargoError::schema(format!(
            "'{}' is not a list field table, so it has no _value",
            table.alias
        )));
    };
    let owner = scope.schema(&side.owner_table)?;
    let description = owner.field(&side.field).ok_or_else(|| {
        CargoError::schema(format!("unknown field '{}.{}'", side.owner_table, side.field))
    })?;
    Ok(ResolvedField {
        description: description.element(),
        table: Some(table.alias.clone()),
    })
}

fn special_column_type(name: &str) -> Option<FieldType> {
    if INTEGER_SPECIALS.contains(&name) {
        return Some(FieldType::Integer);
    }
    match name {
        "_pageTitle" => Some(FieldType::String),
        "_pageName" => Some(FieldType::Page),
        _ => None,
    }
}
