//! Field-type rewriters.
//!
//! Cargo field types that have no direct SQL column (hierarchies, lists,
//! coordinates, dates, searchtext) are expanded here into plain SQL over
//! the helper tables and companion columns Cargo stores. The rewriters run
//! in a fixed order; each splices node sequences of the clause AST.

pub mod coordinates;
pub mod dates;
pub mod hierarchy;
pub mod search_text;
pub mod virtual_fields;

use crate::ast::{Node, any_node};
use crate::error::{CargoError, CargoResult};
use crate::query::CargoQuery;
use crate::schema::FieldDescription;

/// A field of one of the query's main tables.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    /// Alias of the owning table.
    pub alias: String,
    /// Real name of the owning table.
    pub table: String,
    pub field: String,
    pub description: FieldDescription,
}

impl FieldRef {
    /// `alias.field`, as shown in error messages.
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.alias, self.field)
    }

    /// Whether `node` references this field.
    pub fn matches(&self, node: &Node) -> bool {
        node.refers_to(&self.alias, &self.field)
    }
}

/// Fields of every main table whose description satisfies `pred`, in table order.
pub(crate) fn fields_where(
    query: &CargoQuery,
    pred: impl Fn(&FieldDescription) -> bool,
) -> Vec<FieldRef> {
    let mut found = Vec::new();
    for table in query.main_tables() {
        let Some(schema) = query.schemas.get(&table.name) else {
            continue;
        };
        for (field, description) in schema.fields() {
            if pred(description) {
                found.push(FieldRef {
                    alias: table.alias.clone(),
                    table: table.name.clone(),
                    field: field.to_string(),
                    description: description.clone(),
                });
            }
        }
    }
    found
}

/// Build a node sequence from space-separated bare words.
pub(crate) fn words(text: &str) -> Vec<Node> {
    text.split_whitespace().map(Node::word).collect()
}

/// The operand at `index`, if there is one.
pub(crate) fn operand_at(seq: &[Node], index: usize) -> Option<&Node> {
    seq.get(index).filter(|node| node.is_operand())
}

/// Every custom operator must have been consumed by a rewriter.
const CUSTOM_OPERATORS: &[(&str, &str)] = &[
    ("HOLDS", "HOLDS can only be used with list fields"),
    ("WITHIN", "WITHIN can only be used with hierarchy fields"),
    ("NEAR", "NEAR can only be used with coordinates fields"),
    ("MATCHES", "MATCHES can only be used with searchtext fields"),
];

pub(crate) fn reject_leftover_operators(query: &CargoQuery) -> CargoResult<()> {
    for (clause, nodes) in [("where", &query.where_clause), ("having", &query.having)] {
        for (operator, message) in CUSTOM_OPERATORS {
            if any_node(nodes, &mut |node| node.is_keyword(operator)) {
                return Err(CargoError::syntax(format!("{} (found in {})", message, clause)));
            }
        }
    }
    Ok(())
}
