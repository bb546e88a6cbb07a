//! `WITHIN` / `HOLDS WITHIN` over hierarchy fields.
//!
//! Hierarchies are stored as nested sets in `<table>__<field>__hierarchy`
//! with `_value`, `_left` and `_right` columns. A node's subtree is every
//! row whose interval lies inside the node's interval.

use crate::ast::{Node, hierarchy_table_name, side_table_name, walk_sequences_mut};
use crate::error::{CargoError, CargoResult};
use crate::query::CargoQuery;

use super::{FieldRef, fields_where, operand_at, words};

pub fn apply(query: &mut CargoQuery) -> CargoResult<()> {
    let fields = fields_where(query, |d| d.is_hierarchy);
    for field in &fields {
        walk_sequences_mut(&mut query.where_clause, &mut |seq| rewrite_sequence(seq, field))?;
    }
    Ok(())
}

fn rewrite_sequence(seq: &mut Vec<Node>, field: &FieldRef) -> CargoResult<()> {
    let mut i = 0;
    while i < seq.len() {
        if !field.matches(&seq[i]) {
            i += 1;
            continue;
        }

        let within = seq.get(i + 1).is_some_and(|n| n.is_keyword("WITHIN"));
        let holds_within = seq.get(i + 1).is_some_and(|n| n.is_keyword("HOLDS"))
            && seq.get(i + 2).is_some_and(|n| n.is_keyword("WITHIN"));

        let (consumed, replacement) = if within {
            if field.description.is_list {
                return Err(CargoError::syntax(format!(
                    "'{}' is a list of hierarchy values; use HOLDS WITHIN",
                    field.display_name()
                )));
            }
            let value = within_value(seq, i + 2, field)?;
            let mut nodes = vec![Node::column(&field.alias, &field.field), Node::word("IN")];
            nodes.push(Node::Group(subtree_values(field, value)));
            (3, nodes)
        } else if holds_within {
            if !field.description.is_list {
                return Err(CargoError::syntax(format!(
                    "HOLDS WITHIN needs a list of hierarchy values; use WITHIN for '{}'",
                    field.display_name()
                )));
            }
            let value = within_value(seq, i + 3, field)?;
            let mut inner = words("SELECT DISTINCT _rowID FROM");
            inner.push(Node::Table(side_table_name(&field.table, &field.field)));
            inner.extend(words("WHERE _value IN"));
            inner.push(Node::Group(subtree_values(field, value)));

            let nodes = vec![
                Node::column(&field.alias, "_ID"),
                Node::word("IN"),
                Node::Group(inner),
            ];
            (4, nodes)
        } else {
            i += 1;
            continue;
        };

        tracing::debug!("Rewrote hierarchy condition on {}", field.display_name());
        let len = replacement.len();
        seq.splice(i..i + consumed, replacement);
        i += len;
    }
    Ok(())
}

fn within_value(seq: &[Node], index: usize, field: &FieldRef) -> CargoResult<Node> {
    operand_at(seq, index).cloned().ok_or_else(|| {
        CargoError::syntax(format!("missing value after WITHIN for '{}'", field.display_name()))
    })
}

/// `SELECT _value FROM h WHERE _left >= (…) AND _right <= (…)`: every value in
/// the subtree rooted at `value`, the root included.
fn subtree_values(field: &FieldRef, value: Node) -> Vec<Node> {
    let table = hierarchy_table_name(&field.table, &field.field);
    let bound = |column: &str| {
        let mut nodes = words(&format!("SELECT {} FROM", column));
        nodes.push(Node::Table(table.clone()));
        nodes.extend(words("WHERE _value"));
        nodes.push(Node::symbol("="));
        nodes.push(value.clone());
        Node::Group(nodes)
    };

    let mut nodes = words("SELECT _value FROM");
    nodes.push(Node::Table(table.clone()));
    nodes.extend(words("WHERE _left"));
    nodes.push(Node::symbol(">="));
    nodes.push(bound("_left"));
    nodes.extend(words("AND _right"));
    nodes.push(Node::symbol("<="));
    nodes.push(bound("_right"));
    nodes
}

#[cfg(test)]
mod tests {
    use crate::config::CargoConfig;
    use crate::error::CargoError;
    use crate::query::{CargoQuery, QueryClauses};
    use crate::schema::{FieldDescription, FieldType, SchemaRegistry, TableSchema};
    use pretty_assertions::assert_eq;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new().with_table(
            TableSchema::new("Products")
                .field_def(
                    "Category",
                    FieldDescription::new(FieldType::String).hierarchy("*Goods\n**Food\n**Tools"),
                )
                .field_def(
                    "Aisles",
                    FieldDescription::new(FieldType::String)
                        .list(",")
                        .hierarchy("*Store\n**North\n**South"),
                ),
        )
    }

    fn where_sql(where_clause: &str) -> Result<String, CargoError> {
        let query = CargoQuery::new_from_values(
            QueryClauses::new("Products=P").where_clause(where_clause),
            &registry(),
            &CargoConfig::default(),
        )?;
        Ok(query.rewritten_where())
    }

    #[test]
    fn test_within_single_value() {
        assert_eq!(
            where_sql("Category WITHIN 'Food'").unwrap(),
            "`P`.`Category` IN (SELECT _value FROM `cargo__Products__Category__hierarchy` \
             WHERE _left >= (SELECT _left FROM `cargo__Products__Category__hierarchy` WHERE _value = 'Food') \
             AND _right <= (SELECT _right FROM `cargo__Products__Category__hierarchy` WHERE _value = 'Food'))"
        );
    }

    #[test]
    fn test_holds_within_list() {
        let sql = where_sql("P.Aisles HOLDS WITHIN 'North' OR Category = 'Food'").unwrap();
        assert!(sql.starts_with(
            "`P`.`_ID` IN (SELECT DISTINCT _rowID FROM `cargo__Products__Aisles` WHERE _value IN \
             (SELECT _value FROM `cargo__Products__Aisles__hierarchy` WHERE _left >= "
        ));
        assert!(sql.ends_with("OR Category = 'Food'"));
    }

    #[test]
    fn test_operator_mismatch() {
        assert!(matches!(where_sql("Category HOLDS WITHIN 'Food'"), Err(CargoError::Syntax(_))));
        assert!(matches!(where_sql("Aisles WITHIN 'North'"), Err(CargoError::Syntax(_))));
        assert!(matches!(where_sql("Aisles HOLDS 'North'"), Err(CargoError::Syntax(_))));
    }

    #[test]
    fn test_missing_value() {
        assert!(matches!(where_sql("Category WITHIN"), Err(CargoError::Syntax(_))));
        assert!(matches!(where_sql("(Category WITHIN) OR 1 = 1"), Err(CargoError::Syntax(_))));
    }

    #[test]
    fn test_plain_comparison_untouched() {
        assert_eq!(where_sql("Category = 'Food'").unwrap(), "Category = 'Food'");
    }
}
