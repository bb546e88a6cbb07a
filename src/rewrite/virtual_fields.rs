//! List ("virtual") fields.
//!
//! A list field has no column of its own: its values live in the side
//! table `<table>__<field>` (`_rowID`, `_value`, `_position`) and a
//! delimited copy lives in `<field>__full`. This pass rewrites every clause
//! so list fields are read from one of those two places.

use crate::ast::*;
use crate::error::{CargoError, CargoResult};
use crate::query::CargoQuery;

use super::{FieldRef, fields_where, operand_at, words};

/// A `HOLDS` operator form and what it compiles to.
struct HoldsRule {
    keywords: &'static [&'static str],
    negated: bool,
    like: bool,
}

/// Longest forms first, so `HOLDS NOT LIKE` is never read as `HOLDS NOT`.
const HOLDS_RULES: &[HoldsRule] = &[
    HoldsRule {
        keywords: &["HOLDS", "NOT", "LIKE"],
        negated: true,
        like: true,
    },
    HoldsRule {
        keywords: &["HOLDS", "LIKE"],
        negated: false,
        like: true,
    },
    HoldsRule {
        keywords: &["HOLDS", "NOT"],
        negated: true,
        like: false,
    },
    HoldsRule {
        keywords: &["HOLDS"],
        negated: false,
        like: false,
    },
];

impl HoldsRule {
    fn matches(&self, seq: &[Node], start: usize) -> bool {
        self.keywords
            .iter()
            .enumerate()
            .all(|(k, keyword)| seq.get(start + k).is_some_and(|n| n.is_keyword(keyword)))
    }
}

pub fn apply(query: &mut CargoQuery) -> CargoResult<()> {
    rewrite_join_conditions(query)?;

    let fields = fields_where(query, |d| d.is_list);
    for field in &fields {
        rewrite_grouping(query, field)?;
        walk_sequences_mut(&mut query.where_clause, &mut |seq| rewrite_where(seq, field))?;
        rewrite_selection(query, field);
    }
    Ok(())
}

/// Expand `a.list HOLDS b.field` join terms into two side-table joins.
fn rewrite_join_conditions(query: &mut CargoQuery) -> CargoResult<()> {
    let conditions = std::mem::take(&mut query.join_conditions);
    let mut expanded = Vec::with_capacity(conditions.len());

    for condition in conditions {
        if condition.operator != JoinOperator::Holds {
            expanded.push(condition);
            continue;
        }

        let is_list = |alias: &str, field: &str| {
            query.field_of_alias(alias, field).is_some_and(|d| d.is_list)
        };
        let ((list_alias, list_field), (other_alias, other_field)) =
            if is_list(&condition.table1, &condition.field1) {
                (
                    (condition.table1.clone(), condition.field1.clone()),
                    (condition.table2.clone(), condition.field2.clone()),
                )
            } else if is_list(&condition.table2, &condition.field2) {
                (
                    (condition.table2.clone(), condition.field2.clone()),
                    (condition.table1.clone(), condition.field1.clone()),
                )
            } else {
                return Err(CargoError::syntax(format!(
                    "HOLDS in join on needs a list field, but neither {}.{} nor {}.{} is one",
                    condition.table1, condition.field1, condition.table2, condition.field2
                )));
            };

        let side = query.insert_side_table(&list_alias, &list_field)?;
        expanded.push(JoinCondition::new(
            JoinType::LeftOuter,
            (&list_alias, "_ID"),
            JoinOperator::Eq,
            (&side, "_rowID"),
        ));
        expanded.push(JoinCondition::new(
            JoinType::RightOuter,
            (&side, "_value"),
            JoinOperator::Eq,
            (&other_alias, &other_field),
        ));
        tracing::debug!("Expanded join {}.{} HOLDS {}.{}", list_alias, list_field, other_alias, other_field);
    }

    query.join_conditions = expanded;
    Ok(())
}

/// GROUP BY and HAVING read `_value` from the side table, joining it in if needed.
fn rewrite_grouping(query: &mut CargoQuery, field: &FieldRef) -> CargoResult<()> {
    let referenced = query
        .group_by
        .iter()
        .any(|item| any_node(item, &mut |n| field.matches(n)))
        || any_node(&query.having, &mut |n| field.matches(n));
    if !referenced {
        return Ok(());
    }

    let side = query.ensure_side_join(&field.alias, &field.field)?;
    let value = Node::column(&side, "_value");
    for item in query.group_by.iter_mut() {
        replace_references(item, field, &value);
    }
    replace_references(&mut query.having, field, &value);
    Ok(())
}

fn replace_references(nodes: &mut Vec<Node>, field: &FieldRef, replacement: &Node) {
    let _ = walk_sequences_mut::<()>(nodes, &mut |seq| {
        for node in seq.iter_mut().filter(|n| field.matches(n)) {
            *node = replacement.clone();
        }
        Ok(())
    });
}

fn rewrite_where(seq: &mut Vec<Node>, field: &FieldRef) -> CargoResult<()> {
    let mut i = 0;
    while i < seq.len() {
        if !field.matches(&seq[i]) {
            i += 1;
            continue;
        }

        if field.description.is_hierarchy {
            return Err(CargoError::syntax(format!(
                "the only operator allowed for the hierarchy list field '{}' is 'HOLDS WITHIN'",
                field.display_name()
            )));
        }
        let Some(rule) = HOLDS_RULES.iter().find(|rule| rule.matches(seq, i + 1)) else {
            return Err(CargoError::syntax(format!(
                "operator for the virtual field '{}' must be 'HOLDS', 'HOLDS NOT', 'HOLDS LIKE' or 'HOLDS NOT LIKE'",
                field.display_name()
            )));
        };

        let value_index = i + 1 + rule.keywords.len();
        if seq.get(value_index).is_some_and(|n| n.is_keyword("WITHIN")) {
            return Err(CargoError::syntax(format!(
                "HOLDS WITHIN can only be used on hierarchy fields, and '{}' is not one",
                field.display_name()
            )));
        }
        let value = operand_at(seq, value_index).cloned().ok_or_else(|| {
            CargoError::syntax(format!("missing value after HOLDS for '{}'", field.display_name()))
        })?;

        let mut inner = words("SELECT _rowID FROM");
        inner.push(Node::Table(side_table_name(&field.table, &field.field)));
        inner.push(Node::word("WHERE"));
        inner.push(Node::word("_value"));
        inner.push(if rule.like {
            Node::word("LIKE")
        } else {
            Node::symbol("=")
        });
        inner.push(value);

        let mut replacement = vec![Node::column(&field.alias, "_ID")];
        if rule.negated {
            replacement.push(Node::word("NOT"));
        }
        replacement.push(Node::word("IN"));
        replacement.push(Node::Group(inner));

        let len = replacement.len();
        seq.splice(i..=value_index, replacement);
        i += len;
    }
    Ok(())
}

/// FIELDS and ORDER BY read `_value` when the side table is joined, else `__full`.
fn rewrite_selection(query: &mut CargoQuery, field: &FieldRef) {
    let side = side_alias(&field.alias, &field.field);
    let joined = query.table_by_alias(&side).is_some();
    let full_name = format!("{}__full", field.field);

    let rewrite = |nodes: &mut Vec<Node>| {
        let _ = walk_sequences_mut::<()>(nodes, &mut |seq| {
            for node in seq.iter_mut().filter(|n| field.matches(n)) {
                *node = if joined {
                    Node::column(&side, "_value")
                } else {
                    Node::qualified(node.qualifier(), &full_name)
                };
            }
            Ok(())
        });
    };

    for selected in query.fields.iter_mut() {
        rewrite(&mut selected.expr);
    }
    for item in query.order_by.iter_mut() {
        rewrite(item);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::CargoConfig;
    use crate::error::CargoError;
    use crate::query::{CargoQuery, QueryClauses};
    use crate::schema::{FieldDescription, FieldType, SchemaRegistry, TableSchema};
    use pretty_assertions::assert_eq;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .with_table(
                TableSchema::new("Cities")
                    .field_def("Name", FieldDescription::new(FieldType::String))
                    .field_def("Tags", FieldDescription::new(FieldType::String).list(",")),
            )
            .with_table(
                TableSchema::new("Languages").field_def("Name", FieldDescription::new(FieldType::String)),
            )
    }

    fn compile(clauses: QueryClauses) -> Result<CargoQuery, CargoError> {
        CargoQuery::new_from_values(clauses, &registry(), &CargoConfig::default())
    }

    #[test]
    fn test_holds_forms() {
        let cases = [
            ("Tags HOLDS 'x'", "`C`.`_ID` IN (SELECT _rowID FROM `cargo__Cities__Tags` WHERE _value = 'x')"),
            ("Tags HOLDS NOT 'x'", "`C`.`_ID` NOT IN (SELECT _rowID FROM `cargo__Cities__Tags` WHERE _value = 'x')"),
            ("Tags HOLDS LIKE 'x%'", "`C`.`_ID` IN (SELECT _rowID FROM `cargo__Cities__Tags` WHERE _value LIKE 'x%')"),
            (
                "C.Tags HOLDS NOT LIKE 'x%'",
                "`C`.`_ID` NOT IN (SELECT _rowID FROM `cargo__Cities__Tags` WHERE _value LIKE 'x%')",
            ),
        ];
        for (input, expected) in cases {
            let query = compile(QueryClauses::new("Cities=C").where_clause(input)).unwrap();
            assert_eq!(query.rewritten_where(), expected);
        }
    }

    #[test]
    fn test_holds_nested_in_group() {
        let query = compile(QueryClauses::new("Cities=C").where_clause("Name = 'a' AND (Tags HOLDS 'x' OR Tags HOLDS 'y')"))
            .unwrap();
        let sql = query.rewritten_where();
        assert_eq!(sql.matches("_rowID").count(), 2);
        assert!(sql.starts_with("Name = 'a' AND (`C`.`_ID` IN"));
    }

    #[test]
    fn test_list_field_needs_holds() {
        let err = compile(QueryClauses::new("Cities=C").where_clause("Tags = 'x'")).unwrap_err();
        assert!(matches!(err, CargoError::Syntax(ref m) if m.contains("'C.Tags'")));

        let err = compile(QueryClauses::new("Cities=C").where_clause("Tags HOLDS")).unwrap_err();
        assert!(matches!(err, CargoError::Syntax(_)));

        let err = compile(QueryClauses::new("Cities=C").where_clause("Tags HOLDS WITHIN 'x'")).unwrap_err();
        assert!(matches!(err, CargoError::Syntax(_)));
    }

    #[test]
    fn test_field_reads_full_column() {
        let query = compile(QueryClauses::new("Cities=C").fields("Name,C.Tags")).unwrap();
        assert_eq!(query.fields()[1].alias, "Tags");
        let sql = query.to_sql();
        assert!(sql.contains("`C`.`Tags__full` AS `Tags`"), "{sql}");
        assert!(query.field_description("Tags").unwrap().is_list);
    }

    #[test]
    fn test_group_by_joins_side_table() {
        let query = compile(
            QueryClauses::new("Cities=C")
                .fields("Tags, COUNT(*)=N")
                .group_by("Tags"),
        )
        .unwrap();
        let aliases: Vec<&str> = query.tables().iter().map(|t| t.alias.as_str()).collect();
        assert_eq!(aliases, vec!["C", "C__Tags"]);
        assert_eq!(query.rewritten_group_by(), vec!["`C__Tags`.`_value`"]);

        let sql = query.to_sql();
        assert!(sql.contains("`C__Tags`.`_value` AS `Tags`"), "{sql}");
        assert!(
            sql.contains("LEFT OUTER JOIN `cargo__Cities__Tags` AS `C__Tags` ON `C`.`_ID` = `C__Tags`.`_rowID`"),
            "{sql}"
        );
        assert!(!query.field_description("Tags").unwrap().is_list);
    }

    #[test]
    fn test_join_on_holds() {
        let query = compile(
            QueryClauses::new("Cities=C,Languages=L")
                .fields("C.Name=City,L.Name=Language")
                .join_on("C.Tags HOLDS L.Name"),
        )
        .unwrap();

        let aliases: Vec<&str> = query.tables().iter().map(|t| t.alias.as_str()).collect();
        assert_eq!(aliases, vec!["C", "C__Tags", "L"]);
        let joins = query.join_conditions();
        assert_eq!(joins.len(), 2);
        assert_eq!((joins[0].table1.as_str(), joins[0].field1.as_str()), ("C", "_ID"));
        assert_eq!((joins[0].table2.as_str(), joins[0].field2.as_str()), ("C__Tags", "_rowID"));
        assert_eq!((joins[1].table1.as_str(), joins[1].field1.as_str()), ("C__Tags", "_value"));
        assert_eq!((joins[1].table2.as_str(), joins[1].field2.as_str()), ("L", "Name"));

        let sql = query.to_sql();
        assert!(
            sql.contains(
                "FROM `cargo__Cities` AS `C` \
                 LEFT OUTER JOIN `cargo__Cities__Tags` AS `C__Tags` ON `C`.`_ID` = `C__Tags`.`_rowID` \
                 RIGHT OUTER JOIN `cargo__Languages` AS `L` ON `C__Tags`.`_value` = `L`.`Name`"
            ),
            "{sql}"
        );
    }

    #[test]
    fn test_join_on_holds_list_on_right() {
        let query = compile(
            QueryClauses::new("Languages=L,Cities=C").join_on("L.Name HOLDS C.Tags"),
        )
        .unwrap();
        let joins = query.join_conditions();
        assert_eq!(joins[0].table2, "C__Tags");
        assert_eq!(joins[1].table2, "L");
    }

    #[test]
    fn test_join_on_holds_without_list() {
        let err = compile(QueryClauses::new("Cities=C,Languages=L").join_on("C.Name HOLDS L.Name")).unwrap_err();
        assert!(matches!(err, CargoError::Syntax(_)));
    }
}
