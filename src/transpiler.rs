//! SQL transpiler for compiled Cargo queries.
//!
//! Serializes the clause AST back into MySQL text. Identifiers are
//! qualified on the way out: aliases and storage table names are
//! backtick-quoted, and real table names receive the configured prefix.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::ast::*;
use crate::query::CargoQuery;

/// How `table.field` references and table names are written out.
#[derive(Debug, Clone, Default)]
pub struct Qualifier<'a> {
    aliases: HashSet<&'a str>,
    tables: HashSet<&'a str>,
    prefix: &'a str,
}

impl<'a> Qualifier<'a> {
    pub fn for_query(query: &'a CargoQuery) -> Self {
        let mut tables: HashSet<&str> = query.tables().iter().map(|t| t.name.as_str()).collect();
        tables.extend(query.schemas.keys().map(String::as_str));
        Self {
            aliases: query.tables().iter().map(|t| t.alias.as_str()).collect(),
            tables,
            prefix: query.table_prefix(),
        }
    }

    fn qualify(&self, table: &str, name: &str) -> String {
        if self.aliases.contains(table) {
            format!("{}.{}", quote_identifier(table), quote_identifier(name))
        } else if self.tables.contains(table) {
            format!(
                "{}.{}",
                quote_identifier(&format!("{}{}", self.prefix, table)),
                quote_identifier(name)
            )
        } else {
            format!("{}.{}", table, name)
        }
    }

    fn table(&self, name: &str) -> String {
        quote_identifier(&format!("{}{}", self.prefix, name))
    }
}

/// Backtick-quote a MySQL identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote a field alias unless it is already quoted or a string literal.
fn quote_alias(alias: &str) -> String {
    let quoted = |q: char| alias.len() >= 2 && alias.starts_with(q) && alias.ends_with(q);
    if quoted('`') || quoted('\'') || quoted('"') {
        alias.to_string()
    } else {
        quote_identifier(alias)
    }
}

/// Render a node sequence.
pub fn render(nodes: &[Node], qualifier: &Qualifier<'_>) -> String {
    let mut out = String::new();
    render_into(&mut out, nodes, qualifier);
    out
}

fn render_into(out: &mut String, nodes: &[Node], qualifier: &Qualifier<'_>) {
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 && !node.is_symbol(",") {
            out.push(' ');
        }
        match node {
            Node::Ident { table: None, name } => out.push_str(name),
            Node::Ident {
                table: Some(table),
                name,
            } => out.push_str(&qualifier.qualify(table, name)),
            Node::QuotedIdent(text) | Node::Number(text) | Node::Symbol(text) => out.push_str(text),
            Node::Str { quote, body } => {
                out.push(*quote);
                out.push_str(body);
                out.push(*quote);
            }
            Node::Group(inner) => {
                out.push('(');
                render_into(out, inner, qualifier);
                out.push(')');
            }
            Node::Call { name, args } => {
                out.push_str(name);
                out.push('(');
                render_into(out, args, qualifier);
                out.push(')');
            }
            Node::Table(name) => out.push_str(&qualifier.table(name)),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", render(std::slice::from_ref(self), &Qualifier::default()))
    }
}

/// Qualify bare single-column fields with the alias of the table they were resolved to.
pub(crate) fn qualify_fields(query: &mut CargoQuery) {
    let owners: HashMap<&str, &str> = query
        .descriptions
        .iter()
        .filter_map(|(alias, resolved)| resolved.table.as_deref().map(|t| (alias.as_str(), t)))
        .collect();

    for field in query.fields.iter_mut() {
        let Some(owner) = owners.get(field.alias.as_str()) else {
            continue;
        };
        if let [Node::Ident { table: table @ None, name }] = field.expr.as_mut_slice() {
            if !is_keyword_name(name) {
                *table = Some(owner.to_string());
            }
        }
    }
}

impl CargoQuery {
    /// Assemble the final SELECT statement.
    pub fn to_sql(&self) -> String {
        let qualifier = Qualifier::for_query(self);
        let mut sql = String::from("SELECT ");

        let columns: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!("{} AS {}", render(&f.expr, &qualifier), quote_alias(&f.alias)))
            .collect();
        sql.push_str(&columns.join(", "));

        sql.push_str(" FROM ");
        sql.push_str(&self.from_sql(&qualifier));

        if !self.where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&render(&self.where_clause, &qualifier));
        }

        if !self.group_by.is_empty() {
            let items: Vec<String> = self.group_by.iter().map(|g| render(g, &qualifier)).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&items.join(", "));
        }

        if !self.having.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&render(&self.having, &qualifier));
        }

        if !self.order_by.is_empty() {
            let items: Vec<String> = self.order_by.iter().map(|o| render(o, &qualifier)).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&items.join(", "));
        }

        sql.push_str(&format!(" LIMIT {}", self.limit()));
        if self.offset() > 0 {
            sql.push_str(&format!(" OFFSET {}", self.offset()));
        }

        sql
    }

    /// FROM clause: the first table, then every other table joined in as
    /// soon as a condition links it to a table already placed.
    fn from_sql(&self, qualifier: &Qualifier<'_>) -> String {
        let Some(first) = self.tables().first() else {
            return String::new();
        };

        let plan = self.join_plan();
        let mut sql = self.table_ref(first);
        for step in &plan.joined {
            let conditions: Vec<String> = step
                .conditions
                .iter()
                .map(|&i| condition_sql(&self.join_conditions[i], qualifier))
                .collect();
            let join_type = step
                .conditions
                .first()
                .map(|&i| self.join_conditions[i].join_type)
                .unwrap_or(JoinType::LeftOuter);
            sql.push_str(&format!(
                " {} {} ON {}",
                join_type.sql(),
                self.table_ref(step.table),
                conditions.join(" AND ")
            ));
        }
        // Not reachable through any condition.
        for table in plan.unreachable {
            sql.push_str(", ");
            sql.push_str(&self.table_ref(table));
        }
        sql
    }

    /// Order in which tables after the first enter the FROM clause, with the
    /// indexes of the join conditions each one carries in its `ON`.
    pub(crate) fn join_plan(&self) -> JoinPlan<'_> {
        let tables = self.tables();
        let mut plan = JoinPlan {
            joined: Vec::new(),
            unreachable: Vec::new(),
        };
        let Some(first) = tables.first() else {
            return plan;
        };

        let mut placed: HashSet<&str> = HashSet::from([first.alias.as_str()]);
        let mut used = vec![false; self.join_conditions.len()];
        let mut pending: Vec<&AliasedTable> = tables[1..].iter().collect();

        while !pending.is_empty() {
            let next = pending.iter().position(|t| {
                self.join_conditions.iter().any(|c| {
                    c.touches(&t.alias)
                        && (placed.contains(c.table1.as_str()) || placed.contains(c.table2.as_str()))
                })
            });
            let Some(index) = next else {
                plan.unreachable = pending;
                break;
            };

            let table = pending.remove(index);
            placed.insert(table.alias.as_str());

            let mut conditions = Vec::new();
            for (i, condition) in self.join_conditions.iter().enumerate() {
                let links = condition.touches(&table.alias)
                    && placed.contains(condition.table1.as_str())
                    && placed.contains(condition.table2.as_str());
                if links && !used[i] {
                    used[i] = true;
                    conditions.push(i);
                }
            }
            plan.joined.push(JoinStep { table, conditions });
        }
        plan
    }

    fn table_ref(&self, table: &AliasedTable) -> String {
        format!(
            "{} AS {}",
            quote_identifier(&self.physical_table_name(&table.name)),
            quote_identifier(&table.alias)
        )
    }
}

pub(crate) struct JoinPlan<'a> {
    pub joined: Vec<JoinStep<'a>>,
    pub unreachable: Vec<&'a AliasedTable>,
}

pub(crate) struct JoinStep<'a> {
    pub table: &'a AliasedTable,
    pub conditions: Vec<usize>,
}

fn condition_sql(condition: &JoinCondition, qualifier: &Qualifier<'_>) -> String {
    let mut sql = format!(
        "{} {} {}",
        qualifier.qualify(&condition.table1, &condition.field1),
        condition.operator.sql_symbol(),
        qualifier.qualify(&condition.table2, &condition.field2)
    );
    if let Some(extra) = &condition.extra_condition {
        sql.push_str(&format!(" AND ({})", render(extra, qualifier)));
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CargoConfig;
    use crate::parser::parse_clause;
    use crate::query::QueryClauses;
    use crate::schema::{FieldDescription, FieldType, SchemaRegistry, TableSchema};
    use pretty_assertions::assert_eq;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .with_table(
                TableSchema::new("Cities")
                    .field_def("Country", FieldDescription::new(FieldType::Page))
                    .field_def("Population", FieldDescription::new(FieldType::Integer)),
            )
            .with_table(
                TableSchema::new("Countries").field_def("Continent", FieldDescription::new(FieldType::String)),
            )
            .with_table(TableSchema::new("Rivers").field_def("City", FieldDescription::new(FieldType::Page)))
    }

    fn compile(clauses: QueryClauses) -> CargoQuery {
        CargoQuery::new_from_values(clauses, &registry(), &CargoConfig::default()).unwrap()
    }

    #[test]
    fn test_render_spacing() {
        let nodes = parse_clause("COUNT(*) > 1 AND x IN (1,2,'a')").unwrap();
        assert_eq!(render(&nodes, &Qualifier::default()), "COUNT(*) > 1 AND x IN (1, 2, 'a')");
    }

    #[test]
    fn test_display_node() {
        assert_eq!(Node::column("t", "f").to_string(), "t.f");
        assert_eq!(Node::Table("Cities".to_string()).to_string(), "`Cities`");
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("odd`name"), "`odd``name`");
        assert_eq!(quote_alias("'Literal'"), "'Literal'");
        assert_eq!(quote_alias("`Done`"), "`Done`");
        assert_eq!(quote_alias("Plain name"), "`Plain name`");
    }

    #[test]
    fn test_single_table_select() {
        let query = compile(
            QueryClauses::new("Cities")
                .fields("_pageName,Population")
                .where_clause("Population>100000"),
        );
        assert_eq!(
            query.to_sql(),
            "SELECT `Cities`.`_pageName` AS `_pageName`, `Cities`.`Population` AS `Population` \
             FROM `cargo__Cities` AS `Cities` WHERE Population > 100000 \
             ORDER BY _pageName, Population LIMIT 100"
        );
    }

    #[test]
    fn test_real_table_names_are_prefixed() {
        let query = compile(QueryClauses::new("Cities=C").where_clause("Cities.Population > 1 AND C.Population < 9"));
        assert_eq!(
            query.rewritten_where(),
            "`cargo__Cities`.`Population` > 1 AND `C`.`Population` < 9"
        );
    }

    #[test]
    fn test_clauses_in_order() {
        let query = compile(
            QueryClauses::new("Cities")
                .fields("Country,COUNT(*)=N")
                .group_by("Country")
                .having("COUNT(*) > 2")
                .order_by("N DESC")
                .limit("10")
                .offset("20"),
        );
        assert_eq!(
            query.to_sql(),
            "SELECT `Cities`.`Country` AS `Country`, COUNT(*) AS `N` FROM `cargo__Cities` AS `Cities` \
             GROUP BY Country HAVING COUNT(*) > 2 ORDER BY N DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn test_join_order_follows_conditions() {
        let query = compile(
            QueryClauses::new("Rivers=R,Countries=K,Cities=C")
                .fields("R._pageName=River")
                .join_on("C.Country=K._pageName, R.City=C._pageName"),
        );
        let sql = query.to_sql();
        assert!(
            sql.contains(
                "FROM `cargo__Rivers` AS `R` \
                 LEFT OUTER JOIN `cargo__Cities` AS `C` ON `R`.`City` = `C`.`_pageName` \
                 LEFT OUTER JOIN `cargo__Countries` AS `K` ON `C`.`Country` = `K`.`_pageName`"
            ),
            "{sql}"
        );
    }
}
