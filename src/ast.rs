//! Clause AST.
//!
//! Each clause is parsed once into a sequence of token trees: identifiers,
//! literals, operator symbols, and parenthesized groups (function calls keep
//! their name attached). Rewriters splice sequences; nothing is turned back
//! into SQL text until the transpiler runs.

use serde::{Deserialize, Serialize};

/// Words that are operators or SQL keywords rather than column names.
pub const KEYWORDS: &[&str] = &[
    "AND", "OR", "NOT", "IN", "IS", "NULL", "LIKE", "BETWEEN", "HOLDS", "WITHIN", "NEAR",
    "MATCHES", "AGAINST", "CASE", "WHEN", "THEN", "ELSE", "END", "ASC", "DESC", "DISTINCT",
    "AS", "TRUE", "FALSE", "INTERVAL", "REGEXP", "RLIKE", "DIV", "XOR", "EXISTS",
    "SELECT", "FROM", "WHERE", "BOOLEAN", "MODE",
];

/// One token tree of a clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Bare word or `table.field` reference. Keywords are bare words too.
    Ident { table: Option<String>, name: String },
    /// Backtick-quoted identifier, kept verbatim (quotes included).
    QuotedIdent(String),
    /// String literal; `body` is the raw text between the quotes.
    Str { quote: char, body: String },
    /// Numeric literal, sign included.
    Number(String),
    /// Operator or punctuation.
    Symbol(String),
    /// Parenthesized sub-sequence.
    Group(Vec<Node>),
    /// Function call: name directly followed by a parenthesized argument sequence.
    Call { name: String, args: Vec<Node> },
    /// Physical table name produced by a rewrite; receives the storage prefix.
    Table(String),
}

impl Node {
    /// A bare word.
    pub fn word(name: &str) -> Self {
        Node::Ident {
            table: None,
            name: name.to_string(),
        }
    }

    /// A `table.field` reference.
    pub fn column(table: &str, name: &str) -> Self {
        Node::Ident {
            table: Some(table.to_string()),
            name: name.to_string(),
        }
    }

    /// A column reference with an optional qualifier.
    pub fn qualified(table: Option<&str>, name: &str) -> Self {
        Node::Ident {
            table: table.map(|t| t.to_string()),
            name: name.to_string(),
        }
    }

    pub fn symbol(s: &str) -> Self {
        Node::Symbol(s.to_string())
    }

    pub fn number(n: impl ToString) -> Self {
        Node::Number(n.to_string())
    }

    /// Whether this is the bare word `keyword` (case-insensitive).
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Node::Ident { table: None, name } if name.eq_ignore_ascii_case(keyword))
    }

    /// Whether this is any bare keyword from [`KEYWORDS`].
    pub fn is_any_keyword(&self) -> bool {
        match self {
            Node::Ident { table: None, name } => is_keyword_name(name),
            _ => false,
        }
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        matches!(self, Node::Symbol(s) if s == symbol)
    }

    /// Whether this node is a reference to `field`, either bare or qualified by `alias`.
    pub fn refers_to(&self, alias: &str, field: &str) -> bool {
        match self {
            Node::Ident { table: None, name } => name == field,
            Node::Ident {
                table: Some(table),
                name,
            } => table == alias && name == field,
            _ => false,
        }
    }

    /// The qualifier of an identifier, if any.
    pub fn qualifier(&self) -> Option<&str> {
        match self {
            Node::Ident { table, .. } => table.as_deref(),
            _ => None,
        }
    }

    /// Whether this node can stand as the right-hand operand of an operator.
    pub fn is_operand(&self) -> bool {
        match self {
            Node::Ident { .. } => !self.is_any_keyword() || self.is_keyword("NULL"),
            Node::QuotedIdent(_)
            | Node::Str { .. }
            | Node::Number(_)
            | Node::Group(_)
            | Node::Call { .. }
            | Node::Table(_) => true,
            Node::Symbol(_) => false,
        }
    }

    /// Whether this node is a function call or contains one.
    pub fn contains_call(&self) -> bool {
        match self {
            Node::Call { .. } => true,
            Node::Group(inner) => inner.iter().any(Node::contains_call),
            _ => false,
        }
    }
}

pub fn is_keyword_name(name: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(name))
}

/// Visit every node sequence of a clause, nested groups and call arguments first.
///
/// Rewrites applied to an outer sequence therefore never revisit the
/// replacement nodes they produce.
pub fn walk_sequences_mut<E>(
    nodes: &mut Vec<Node>,
    f: &mut dyn FnMut(&mut Vec<Node>) -> Result<(), E>,
) -> Result<(), E> {
    for node in nodes.iter_mut() {
        match node {
            Node::Group(inner) | Node::Call { args: inner, .. } => walk_sequences_mut(inner, f)?,
            _ => {}
        }
    }
    f(nodes)
}

/// Visit every node of a clause, recursively.
pub fn any_node(nodes: &[Node], pred: &mut dyn FnMut(&Node) -> bool) -> bool {
    nodes.iter().any(|node| {
        pred(node)
            || match node {
                Node::Group(inner) | Node::Call { args: inner, .. } => any_node(inner, pred),
                _ => false,
            }
    })
}

/// Split a sequence on top-level commas.
pub fn split_commas(nodes: &[Node]) -> Vec<&[Node]> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, node) in nodes.iter().enumerate() {
        if node.is_symbol(",") {
            parts.push(&nodes[start..i]);
            start = i + 1;
        }
    }
    parts.push(&nodes[start..]);
    parts
}

/// SQL join type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
}

impl JoinType {
    pub fn sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::LeftOuter => "LEFT OUTER JOIN",
            JoinType::RightOuter => "RIGHT OUTER JOIN",
        }
    }
}

/// Operators allowed between the two sides of a `join on=` term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinOperator {
    /// Equal (=)
    Eq,
    /// List membership (HOLDS), expanded into side-table joins
    Holds,
    /// Less than or equal (<=)
    Lte,
    /// Greater than or equal (>=)
    Gte,
    /// Less than (<)
    Lt,
    /// Greater than (>)
    Gt,
}

impl JoinOperator {
    pub fn sql_symbol(&self) -> &'static str {
        match self {
            JoinOperator::Eq => "=",
            JoinOperator::Holds => "HOLDS",
            JoinOperator::Lte => "<=",
            JoinOperator::Gte => ">=",
            JoinOperator::Lt => "<",
            JoinOperator::Gt => ">",
        }
    }
}

/// One edge of the join graph: `table1.field1 <op> table2.field2`.
///
/// Tables are aliases. The condition lands in the `ON` of whichever of its
/// two tables enters the FROM clause last.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinCondition {
    pub join_type: JoinType,
    pub table1: String,
    pub field1: String,
    pub table2: String,
    pub field2: String,
    pub operator: JoinOperator,
    /// Further `ON` predicate, ANDed after the comparison.
    pub extra_condition: Option<Vec<Node>>,
}

impl JoinCondition {
    pub fn new(
        join_type: JoinType,
        (table1, field1): (&str, &str),
        operator: JoinOperator,
        (table2, field2): (&str, &str),
    ) -> Self {
        Self {
            join_type,
            table1: table1.to_string(),
            field1: field1.to_string(),
            table2: table2.to_string(),
            field2: field2.to_string(),
            operator,
            extra_condition: None,
        }
    }

    /// Whether this edge touches `alias`.
    pub fn touches(&self, alias: &str) -> bool {
        self.table1 == alias || self.table2 == alias
    }
}

/// A list field's side table, `<table>__<field>`.
#[derive(Debug, Clone, PartialEq)]
pub struct SideTable {
    /// Real name of the owning table.
    pub owner_table: String,
    pub field: String,
}

/// One entry of `tables=`.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasedTable {
    pub alias: String,
    /// Real (unprefixed) table name.
    pub name: String,
    pub side: Option<SideTable>,
}

impl AliasedTable {
    pub fn new(alias: &str, name: &str) -> Self {
        Self {
            alias: alias.to_string(),
            name: name.to_string(),
            side: None,
        }
    }
}

/// One entry of `fields=`.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasedField {
    pub alias: String,
    pub expr: Vec<Node>,
}

impl AliasedField {
    pub fn new(alias: &str, expr: Vec<Node>) -> Self {
        Self {
            alias: alias.to_string(),
            expr,
        }
    }

    /// The column this field reads when its expression is a single identifier.
    pub fn single_column(&self) -> Option<(Option<&str>, &str)> {
        match self.expr.as_slice() {
            [Node::Ident { table, name }] if !is_keyword_name(name) => {
                Some((table.as_deref(), name.as_str()))
            }
            _ => None,
        }
    }

    /// Whether the expression is, or contains, a function call.
    pub fn is_function(&self) -> bool {
        self.expr.iter().any(Node::contains_call)
    }
}

/// Side-table alias for a list field of `owner_alias`.
pub fn side_alias(owner_alias: &str, field: &str) -> String {
    format!("{}__{}", owner_alias, field)
}

/// Side-table name for a list field of `owner_table`.
pub fn side_table_name(owner_table: &str, field: &str) -> String {
    format!("{}__{}", owner_table, field)
}

/// Nested-set helper table name for a hierarchy field of `owner_table`.
pub fn hierarchy_table_name(owner_table: &str, field: &str) -> String {
    format!("{}__{}__hierarchy", owner_table, field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refers_to() {
        let bare = Node::word("Tags");
        let qualified = Node::column("C", "Tags");
        assert!(bare.refers_to("C", "Tags"));
        assert!(qualified.refers_to("C", "Tags"));
        assert!(!qualified.refers_to("K", "Tags"));
        assert!(!Node::word("Tag").refers_to("C", "Tags"));
    }

    #[test]
    fn test_keywords() {
        assert!(Node::word("holds").is_keyword("HOLDS"));
        assert!(!Node::column("t", "HOLDS").is_keyword("HOLDS"));
        assert!(!Node::word("AND").is_operand());
        assert!(Node::word("NULL").is_operand());
        assert!(Node::word("Population").is_operand());
    }

    #[test]
    fn test_walk_visits_inner_first() {
        let mut nodes = vec![
            Node::word("a"),
            Node::Group(vec![Node::word("b")]),
        ];
        let mut seen = Vec::new();
        walk_sequences_mut::<()>(&mut nodes, &mut |seq| {
            seen.push(seq.len());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_split_commas() {
        let nodes = vec![Node::number(1), Node::symbol(","), Node::number(2), Node::word("x")];
        let parts = split_commas(&nodes);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].len(), 2);
    }
}
