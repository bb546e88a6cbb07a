//! Clause parsers using nom.
//!
//! Turns the raw clause strings into the token-tree AST of [`crate::ast`].
//!
//! # Clause grammar
//!
//! ```text
//! tables=   Cities=C, Countries=K            table [= alias], ...
//! fields=   C._pageName, COUNT(*)=Total      expression [= alias], ...
//! join on=  C.Country = K._pageName          alias.field <op> alias.field, ...
//! where=    Population > 1e5 AND Tags HOLDS 'coastal'
//! ```
//!
//! `where`, `having`, and every `group by`/`order by` item are lexed into
//! [`Node`] sequences: identifiers (`table.field` split into qualifier and
//! name), literals, symbols, and nested groups. A bare word directly
//! followed by a group becomes a [`Node::Call`].

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1, one_of, satisfy},
    combinator::{eof, opt, recognize, value},
    sequence::{pair, preceded, terminated, tuple},
};

use crate::ast::*;
use crate::error::{CargoError, CargoResult};
use crate::tokenizer::{scan_quoted, split};

/// Words that never become function calls when followed by a group.
const CALL_BLOCKERS: &[&str] = &[
    "AND", "OR", "NOT", "IN", "IS", "LIKE", "BETWEEN", "HOLDS", "WITHIN", "NEAR", "MATCHES",
    "AGAINST", "CASE", "WHEN", "THEN", "ELSE", "AS", "REGEXP", "RLIKE", "XOR", "EXISTS", "DIV",
];

/// Deepest parenthesis nesting a clause may use.
pub const MAX_NESTING: usize = 128;

/// Parse one clause into a node sequence.
pub fn parse_clause(input: &str) -> CargoResult<Vec<Node>> {
    let (rest, nodes) = parse_sequence(input, 0)?;
    debug_assert!(rest.trim().is_empty());
    Ok(nodes)
}

/// Parse a comma-separated list clause (`group by=`, `order by=`) into one sequence per item.
pub fn parse_list_clause(input: &str) -> CargoResult<Vec<Vec<Node>>> {
    split(",", input, false)?
        .iter()
        .map(|item| parse_clause(item))
        .collect()
}

fn parse_sequence(mut rest: &str, depth: usize) -> CargoResult<(&str, Vec<Node>)> {
    let nested = depth > 0;
    let mut nodes: Vec<Node> = Vec::new();

    loop {
        rest = rest.trim_start();
        let Some(c) = rest.chars().next() else {
            if nested {
                return Err(CargoError::syntax("unbalanced parentheses"));
            }
            return Ok((rest, nodes));
        };

        match c {
            ')' => {
                if nested {
                    return Ok((&rest[1..], nodes));
                }
                return Err(CargoError::syntax("unbalanced parentheses"));
            }
            '(' => {
                if depth >= MAX_NESTING {
                    return Err(CargoError::syntax("parentheses nested too deeply"));
                }
                let (remaining, inner) = parse_sequence(&rest[1..], depth + 1)?;
                push_group(&mut nodes, inner);
                rest = remaining;
            }
            '\'' | '"' => {
                let (remaining, body) = scan_quoted(rest, c)?;
                nodes.push(Node::Str {
                    quote: c,
                    body: body.to_string(),
                });
                rest = remaining;
            }
            '`' => {
                let (remaining, body) = scan_quoted(rest, c)?;
                nodes.push(Node::QuotedIdent(format!("`{}`", body)));
                rest = remaining;
            }
            _ => {
                let signed = c == '-' && expects_operand(nodes.last());
                if let Ok((remaining, n)) = parse_number(rest) {
                    if signed || !n.starts_with('-') {
                        nodes.push(Node::Number(n.to_string()));
                        rest = remaining;
                        continue;
                    }
                }
                if let Ok((remaining, w)) = parse_word(rest) {
                    nodes.push(word_node(w)?);
                    rest = remaining;
                } else if let Ok((remaining, s)) = parse_symbol(rest) {
                    nodes.push(Node::Symbol(s.to_string()));
                    rest = remaining;
                } else {
                    return Err(CargoError::syntax(format!("unexpected character '{}'", c)));
                }
            }
        }
    }
}

/// Push a parenthesized group, attaching it to a preceding function name.
fn push_group(nodes: &mut Vec<Node>, inner: Vec<Node>) {
    if let Some(Node::Ident { table: None, name }) = nodes.last() {
        if !CALL_BLOCKERS.iter().any(|b| b.eq_ignore_ascii_case(name)) {
            let name = name.clone();
            nodes.pop();
            nodes.push(Node::Call { name, args: inner });
            return;
        }
    }
    nodes.push(Node::Group(inner));
}

/// Whether a `-` at this point is a sign rather than a subtraction.
fn expects_operand(previous: Option<&Node>) -> bool {
    match previous {
        None | Some(Node::Symbol(_)) => true,
        Some(node) => node.is_any_keyword() && !node.is_keyword("NULL"),
    }
}

fn parse_number(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)
}

fn parse_word(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '.'),
    ))(input)
}

fn parse_symbol(input: &str) -> IResult<&str, &str> {
    alt((
        tag("<=>"),
        tag("<="),
        tag(">="),
        tag("<>"),
        tag("!="),
        tag("||"),
        tag("&&"),
        tag("<<"),
        tag(">>"),
        recognize(one_of("=<>+-*/%,!&|^~:.")),
    ))(input)
}

/// Build an identifier node, splitting `table.field` on the first dot.
fn word_node(word: &str) -> CargoResult<Node> {
    match word.split_once('.') {
        None => Ok(Node::word(word)),
        Some((table, name)) if !name.is_empty() => Ok(Node::column(table, name)),
        Some(_) => Err(CargoError::syntax(format!("incomplete identifier '{}'", word))),
    }
}

/// Whether `name` is a plain identifier (letters, digits, underscores).
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Parse `tables=` into alias → table entries, in declaration order.
pub fn parse_tables(input: &str) -> CargoResult<Vec<AliasedTable>> {
    let mut tables: Vec<AliasedTable> = Vec::new();

    for entry in split(",", input, false)? {
        let parts = split("=", &entry, true)?;
        let (name, alias) = match parts.as_slice() {
            [name] => (name.as_str(), name.as_str()),
            [name, alias] => (name.as_str(), alias.as_str()),
            _ => return Err(CargoError::syntax(format!("invalid table entry '{}'", entry))),
        };

        if alias.is_empty() {
            return Err(CargoError::structure(format!("blank alias for table '{}'", name)));
        }
        if !is_identifier(name) {
            return Err(CargoError::syntax(format!("invalid table name '{}'", name)));
        }
        if !is_identifier(alias) {
            return Err(CargoError::syntax(format!("invalid table alias '{}'", alias)));
        }
        if tables.iter().any(|t| t.alias == alias) {
            return Err(CargoError::structure(format!("duplicate table alias '{}'", alias)));
        }
        tables.push(AliasedTable::new(alias, name));
    }

    if tables.is_empty() {
        return Err(CargoError::structure("at least one table must be specified"));
    }
    Ok(tables)
}

/// Parse `fields=` into alias → expression entries, in declaration order.
///
/// A blank value selects `_pageName=Page`.
pub fn parse_fields(input: &str) -> CargoResult<Vec<AliasedField>> {
    let input = if input.trim().is_empty() {
        "_pageName=Page"
    } else {
        input
    };

    let mut fields: Vec<AliasedField> = Vec::new();
    for entry in split(",", input, false)? {
        let parts = split("=", &entry, true)?;
        let (expr_text, alias) = match parts.as_slice() {
            [expr, alias] => (expr.as_str(), Some(alias.clone())),
            _ => (entry.as_str(), None),
        };

        if expr_text.is_empty() {
            return Err(CargoError::structure(format!("blank field expression in '{}'", entry)));
        }
        let expr = parse_clause(expr_text)?;
        let alias = match alias {
            Some(alias) if alias.is_empty() => {
                return Err(CargoError::structure(format!(
                    "blank alias for field '{}'",
                    expr_text
                )));
            }
            Some(alias) => alias,
            None => default_alias(expr_text, &expr),
        };

        if fields.iter().any(|f| f.alias == alias) {
            return Err(CargoError::structure(format!("duplicate field alias '{}'", alias)));
        }
        fields.push(AliasedField::new(&alias, expr));
    }
    Ok(fields)
}

/// Alias for a field given without `=alias`: the field name without its
/// table, underscores shown as spaces unless it is a special `_` column.
fn default_alias(text: &str, expr: &[Node]) -> String {
    match expr {
        [Node::Ident { name, .. }] if name.starts_with('_') => name.clone(),
        [Node::Ident { name, .. }] => name.replace('_', " "),
        _ => text.to_string(),
    }
}

/// Parse `join on=` into join conditions, in declaration order.
pub fn parse_join_on(input: &str) -> CargoResult<Vec<JoinCondition>> {
    let mut conditions = Vec::new();

    for entry in split(",", input, false)? {
        let (_, (left, operator, right)) = join_expression(&entry)
            .map_err(|_| CargoError::syntax(format!("invalid join condition '{}'", entry)))?;
        let (table1, field1) = split_join_term(left)?;
        let (table2, field2) = split_join_term(right)?;
        conditions.push(JoinCondition::new(
            JoinType::LeftOuter,
            (table1, field1),
            operator,
            (table2, field2),
        ));
    }
    Ok(conditions)
}

fn join_expression(input: &str) -> IResult<&str, (&str, JoinOperator, &str)> {
    let (input, left) = preceded(multispace0, join_term)(input)?;
    let (input, operator) = preceded(multispace0, join_operator)(input)?;
    let (input, right) = preceded(multispace0, join_term)(input)?;
    let (input, _) = terminated(multispace0, eof)(input)?;
    Ok((input, (left, operator, right)))
}

fn join_term(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '.')(input)
}

/// Multi-character operators are tried before their one-character prefixes.
fn join_operator(input: &str) -> IResult<&str, JoinOperator> {
    alt((
        value(JoinOperator::Lte, tag("<=")),
        value(JoinOperator::Gte, tag(">=")),
        value(JoinOperator::Eq, char('=')),
        value(JoinOperator::Lt, char('<')),
        value(JoinOperator::Gt, char('>')),
        value(
            JoinOperator::Holds,
            terminated(tag_no_case("HOLDS"), multispace1),
        ),
    ))(input)
}

fn split_join_term(term: &str) -> CargoResult<(&str, &str)> {
    match term.split_once('.') {
        Some((table, field)) if is_identifier(table) && is_identifier(field) => Ok((table, field)),
        _ => Err(CargoError::syntax(format!(
            "table and field name must both be specified in '{}'",
            term
        ))),
    }
}

/// Parse a `limit=`/`offset=` value. Blank means unset.
pub fn parse_count(clause: &str, input: &str) -> CargoResult<Option<u64>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    input
        .parse::<u64>()
        .map(Some)
        .map_err(|_| CargoError::syntax(format!("{} must be a non-negative integer, got '{}'", clause, input)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_comparison() {
        let nodes = parse_clause("Population>100000").unwrap();
        assert_eq!(
            nodes,
            vec![Node::word("Population"), Node::symbol(">"), Node::number("100000")]
        );
    }

    #[test]
    fn test_parse_qualified_and_strings() {
        let nodes = parse_clause("C.Country = 'France' OR K.Name=\"Spain\"").unwrap();
        assert_eq!(nodes[0], Node::column("C", "Country"));
        assert_eq!(
            nodes[2],
            Node::Str {
                quote: '\'',
                body: "France".to_string()
            }
        );
        assert_eq!(nodes[4], Node::column("K", "Name"));
    }

    #[test]
    fn test_parse_calls_and_groups() {
        let nodes = parse_clause("COUNT(x) > 1 AND (a = 1 OR b IN (1, 2))").unwrap();
        assert!(matches!(&nodes[0], Node::Call { name, args } if name == "COUNT" && args.len() == 1));
        let Node::Group(inner) = &nodes[4] else {
            panic!("expected group, got {:?}", nodes[4]);
        };
        assert!(inner[5].is_keyword("IN"));
        assert!(matches!(&inner[6], Node::Group(list) if list.len() == 3));
    }

    #[test]
    fn test_parse_signed_numbers() {
        let nodes = parse_clause("NEAR(40.0,-74.0,\"10 km\")").unwrap();
        let Node::Group(args) = &nodes[1] else {
            panic!("NEAR must not become a call");
        };
        assert_eq!(args[2], Node::number("-74.0"));

        let nodes = parse_clause("a-1").unwrap();
        assert_eq!(nodes, vec![Node::word("a"), Node::symbol("-"), Node::number("1")]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_clause("a = 'x"), Err(CargoError::Syntax(m)) if m == "unmatched quote"));
        assert!(matches!(parse_clause("a = 'x\\"), Err(CargoError::Syntax(m)) if m == "incomplete escape"));
        assert!(matches!(parse_clause("(a = 1"), Err(CargoError::Syntax(_))));
        assert!(matches!(parse_clause("a = 1)"), Err(CargoError::Syntax(_))));
        assert!(matches!(parse_clause("a ? 1"), Err(CargoError::Syntax(_))));
    }

    #[test]
    fn test_quoted_identifier_kept() {
        let nodes = parse_clause("`Odd name` = 1").unwrap();
        assert_eq!(nodes[0], Node::QuotedIdent("`Odd name`".to_string()));
    }

    #[test]
    fn test_backslash_ends_nothing_in_identifier() {
        let nodes = parse_clause(r"`a\` = 1").unwrap();
        assert_eq!(nodes[0], Node::QuotedIdent(r"`a\`".to_string()));
        assert_eq!(nodes.len(), 3);
    }

    #[test]
    fn test_nesting_limit() {
        let ok = format!("{}x = 1{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert!(parse_clause(&ok).is_ok());

        let deep = format!("{}Population > 1{}", "(".repeat(200_000), ")".repeat(200_000));
        let err = parse_clause(&deep).unwrap_err();
        assert!(matches!(err, CargoError::Syntax(ref m) if m == "parentheses nested too deeply"));
    }

    #[test]
    fn test_parse_tables() {
        let tables = parse_tables("Cities=C, Countries").unwrap();
        assert_eq!(tables[0], AliasedTable::new("C", "Cities"));
        assert_eq!(tables[1], AliasedTable::new("Countries", "Countries"));

        assert!(matches!(parse_tables("Cities="), Err(CargoError::Structure(_))));
        assert!(matches!(parse_tables("Cities=C,Countries=C"), Err(CargoError::Structure(_))));
        assert!(matches!(parse_tables(""), Err(CargoError::Structure(_))));
        assert!(matches!(parse_tables("Cit ies"), Err(CargoError::Syntax(_))));
    }

    #[test]
    fn test_parse_fields_default_aliases() {
        let fields = parse_fields("_pageName, C.Country_code, COUNT(*), Population=Pop").unwrap();
        let aliases: Vec<&str> = fields.iter().map(|f| f.alias.as_str()).collect();
        assert_eq!(aliases, vec!["_pageName", "Country code", "COUNT(*)", "Pop"]);
        assert_eq!(fields[1].single_column(), Some((Some("C"), "Country_code")));
        assert!(fields[2].is_function());
    }

    #[test]
    fn test_parse_fields_blank() {
        let fields = parse_fields("").unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].alias, "Page");
        assert!(matches!(parse_fields("Name="), Err(CargoError::Structure(_))));
    }

    #[test]
    fn test_parse_join_on() {
        let joins = parse_join_on("C.Country=K._pageName, C.Tags HOLDS T.Name, A.x <= B.y").unwrap();
        assert_eq!(joins.len(), 3);
        assert_eq!(joins[0].operator, JoinOperator::Eq);
        assert_eq!(joins[0].table2, "K");
        assert_eq!(joins[0].field2, "_pageName");
        assert_eq!(joins[1].operator, JoinOperator::Holds);
        assert_eq!(joins[2].operator, JoinOperator::Lte);
    }

    #[test]
    fn test_parse_join_on_errors() {
        assert!(matches!(parse_join_on("Country=K._pageName"), Err(CargoError::Syntax(_))));
        assert!(matches!(parse_join_on("C.Country LIKE K.Name"), Err(CargoError::Syntax(_))));
        assert!(matches!(parse_join_on("C.a.b=K.c"), Err(CargoError::Syntax(_))));
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("limit", "").unwrap(), None);
        assert_eq!(parse_count("limit", " 20 ").unwrap(), Some(20));
        assert!(matches!(parse_count("limit", "ten"), Err(CargoError::Syntax(_))));
    }
}
