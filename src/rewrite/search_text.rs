//! `MATCHES` over searchtext fields, compiled to MySQL full-text search.

use crate::ast::{Node, walk_sequences_mut};
use crate::error::{CargoError, CargoResult};
use crate::query::CargoQuery;
use crate::schema::FieldType;

use super::{FieldRef, fields_where, words};

pub fn apply(query: &mut CargoQuery) -> CargoResult<()> {
    let fields = fields_where(query, |d| d.field_type == FieldType::Searchtext);

    for field in &fields {
        let mut terms: Vec<String> = Vec::new();
        walk_sequences_mut(&mut query.where_clause, &mut |seq| rewrite_matches(seq, field, &mut terms))?;
        if terms.is_empty() {
            continue;
        }

        for selected in &query.fields {
            if selected.expr.iter().any(|n| field.matches(n)) {
                query
                    .search_terms
                    .entry(selected.alias.clone())
                    .or_default()
                    .extend(terms.iter().cloned());
            }
        }
    }
    Ok(())
}

fn rewrite_matches(seq: &mut Vec<Node>, field: &FieldRef, terms: &mut Vec<String>) -> CargoResult<()> {
    let mut i = 0;
    while i < seq.len() {
        if !(field.matches(&seq[i]) && seq.get(i + 1).is_some_and(|n| n.is_keyword("MATCHES"))) {
            i += 1;
            continue;
        }

        let Some(Node::Str { quote, body }) = seq.get(i + 2).cloned() else {
            return Err(CargoError::syntax(format!(
                "MATCHES on '{}' must be followed by a quoted search string",
                field.display_name()
            )));
        };
        terms.extend(search_terms(&body));

        let mut against = vec![Node::Str { quote, body }];
        against.extend(words("IN BOOLEAN MODE"));
        let replacement = [
            Node::Call {
                name: "MATCH".to_string(),
                args: vec![Node::column(&field.alias, &field.field)],
            },
            Node::word("AGAINST"),
            Node::Group(against),
        ];
        seq.splice(i..i + 3, replacement);
        i += 3;
    }
    Ok(())
}

/// Words and phrases a boolean-mode search string looks for.
///
/// `"quoted phrases"` are kept whole, operator prefixes (`+ ~ < > ( )`)
/// and a trailing `*` are dropped, and `-excluded` terms are skipped.
pub fn search_terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut chars = text.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut excluded = false;
        while let Some(op) = chars.next_if(|c| "+-~<>()".contains(*c)) {
            excluded |= op == '-';
        }

        let term: String = if chars.next_if_eq(&'"').is_some() {
            let phrase: String = chars.by_ref().take_while(|&c| c != '"').collect();
            phrase.trim().to_string()
        } else {
            let mut word = String::new();
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                word.push(c);
            }
            word.trim_end_matches(['*', ')', '(']).to_string()
        };

        if !excluded && !term.is_empty() {
            terms.push(term);
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CargoConfig;
    use crate::query::QueryClauses;
    use crate::schema::{FieldDescription, SchemaRegistry, TableSchema};
    use pretty_assertions::assert_eq;

    fn compile(clauses: QueryClauses) -> CargoResult<CargoQuery> {
        let schemas = SchemaRegistry::new().with_table(
            TableSchema::new("Docs")
                .field_def("Title", FieldDescription::new(FieldType::String))
                .field_def("Body", FieldDescription::new(FieldType::Searchtext)),
        );
        CargoQuery::new_from_values(clauses, &schemas, &CargoConfig::default())
    }

    #[test]
    fn test_search_terms() {
        assert_eq!(
            search_terms("+rust -java \"memory safety\" ~async fearless*"),
            vec!["rust", "memory safety", "async", "fearless"]
        );
        assert_eq!(search_terms("   "), Vec::<String>::new());
        assert_eq!(search_terms("-\"not this\" that"), vec!["that"]);
    }

    #[test]
    fn test_matches_compiles_to_fulltext() {
        let query = compile(
            QueryClauses::new("Docs=D")
                .fields("Title,Body")
                .where_clause("Body MATCHES 'borrow checker'"),
        )
        .unwrap();
        assert_eq!(
            query.rewritten_where(),
            "MATCH(`D`.`Body`) AGAINST ('borrow checker' IN BOOLEAN MODE)"
        );
        assert_eq!(
            query.search_terms().get("Body"),
            Some(&vec!["borrow".to_string(), "checker".to_string()])
        );
        assert!(query.search_terms().get("Title").is_none());
    }

    #[test]
    fn test_matches_needs_string() {
        let err = compile(QueryClauses::new("Docs").where_clause("Body MATCHES Title")).unwrap_err();
        assert!(matches!(err, CargoError::Syntax(_)));
    }
}
