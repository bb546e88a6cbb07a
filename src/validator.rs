//! Security validator for raw query clauses.
//!
//! Runs before any parsing. Every clause, with its quoted literals removed
//! and its quoted identifiers emptied, must be free of statement-level SQL
//! and comment syntax, and every `name(` call site must name an
//! allow-listed function. A quoted identifier can never be called.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::CargoConfig;
use crate::error::{CargoError, CargoResult};
use crate::query::QueryClauses;
use crate::tokenizer::remove_quoted_strings;

/// Forbidden patterns and the text reported for each.
static FORBIDDEN: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bselect\b", "SELECT"),
        (r"(?i)\binto\b", "INTO"),
        (r"(?i)\bfrom\b", "FROM"),
        (r"(?i)\bunion\b", "UNION"),
        (r";", ";"),
        (r"@", "@"),
        (r"<\?", "<?"),
        (r"--", "--"),
        (r"/\*", "/*"),
        (r"#", "#"),
        (r"`\s*\(", "`("),
    ]
    .into_iter()
    .map(|(pattern, display)| (Regex::new(pattern).expect("valid forbidden pattern"), display))
    .collect()
});

/// Comment markers that are also checked in the raw WHERE, quotes included.
static RAW_WHERE_FORBIDDEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--|#").expect("valid comment pattern"));

/// An identifier directly followed by an opening parenthesis.
static FUNCTION_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)\s*\(").expect("valid function pattern"));

/// Words the clause grammar itself puts in front of parentheses.
const OPERATOR_WORDS: &[&str] = &[
    "AND", "OR", "NOT", "IN", "HOLDS", "LIKE", "WITHIN", "MATCHES", "NEAR",
];

/// Validate all nine clauses of a query.
pub fn validate(clauses: &QueryClauses, config: &CargoConfig) -> CargoResult<()> {
    if let Some(found) = RAW_WHERE_FORBIDDEN.find(&clauses.where_clause) {
        return Err(forbidden(found.as_str()));
    }

    for (name, value) in clauses.iter() {
        validate_clause(value, config).map_err(|e| {
            tracing::debug!("Clause '{}' rejected: {}", name, e);
            e
        })?;
    }
    Ok(())
}

/// Validate a single clause string.
pub fn validate_clause(value: &str, config: &CargoConfig) -> CargoResult<()> {
    let stripped = remove_quoted_strings(value)?;

    for (pattern, display) in FORBIDDEN.iter() {
        if pattern.is_match(&stripped) {
            return Err(forbidden(display));
        }
    }

    for function in sql_functions(&stripped) {
        if OPERATOR_WORDS.contains(&function.as_str()) || config.is_function_allowed(&function) {
            continue;
        }
        return Err(CargoError::security(format!(
            "the SQL function \"{}()\" is not allowed",
            function
        )));
    }
    Ok(())
}

/// Upper-cased names of every `name(` call site in `text`.
pub fn sql_functions(text: &str) -> Vec<String> {
    FUNCTION_CALL
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_uppercase())
        .filter(|name| !name.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

fn forbidden(display: &str) -> CargoError {
    CargoError::security(format!("the string \"{}\" cannot be used within a query", display))
}
