//! Delimiter-aware splitting of raw clause strings.
//!
//! Clause values arrive as plain wiki text (`tables=Cities=C,Countries=K`),
//! so a naive `str::split` would break inside function calls and quoted
//! literals. Everything here respects parentheses and quotes.

use crate::error::{CargoError, CargoResult};

/// Split `text` on `delimiter`, ignoring delimiters inside parentheses or quotes.
///
/// Quote characters are `'`, `"` and `` ` ``, read as [`scan_quoted`] reads
/// them. Pieces are
/// trimmed. Blank pieces are dropped unless `include_blank` is set, which
/// keeps positions stable for `name=value` pairs whose value may be empty.
///
/// # Example
///
/// ```
/// use cargoquery::tokenizer::split;
///
/// let parts = split(",", "a,b(c,d),e", false).unwrap();
/// assert_eq!(parts, vec!["a", "b(c,d)", "e"]);
/// ```
pub fn split(delimiter: &str, text: &str, include_blank: bool) -> CargoResult<Vec<String>> {
    if delimiter.is_empty() {
        return Err(CargoError::syntax("empty delimiter"));
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == '\\' && q != '`' {
                match chars.next() {
                    Some((_, escaped)) => current.push(escaped),
                    None => return Err(CargoError::syntax("incomplete escape")),
                }
            } else if c == q {
                if chars.peek().map(|&(_, next)| next) == Some(q) {
                    current.push(q);
                    chars.next();
                } else {
                    quote = None;
                }
            }
            continue;
        }

        match c {
            '\\' => {
                current.push(c);
                match chars.next() {
                    Some((_, escaped)) => current.push(escaped),
                    None => return Err(CargoError::syntax("incomplete escape")),
                }
            }
            '\'' | '"' | '`' => {
                quote = Some(c);
                current.push(c);
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            _ if depth == 0 && text[i..].starts_with(delimiter) => {
                pieces.push(std::mem::take(&mut current));
                for _ in 1..delimiter.chars().count() {
                    chars.next();
                }
            }
            _ => current.push(c),
        }
    }

    if quote.is_some() {
        return Err(CargoError::syntax("unmatched quote"));
    }
    pieces.push(current);

    Ok(pieces
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| include_blank || !p.is_empty())
        .collect())
}

/// Scan a quoted run starting at `input[0]`; returns the rest and the raw body.
///
/// Follows MySQL: a doubled quote is literal text in all three forms, and a
/// backslash escapes the next character in `'...'` and `"..."` but not in a
/// `` `...` `` identifier.
pub fn scan_quoted(input: &str, quote: char) -> CargoResult<(&str, &str)> {
    let mut chars = input.char_indices().skip(1).peekable();

    while let Some((i, c)) = chars.next() {
        if c == '\\' && quote != '`' {
            if chars.next().is_none() {
                return Err(CargoError::syntax("incomplete escape"));
            }
        } else if c == quote {
            if chars.peek().map(|&(_, next)| next) == Some(quote) {
                chars.next();
            } else {
                return Ok((&input[i + 1..], &input[1..i]));
            }
        }
    }
    Err(CargoError::syntax("unmatched quote"))
}

/// Remove every quoted literal (`'...'` and `"..."`) from `text`, and empty
/// every quoted identifier down to a pair of backticks.
///
/// Used by the security validator so that keywords inside string values
/// (`Name = 'select this'`) are not flagged. Quotes are read exactly as the
/// clause parser reads them.
pub fn remove_quoted_strings(text: &str) -> CargoResult<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(['\'', '"', '`']) {
        out.push_str(&rest[..start]);
        let quote = rest[start..].chars().next().unwrap_or('\'');
        let (remaining, _) = scan_quoted(&rest[start..], quote)?;
        if quote == '`' {
            out.push_str("``");
        }
        rest = remaining;
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_respects_parens() {
        assert_eq!(split(",", "a,b(c,d),e", false).unwrap(), vec!["a", "b(c,d)", "e"]);
    }

    #[test]
    fn test_split_respects_quotes() {
        let parts = split(",", "Name='a,b', Other=\"c,d\"", false).unwrap();
        assert_eq!(parts, vec!["Name='a,b'", "Other=\"c,d\""]);
    }

    #[test]
    fn test_split_doubled_quote_and_escape() {
        let parts = split(",", r"'it''s, fine',x\,y", false).unwrap();
        assert_eq!(parts, vec!["'it''s, fine'", r"x\,y"]);
    }

    #[test]
    fn test_split_drops_blanks_by_default() {
        assert_eq!(split(",", "a,,b, ", false).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_split_keeps_blanks_when_asked() {
        assert_eq!(split("=", "Name=", true).unwrap(), vec!["Name", ""]);
        assert_eq!(split("=", "=x", true).unwrap(), vec!["", "x"]);
    }

    #[test]
    fn test_split_multichar_delimiter() {
        assert_eq!(split("::", "a::b(c::d)::e", false).unwrap(), vec!["a", "b(c::d)", "e"]);
    }

    #[test]
    fn test_split_unmatched_quote() {
        let err = split(",", "a,'b,c", false).unwrap_err();
        assert!(matches!(err, CargoError::Syntax(ref m) if m == "unmatched quote"));
    }

    #[test]
    fn test_split_dangling_backslash() {
        let err = split(",", "a,b\\", false).unwrap_err();
        assert!(matches!(err, CargoError::Syntax(ref m) if m == "incomplete escape"));
    }

    #[test]
    fn test_remove_quoted_strings() {
        assert_eq!(remove_quoted_strings("Name = 'select this' AND x=\"y\"").unwrap(), "Name =  AND x=");
        assert_eq!(remove_quoted_strings("a = 'it''s' + 1").unwrap(), "a =  + 1");
        assert!(remove_quoted_strings("a = 'open").is_err());
    }

    #[test]
    fn test_remove_quoted_strings_reads_identifiers() {
        assert_eq!(remove_quoted_strings("`x'` = 1 OR SLEEP(5) OR `'` = 1").unwrap(), "`` = 1 OR SLEEP(5) OR `` = 1");
        assert_eq!(remove_quoted_strings("`a``b` = 'c'").unwrap(), "`` = ");
        // No backslash escapes inside identifiers.
        assert_eq!(remove_quoted_strings(r"`a\` UNION x").unwrap(), "`` UNION x");
    }

    #[test]
    fn test_scan_quoted() {
        assert_eq!(scan_quoted("'it''s' rest", '\'').unwrap(), (" rest", "it''s"));
        assert_eq!(scan_quoted(r"'a\'b' rest", '\'').unwrap(), (" rest", r"a\'b"));
        assert_eq!(scan_quoted(r"`a\` rest", '`').unwrap(), (" rest", r"a\"));
        assert!(scan_quoted("`open", '`').is_err());
    }

    #[test]
    fn test_split_backslash_is_literal_in_identifiers() {
        assert_eq!(split(",", r"`a\`,b", false).unwrap(), vec![r"`a\`", "b"]);
    }
}
