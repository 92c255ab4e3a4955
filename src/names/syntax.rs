//! Identifier grammar helpers.
//!
//! A *regular* identifier starts with a letter and continues with
//! letters, digits or underscores, and is not a reserved word. Anything
//! else must be written *delimited*: wrapped in double quotes with
//! embedded quotes doubled.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::keywords::ALL_KEYWORDS;

static REGULAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("identifier pattern"));

/// True if `word` is a keyword of the query grammar (case-insensitive).
pub fn is_reserved(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    ALL_KEYWORDS.contains(&upper.as_str())
}

/// True if `name` matches the regular identifier grammar and is not a
/// reserved word, i.e. may appear in a query unquoted.
pub fn is_regular_identifier(name: &str) -> bool {
    REGULAR.is_match(name) && !is_reserved(name)
}

/// True if `name` is a well-formed delimited identifier: wrapped in
/// double quotes, every interior quote doubled.
pub fn is_delimited(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'"' || bytes[bytes.len() - 1] != b'"' {
        return false;
    }
    let mut chars = name[1..name.len() - 1].chars();
    while let Some(c) = chars.next() {
        if c == '"' && chars.next() != Some('"') {
            return false;
        }
    }
    true
}

/// Wrap an identifier in double quotes, doubling embedded quotes.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Remove delimiting quotes, if present and well formed.
pub fn unquote(name: &str) -> String {
    if is_delimited(name) {
        name[1..name.len() - 1].replace("\"\"", "\"")
    } else {
        name.to_string()
    }
}

/// Quote an identifier only if it cannot appear in a query as is.
/// Already-delimited and regular identifiers pass through unchanged,
/// which makes the operation idempotent.
pub fn quote_if_necessary(name: &str) -> String {
    if is_delimited(name) || is_regular_identifier(name) {
        name.to_string()
    } else {
        quote(name)
    }
}

/// Quote a string literal with single quotes, doubling embedded ones.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Split a possibly qualified name on dots that fall outside delimited
/// identifier parts, so `cat."weird.name"` yields two components.
pub fn split_qualified(name: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in name.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '.' if !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}
