//! Lightweight statement classification used by the planner and the DuckDB executor.
//!
//! This is not a parser. Statements are split into words and parentheses, with string
//! literals, quoted identifiers and comments skipped, which is enough to tell reads from
//! writes for single statements, including ones wrapped in a `WITH` clause.

use regex::Regex;
use std::sync::LazyLock;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)'(?:[^']|'')*'|"(?:[^"]|"")*"|--[^\n]*|/\*.*?\*/|(?P<open>\()|(?P<close>\))|(?P<word>[A-Za-z_][A-Za-z0-9_]*)"#,
    )
    .expect("token pattern is valid")
});

/// Statements that return a result set
const ROW_RETURNING: &[&str] = &[
    "SELECT", "WITH", "SHOW", "DESCRIBE", "PRAGMA", "EXPLAIN", "VALUES", "FROM", "SUMMARIZE",
    "TABLE",
];

/// Statements that change data or schema
const MUTATING: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "REPLACE", "MERGE",
    "UPSERT", "GRANT", "REVOKE", "RENAME", "COPY", "ATTACH", "DETACH", "IMPORT", "VACUUM",
];

/// Keywords that mean a write wherever they appear, including inside subqueries and CTEs
const MUTATING_ANYWHERE: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "DROP", "ALTER", "TRUNCATE",
];

/// Keywords that can start the body of a `WITH` statement
const CTE_BODY: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE", "MERGE", "VALUES", "FROM", "TABLE"];

/// Upper-cased words of a statement with their parenthesis depth.
fn words(sql: &str) -> Vec<(String, usize)> {
    let mut depth = 0usize;
    let mut words = Vec::new();

    for caps in TOKEN.captures_iter(sql) {
        if caps.name("open").is_some() {
            depth += 1;
        } else if caps.name("close").is_some() {
            depth = depth.saturating_sub(1);
        } else if let Some(word) = caps.name("word") {
            words.push((word.as_str().to_uppercase(), depth));
        }
    }
    words
}

/// Keyword of the statement that actually runs, looking past any `WITH` list.
pub fn statement_keyword(sql: &str) -> Option<String> {
    let words = words(sql);
    let (first, first_depth) = words.first()?;

    if first != "WITH" {
        return Some(first.clone());
    }

    let body = words
        .iter()
        .skip(1)
        .find(|(word, depth)| depth == first_depth && CTE_BODY.contains(&word.as_str()))
        .map(|(word, _)| word.clone());
    Some(body.unwrap_or_else(|| first.clone()))
}

pub fn returns_rows(sql: &str) -> bool {
    statement_keyword(sql).is_some_and(|kw| ROW_RETURNING.contains(&kw.as_str()))
}

pub fn is_mutating(sql: &str) -> bool {
    if statement_keyword(sql).is_some_and(|kw| MUTATING.contains(&kw.as_str())) {
        return true;
    }
    words(sql)
        .iter()
        .any(|(word, _)| MUTATING_ANYWHERE.contains(&word.as_str()))
}
