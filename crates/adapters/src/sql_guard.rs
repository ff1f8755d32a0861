//! Read-only SQL enforcement.
//!
//! Two pure checks sit between client-supplied SQL/identifiers and the
//! upstream drivers. Values are never inspected here; they always travel
//! through bound parameters in the adapters. Identifiers cannot be bound,
//! so `sanitize_identifier` is the identifier boundary; callers apply the
//! dialect's native quoting *after* sanitization, never instead of it.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Empty SQL statement")]
    Empty,
    #[error("Only SELECT statements are allowed")]
    NotSelect,
    #[error("Multiple statements not allowed")]
    MultipleStatements,
    #[error("SQL comments not allowed")]
    Comment,
    #[error("Statement contains blocked keyword: {0}")]
    BlockedKeyword(String),
    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),
}

/// Whole-word match only: `updated_at` or `created_by` must pass.
static BLOCKED_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|TRUNCATE|ALTER|CREATE|GRANT|REVOKE|EXEC|EXECUTE)\b",
    )
    .expect("blocked keyword pattern compiles")
});

/// Accept only a single comment-free `SELECT`/`WITH` statement.
///
/// The returned error names the violated rule; the dispatcher surfaces that
/// message to the client verbatim.
pub fn check_read_only(sql: &str) -> Result<(), GuardError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(GuardError::Empty);
    }

    let first: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if !first.eq_ignore_ascii_case("select") && !first.eq_ignore_ascii_case("with") {
        return Err(GuardError::NotSelect);
    }

    // Checked before keywords so "SELECT 1; DROP TABLE x" reports the
    // statement split, not the keyword it smuggles in.
    if trimmed.contains(';') {
        return Err(GuardError::MultipleStatements);
    }
    if trimmed.contains("--") || trimmed.contains("/*") {
        return Err(GuardError::Comment);
    }

    if let Some(m) = BLOCKED_KEYWORDS.find(trimmed) {
        return Err(GuardError::BlockedKeyword(m.as_str().to_ascii_uppercase()));
    }

    Ok(())
}

/// Accept `[A-Za-z0-9_.]{1,128}`; the dot permits `schema.table`.
pub fn sanitize_identifier(name: &str) -> Result<&str, GuardError> {
    if name.is_empty() || name.len() > 128 {
        return Err(GuardError::InvalidIdentifier(name.to_string()));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
    {
        return Err(GuardError::InvalidIdentifier(name.to_string()));
    }
    Ok(name)
}
