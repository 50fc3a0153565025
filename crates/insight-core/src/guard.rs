//! SQL guard: stateless validation of raw query text.
//!
//! The guard is a pure function from query text to an allow/reject
//! decision. Token scanning respects string literals and comments, so a
//! literal containing the word "update" never triggers a false
//! rejection, and a semicolon inside a string never counts as a
//! statement separator.

use std::fmt;

/// Keywords that reject immediately when they appear as a top-level
/// token outside literals and comments.
const DENY_LIST: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "GRANT", "REVOKE", "CREATE",
    "COPY", "CALL", "EXECUTE",
];

/// Guard rejection reasons. `Display` yields the stable machine-checkable
/// strings surfaced in the response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    OnlySelectAllowed,
    MultipleStatements,
    ForbiddenKeyword(String),
    QueryTooLarge,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::OnlySelectAllowed => write!(f, "ONLY_SELECT_ALLOWED"),
            RejectReason::MultipleStatements => write!(f, "MULTIPLE_STATEMENTS"),
            RejectReason::ForbiddenKeyword(kw) => write!(f, "FORBIDDEN_KEYWORD:{kw}"),
            RejectReason::QueryTooLarge => write!(f, "QUERY_TOO_LARGE"),
        }
    }
}

impl std::error::Error for RejectReason {}

/// Guard limits, fixed at startup.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Maximum query text length in bytes.
    pub max_query_len: usize,
    /// Row cap appended when the query carries no explicit LIMIT.
    pub default_row_cap: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_query_len: 10_000,
            default_row_cap: 1_000,
        }
    }
}

/// A query that passed validation, possibly rewritten with an injected
/// row limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovedQuery {
    pub sql: String,
    /// Effective row cap the executor enforces.
    pub row_cap: usize,
}

#[derive(Debug, Default)]
struct Scan {
    /// Uppercased word tokens outside literals and comments.
    tokens: Vec<String>,
    /// A top-level `;` was followed by further content.
    multiple_statements: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Normal,
    SingleQuote,
    DoubleQuote,
    LineComment,
    BlockComment,
}

fn scan(text: &str) -> Scan {
    let mut out = Scan::default();
    let mut state = State::Normal;
    let mut word = String::new();
    let mut after_separator = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Normal => match c {
                '\'' => {
                    flush_word(&mut word, &mut out, &mut after_separator);
                    state = State::SingleQuote;
                    if after_separator {
                        out.multiple_statements = true;
                    }
                }
                '"' => {
                    flush_word(&mut word, &mut out, &mut after_separator);
                    state = State::DoubleQuote;
                    if after_separator {
                        out.multiple_statements = true;
                    }
                }
                '-' if chars.peek() == Some(&'-') => {
                    flush_word(&mut word, &mut out, &mut after_separator);
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    flush_word(&mut word, &mut out, &mut after_separator);
                    chars.next();
                    state = State::BlockComment;
                }
                ';' => {
                    flush_word(&mut word, &mut out, &mut after_separator);
                    after_separator = true;
                }
                c if c.is_alphanumeric() || c == '_' => word.push(c),
                c if c.is_whitespace() => flush_word(&mut word, &mut out, &mut after_separator),
                _ => {
                    // operators, parens, commas
                    flush_word(&mut word, &mut out, &mut after_separator);
                    if after_separator {
                        out.multiple_statements = true;
                    }
                }
            },
            State::SingleQuote => {
                if c == '\'' {
                    state = State::Normal;
                }
            }
            State::DoubleQuote => {
                if c == '"' {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Normal;
                }
            }
        }
    }
    flush_word(&mut word, &mut out, &mut after_separator);
    out
}

fn flush_word(word: &mut String, out: &mut Scan, after_separator: &mut bool) {
    if word.is_empty() {
        return;
    }
    if *after_separator {
        out.multiple_statements = true;
        *after_separator = false;
    }
    out.tokens.push(word.to_uppercase());
    word.clear();
}

/// Validate a raw query. Deterministic and side-effect-free.
///
/// Checks run in order: leading keyword, statement separators,
/// deny-list, length. A missing row limit injects the default cap
/// rather than rejecting.
pub fn validate(text: &str, config: &GuardConfig) -> Result<ApprovedQuery, RejectReason> {
    let scan = scan(text);

    match scan.tokens.first().map(String::as_str) {
        Some("SELECT") | Some("WITH") => {}
        _ => return Err(RejectReason::OnlySelectAllowed),
    }

    if scan.multiple_statements {
        return Err(RejectReason::MultipleStatements);
    }

    for token in &scan.tokens {
        if DENY_LIST.contains(&token.as_str()) {
            return Err(RejectReason::ForbiddenKeyword(token.clone()));
        }
    }

    if text.len() > config.max_query_len {
        return Err(RejectReason::QueryTooLarge);
    }

    // One past the cap so the executor can tell a full page from a
    // truncated result. On its own line: text ending in a line comment
    // would otherwise swallow the clause.
    let has_limit = scan.tokens.iter().any(|t| t == "LIMIT");
    let trimmed = text.trim().trim_end_matches(';').trim_end();
    let sql = if has_limit {
        trimmed.to_string()
    } else {
        format!("{trimmed}\nLIMIT {}", config.default_row_cap + 1)
    };

    Ok(ApprovedQuery {
        sql,
        row_cap: config.default_row_cap,
    })
}
