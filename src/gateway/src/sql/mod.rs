use itertools::Itertools;
use std::borrow::Cow;

/// The SQL-parser collaborator. The gateway forwards most statements
/// verbatim; `validate` runs once per statement as a cheap front gate and a
/// deployment can plug in a real parser behind this trait.
pub trait SqlParser: Send + Sync {
    fn validate(&self, sql: &str) -> Result<(), String>;
}

/// Accepts anything non-empty.
pub struct PermissiveParser;

impl SqlParser for PermissiveParser {
    fn validate(&self, sql: &str) -> Result<(), String> {
        if sql.trim().is_empty() {
            Err("empty statement".to_string())
        } else {
            Ok(())
        }
    }
}

/// Splits semicolon-separated input into individual statements, skipping
/// separators inside quoted strings. Empty fragments are dropped.
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut prev_was_escape = false;
    for (idx, c) in sql.char_indices() {
        match quote {
            Some(q) => {
                if c == q && !prev_was_escape {
                    quote = None;
                }
                prev_was_escape = c == '\\' && !prev_was_escape;
            }
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                ';' => {
                    statements.push(&sql[start..idx]);
                    start = idx + 1;
                }
                _ => {}
            },
        }
    }
    statements.push(&sql[start..]);
    statements
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect_vec()
}

/// The first keyword of a statement, uppercased.
pub fn leading_keyword(sql: &str) -> String {
    sql.trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// PostgreSQL CommandComplete tag for a statement without a row set.
pub fn command_tag(sql: &str, affected: u64) -> String {
    match leading_keyword(sql).as_str() {
        "INSERT" => format!("INSERT 0 {affected}"),
        "UPDATE" => format!("UPDATE {affected}"),
        "DELETE" => format!("DELETE {affected}"),
        "CREATE" => "CREATE TABLE".to_string(),
        "DROP" => "DROP TABLE".to_string(),
        "ALTER" => "ALTER TABLE".to_string(),
        "SET" => "SET".to_string(),
        "BEGIN" | "START" => "BEGIN".to_string(),
        "COMMIT" | "END" => "COMMIT".to_string(),
        "ROLLBACK" => "ROLLBACK".to_string(),
        _ => format!("SELECT {affected}"),
    }
}

/// SQL LIKE over `%` and `_`, case-insensitive; used for the intercepted
/// `SHOW VARIABLES LIKE` pattern.
pub fn like_match(pattern: &str, value: &str) -> bool {
    fn inner(p: &[char], v: &[char]) -> bool {
        match p.first() {
            None => v.is_empty(),
            Some('%') => (0..=v.len()).any(|skip| inner(&p[1..], &v[skip..])),
            Some('_') => !v.is_empty() && inner(&p[1..], &v[1..]),
            Some(c) => v.first() == Some(c) && inner(&p[1..], &v[1..]),
        }
    }
    let p: Vec<char> = pattern.to_ascii_lowercase().chars().collect();
    let v: Vec<char> = value.to_ascii_lowercase().chars().collect();
    inner(&p, &v)
}

const DATLASTSYSOID_REWRITE: &str =
    "SELECT DISTINCT 10000::oid as datlastsysoid FROM pg_database";

/// Light statement rewrites applied ahead of the PostgreSQL backend.
///
/// GUI clients still send `SET CLIENT_ENCODING TO 'UNICODE'` although the
/// JDBC driver requires UTF8, and `datlastsysoid` disappeared from
/// `pg_database` in 9.0; both statements are mapped onto modern equivalents.
pub fn rewrite_for_postgres(sql: &str) -> Cow<'_, str> {
    let trimmed = sql.trim().trim_end_matches(';');
    if trimmed.eq_ignore_ascii_case("SET CLIENT_ENCODING TO 'UNICODE'") {
        return Cow::Borrowed("SET client_encoding TO 'UTF8'");
    }
    if sql.to_ascii_lowercase().contains("datlastsysoid") {
        return Cow::Borrowed(DATLASTSYSOID_REWRITE);
    }
    Cow::Borrowed(sql)
}
