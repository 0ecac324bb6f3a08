use crate::backend::{
    BackendConnector, BackendError, BackendSession, ColumnDesc, ExecuteOutcome, Row, TargetConfig,
    VecResultSet,
};
use crate::sql;

use async_trait::async_trait;
use hashbrown::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Default)]
struct MemoryDb {
    tables: HashMap<String, (Vec<ColumnDesc>, Vec<Row>)>,
    statements: Vec<String>,
}

/// An in-memory stand-in for the real backend collaborator. It answers just
/// enough SQL for local runs and the session-level tests: integer-literal
/// selects, full-table scans, DDL into hash maps. Everything a session sends
/// is recorded verbatim so tests can assert on what actually reached the
/// backend.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    db: Arc<Mutex<MemoryDb>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(
        self,
        name: impl Into<String>,
        columns: Vec<ColumnDesc>,
        rows: Vec<Row>,
    ) -> Self {
        self.db
            .lock()
            .unwrap()
            .tables
            .insert(name.into(), (columns, rows));
        self
    }

    /// Every statement received by any session, in arrival order.
    pub fn statement_log(&self) -> Vec<String> {
        self.db.lock().unwrap().statements.clone()
    }
}

#[async_trait]
impl BackendConnector for MemoryConnector {
    async fn connect(
        &self,
        target: &TargetConfig,
    ) -> Result<Box<dyn BackendSession>, BackendError> {
        debug!(
            "MemoryBackend connect user={} database={}",
            target.username, target.database
        );
        Ok(Box::new(MemorySession {
            db: Arc::clone(&self.db),
            schema: target.database.clone(),
            closed: false,
        }))
    }
}

pub struct MemorySession {
    db: Arc<Mutex<MemoryDb>>,
    schema: String,
    closed: bool,
}

fn table_after_from(sql: &str) -> Option<String> {
    let lowered = sql.to_ascii_lowercase();
    let from_pos = lowered.find(" from ")?;
    let rest = sql[from_pos + 6..].trim_start();
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn third_token(sql: &str) -> Option<String> {
    sql.split_whitespace()
        .nth(2)
        .map(|t| t.trim_matches(|c| c == '`' || c == '"' || c == '(').to_string())
}

#[async_trait]
impl BackendSession for MemorySession {
    async fn execute(&mut self, sql: &str) -> Result<ExecuteOutcome, BackendError> {
        if self.closed {
            return Err(BackendError::ConnectionLost("session closed".to_string()));
        }
        let mut db = self.db.lock().unwrap();
        db.statements.push(sql.to_string());

        let trimmed = sql.trim().trim_end_matches(';').trim();
        match sql::leading_keyword(trimmed).as_str() {
            "SELECT" => {
                let rest = trimmed[6..].trim();
                if rest.parse::<i64>().is_ok() {
                    let columns = vec![ColumnDesc::named(rest, super::ColumnKind::Int)];
                    let rows = vec![vec![Some(rest.to_string())]];
                    return Ok(ExecuteOutcome::Rows(Box::new(VecResultSet::new(
                        columns, rows,
                    ))));
                }
                let Some(table) = table_after_from(trimmed) else {
                    return Err(BackendError::Execute(format!(
                        "unsupported query: {trimmed}"
                    )));
                };
                match db.tables.get(&table) {
                    Some((columns, rows)) => Ok(ExecuteOutcome::Rows(Box::new(
                        VecResultSet::new(columns.clone(), rows.clone()),
                    ))),
                    None => Err(BackendError::Execute(format!(
                        "Table '{table}' doesn't exist"
                    ))),
                }
            }
            "SHOW" => Err(BackendError::Execute(format!(
                "unsupported statement: {trimmed}"
            ))),
            "INSERT" => Ok(ExecuteOutcome::Affected(1)),
            "UPDATE" | "DELETE" => Ok(ExecuteOutcome::Affected(0)),
            "CREATE" => {
                if let Some(name) = third_token(trimmed) {
                    db.tables.entry(name).or_insert_with(|| (vec![], vec![]));
                }
                Ok(ExecuteOutcome::Affected(0))
            }
            "DROP" => {
                if let Some(name) = third_token(trimmed) {
                    db.tables.remove(&name);
                }
                Ok(ExecuteOutcome::Affected(0))
            }
            _ => Ok(ExecuteOutcome::Affected(0)),
        }
    }

    async fn set_schema(&mut self, schema: &str) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::ConnectionLost("session closed".to_string()));
        }
        self.schema = schema.to_string();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.closed = true;
        Ok(())
    }

    fn server_version(&self) -> Option<String> {
        None
    }
}
