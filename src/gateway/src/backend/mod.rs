pub mod memory;

use async_trait::async_trait;
use std::collections::VecDeque;
use thiserror::Error;

/// Failures raised by the backend collaborator. Execute failures stay inside
/// the session (surfaced as a wire error); connect and connection-lost
/// failures tear the session down.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend connect failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Execute(String),
    #[error("backend connection lost: {0}")]
    ConnectionLost(String),
}

/// Backend-neutral column type code, the pivot between backend result
/// metadata and each wire protocol's type encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Bit,
    Bool,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
    Date,
    Time,
    Timestamp,
    Char,
    Varchar,
    Text,
    Blob,
}

#[derive(Debug, Clone)]
pub struct ColumnDesc {
    pub name: String,
    /// Originating table, empty for computed columns.
    pub table: String,
    pub kind: ColumnKind,
    pub display_size: u32,
    pub nullable: bool,
    pub signed: bool,
    pub auto_increment: bool,
    pub precision: u16,
    pub scale: u8,
}

impl ColumnDesc {
    pub fn named(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            table: String::new(),
            kind,
            display_size: 0,
            nullable: true,
            signed: true,
            auto_increment: false,
            precision: 0,
            scale: 0,
        }
    }
}

/// One row: a text cell per column, `None` for NULL.
pub type Row = Vec<Option<String>>;

/// Column metadata plus a lazy row iterator — the contract between the
/// protocol engines and whatever executes SQL.
pub trait ResultSet: Send {
    fn columns(&self) -> &[ColumnDesc];
    fn next_row(&mut self) -> Result<Option<Row>, BackendError>;
}

pub enum ExecuteOutcome {
    Rows(Box<dyn ResultSet>),
    Affected(u64),
}

impl std::fmt::Debug for ExecuteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecuteOutcome::Rows(_) => f.debug_tuple("Rows").field(&"<ResultSet>").finish(),
            ExecuteOutcome::Affected(n) => f.debug_tuple("Affected").field(n).finish(),
        }
    }
}

/// The single gateway-wide backend coordinates.
#[derive(Debug, Clone, Default)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

/// A live connection to the configured backend database. One per client
/// session, driven strictly one statement at a time.
#[async_trait]
pub trait BackendSession: Send {
    async fn execute(&mut self, sql: &str) -> Result<ExecuteOutcome, BackendError>;

    async fn set_schema(&mut self, schema: &str) -> Result<(), BackendError>;

    /// Must be idempotent; teardown calls it on every exit path.
    async fn close(&mut self) -> Result<(), BackendError>;

    /// Backend-reported version, used in the handshake / ParameterStatus.
    /// `None` falls back to a protocol-appropriate default.
    fn server_version(&self) -> Option<String>;
}

#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, target: &TargetConfig) -> Result<Box<dyn BackendSession>, BackendError>;
}

/// A fully materialized result set. Backends that stream can implement
/// [`ResultSet`] directly; everything in this crate goes through this.
pub struct VecResultSet {
    columns: Vec<ColumnDesc>,
    rows: VecDeque<Row>,
}

impl VecResultSet {
    pub fn new(columns: Vec<ColumnDesc>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }
}

impl ResultSet for VecResultSet {
    fn columns(&self) -> &[ColumnDesc] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Row>, BackendError> {
        Ok(self.rows.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_result_set_drains_in_order() {
        let mut rs = VecResultSet::new(
            vec![ColumnDesc::named("n", ColumnKind::Int)],
            vec![vec![Some("1".into())], vec![None]],
        );
        assert_eq!(rs.columns().len(), 1);
        assert_eq!(rs.next_row().unwrap(), Some(vec![Some("1".to_string())]));
        assert_eq!(rs.next_row().unwrap(), Some(vec![None]));
        assert_eq!(rs.next_row().unwrap(), None);
    }

    #[test]
    fn test_column_desc_defaults() {
        let col = ColumnDesc::named("id", ColumnKind::BigInt);
        assert!(col.nullable);
        assert!(col.signed);
        assert!(!col.auto_increment);
        assert!(col.table.is_empty());
    }
}
