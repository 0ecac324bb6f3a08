use crate::backend::{
    BackendConnector, BackendError, BackendSession, ColumnDesc, ColumnKind, ExecuteOutcome, Row,
    VecResultSet,
};
use crate::protocol::mysql::basic::client_handshake_response;
use crate::protocol::mysql::constants::CommandCode;
use crate::protocol::mysql::error_codes::ErrorKind;
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::writers;
use crate::server::{
    default_capabilities, gen_scramble, sql_com_labels, GatewayConfig, GatewayError,
    ProtocolEngine, ProtocolKind, DEFAULT_MYSQL_SERVER_VERSION,
};
use crate::sql::{self, SqlParser};

use async_trait::async_trait;
use common::metrics::metric_def::{GATEWAY_BACKEND_ERRORS, GATEWAY_COM_LATENCY};
use common::metrics::{common_labels, counter_inc, MetricsTimer};
use common::ShutdownMessage;
use mysql_common::constants::{CapabilityFlags, StatusFlags};
use num_traits::FromPrimitive;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Variables served for `SHOW VARIABLES LIKE` without touching the backend.
/// Navicat-class clients probe these right after login.
fn session_variables() -> &'static [(&'static str, &'static str)] {
    &[
        ("autocommit", "ON"),
        ("lower_case_file_system", "OFF"),
        ("lower_case_table_names", "0"),
        ("max_allowed_packet", "16777215"),
        (
            "sql_mode",
            "ONLY_FULL_GROUP_BY,STRICT_TRANS_TABLES,NO_ZERO_IN_DATE,NO_ZERO_DATE,\
             ERROR_FOR_DIVISION_BY_ZERO,NO_ENGINE_SUBSTITUTION",
        ),
    ]
}

/// The MySQL protocol front: handshake v10, permissive authentication, and
/// the command phase over one backend session per client.
pub struct MysqlEngine {
    config: Arc<GatewayConfig>,
    connector: Arc<dyn BackendConnector>,
    parser: Arc<dyn SqlParser>,
}

impl MysqlEngine {
    pub fn new(
        config: Arc<GatewayConfig>,
        connector: Arc<dyn BackendConnector>,
        parser: Arc<dyn SqlParser>,
    ) -> Self {
        Self {
            config,
            connector,
            parser,
        }
    }

    /// Drives one client connection over any byte stream; tests run this
    /// over in-memory pipes.
    pub async fn run_session<R, W>(
        &self,
        reader: R,
        writer: W,
        conn_id: u64,
        shutdown: watch::Receiver<ShutdownMessage>,
    ) -> Result<(), GatewayError>
    where
        R: AsyncRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin,
    {
        let client_reader = PacketReader::new(reader);
        let mut client_writer = PacketWriter::new(writer);

        // Backend session comes first: a client we cannot serve is refused
        // before the handshake starts.
        let backend = match self.connector.connect(&self.config.target).await {
            Ok(backend) => backend,
            Err(e) => {
                warn!("GatewaySrv conn_id={conn_id} backend connect failed: {e}");
                counter_inc(GATEWAY_BACKEND_ERRORS, 1, Some(common_labels()));
                let msg = format!("SQL Error: {e}");
                writers::write_err_packet(
                    ErrorKind::ER_BACKEND_ERROR,
                    msg.as_bytes(),
                    &mut client_writer,
                )
                .await?;
                client_writer.flush_all().await?;
                return Err(e.into());
            }
        };

        let mut session = MysqlSession {
            reader: client_reader,
            writer: client_writer,
            backend,
            conn_id,
            schema: self.config.target.database.clone(),
            client_flags: default_capabilities(),
        };
        let result = session.run(self.parser.as_ref(), shutdown).await;
        session.teardown().await;
        result
    }
}

#[async_trait]
impl ProtocolEngine for MysqlEngine {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Mysql
    }

    async fn serve_connection(
        &self,
        stream: TcpStream,
        conn_id: u64,
        shutdown: watch::Receiver<ShutdownMessage>,
    ) -> Result<(), GatewayError> {
        let (reader, writer) = stream.into_split();
        self.run_session(reader, writer, conn_id, shutdown).await
    }
}

struct MysqlSession<R, W> {
    reader: PacketReader<R>,
    writer: PacketWriter<W>,
    backend: Box<dyn BackendSession>,
    conn_id: u64,
    schema: String,
    client_flags: CapabilityFlags,
}

impl<R, W> MysqlSession<R, W>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    async fn run(
        &mut self,
        parser: &dyn SqlParser,
        mut shutdown: watch::Receiver<ShutdownMessage>,
    ) -> Result<(), GatewayError> {
        self.handshake().await?;
        self.command_loop(parser, &mut shutdown).await
    }

    /// Closes the backend session before the client socket; both ends are
    /// attempted regardless of how the session ended.
    async fn teardown(mut self) {
        let _ = self.writer.flush_all().await;
        if let Err(e) = self.backend.close().await {
            warn!("GatewaySrv conn_id={} backend close error: {e}", self.conn_id);
        }
    }

    async fn handshake(&mut self) -> Result<(), GatewayError> {
        let scramble = gen_scramble();
        let version = self
            .backend
            .server_version()
            .unwrap_or_else(|| DEFAULT_MYSQL_SERVER_VERSION.to_string());
        writers::write_initial_handshake(
            &mut self.writer,
            self.conn_id as u32,
            scramble,
            &version,
            default_capabilities(),
        )
        .await?;

        let Some((seq, pkt)) = self.reader.next_async().await? else {
            return Err(GatewayError::Protocol(
                "client closed during handshake".to_string(),
            ));
        };
        let response = client_handshake_response(&pkt)
            .map_err(|e| GatewayError::Protocol(format!("malformed handshake response: {e:?}")))?
            .1;
        self.writer.set_seq(seq.wrapping_add(1));

        if response.requests_ssl() {
            writers::write_err_packet(
                ErrorKind::ER_ACCESS_DENIED_ERROR,
                b"SSL not supported",
                &mut self.writer,
            )
            .await?;
            self.writer.flush_all().await?;
            return Err(GatewayError::Unsupported(
                "client requested SSL".to_string(),
            ));
        }

        self.client_flags = response.client_flag & default_capabilities();
        debug!(
            "GatewaySrv conn_id={} handshake user={} flags={:?}",
            self.conn_id,
            response.username_lossy(),
            self.client_flags
        );

        let initial_schema = response
            .database
            .as_deref()
            .and_then(|db| std::str::from_utf8(db).ok())
            .filter(|db| !db.is_empty())
            .map(str::to_string)
            .or_else(|| (!self.schema.is_empty()).then(|| self.schema.clone()));
        if let Some(schema) = initial_schema {
            if let Err(e) = self.backend.set_schema(&schema).await {
                warn!("GatewaySrv conn_id={} initial schema failed: {e}", self.conn_id);
            }
            self.schema = schema;
        }

        // No password verification: a well-formed response is authenticated.
        writers::write_ok_packet(&mut self.writer, 0, 0, StatusFlags::SERVER_STATUS_AUTOCOMMIT)
            .await?;
        self.writer.flush_all().await?;
        Ok(())
    }

    async fn command_loop(
        &mut self,
        parser: &dyn SqlParser,
        shutdown: &mut watch::Receiver<ShutdownMessage>,
    ) -> Result<(), GatewayError> {
        loop {
            let pkt_opt = tokio::select! {
                _ = shutdown.changed() => {
                    debug!("GatewaySrv conn_id={} exits on shutdown", self.conn_id);
                    return Ok(());
                }
                pkt = self.reader.next_async() => pkt?,
            };
            let Some((seq, pkt)) = pkt_opt else {
                return Ok(()); // client EOF
            };
            if pkt.is_empty() {
                return Err(GatewayError::Protocol(
                    "zero-length command packet".to_string(),
                ));
            }
            // every response series starts right after the request packet
            self.writer.set_seq(seq.wrapping_add(1));

            let com_code = pkt[0];
            let _latency = sql_com_labels()
                .get(&com_code)
                .map(|labels| MetricsTimer::new_with_labels(GATEWAY_COM_LATENCY, labels));

            match CommandCode::from_u8(com_code) {
                Some(CommandCode::ComQuit) => return Ok(()),
                Some(CommandCode::ComInitDB) => self.on_init_db(&pkt[1..]).await?,
                Some(CommandCode::ComQuery) => self.on_query(parser, &pkt[1..]).await?,
                // COM_FIELD_LIST, COM_STATISTICS, COM_PING, COM_CHANGE_USER
                // and the rest are acknowledged without side effects, and an
                // unknown opcode is treated the same way rather than refused.
                Some(_) | None => {
                    writers::write_ok_packet(
                        &mut self.writer,
                        0,
                        0,
                        StatusFlags::SERVER_STATUS_AUTOCOMMIT,
                    )
                    .await?;
                }
            }
            self.writer.flush_all().await?;
        }
    }

    async fn on_init_db(&mut self, payload: &[u8]) -> Result<(), GatewayError> {
        let Ok(schema) = std::str::from_utf8(payload) else {
            writers::write_err_packet(
                ErrorKind::ER_BAD_DB_ERROR,
                b"database name is not UTF-8",
                &mut self.writer,
            )
            .await?;
            return Ok(());
        };
        let schema = schema.trim_end_matches('\0');
        match self.backend.set_schema(schema).await {
            Ok(()) => {
                self.schema = schema.to_string();
                writers::write_ok_packet(
                    &mut self.writer,
                    0,
                    0,
                    StatusFlags::SERVER_STATUS_AUTOCOMMIT,
                )
                .await?;
            }
            Err(e) => {
                self.write_backend_err(e).await?;
            }
        }
        Ok(())
    }

    async fn on_query(&mut self, parser: &dyn SqlParser, payload: &[u8]) -> Result<(), GatewayError> {
        let Ok(sql) = std::str::from_utf8(payload) else {
            writers::write_err_packet(
                ErrorKind::ER_PARSE_ERROR,
                b"query text is not UTF-8",
                &mut self.writer,
            )
            .await?;
            return Ok(());
        };
        let sql = sql.trim_end_matches('\0');

        // Each non-empty statement answers with its own response group and
        // the sequence id keeps advancing across all of them. An error ends
        // the whole stream; the session itself stays up.
        for statement in sql::split_statements(sql) {
            if let Err(msg) = parser.validate(statement) {
                writers::write_err_packet(
                    ErrorKind::ER_PARSE_ERROR,
                    msg.as_bytes(),
                    &mut self.writer,
                )
                .await?;
                return Ok(());
            }
            if !self.dispatch_statement(statement).await? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Runs one statement; `Ok(false)` means the response stream terminated
    /// with an ERR and any remaining statements must be dropped.
    async fn dispatch_statement(&mut self, statement: &str) -> Result<bool, GatewayError> {
        let trimmed = statement.trim();
        if trimmed.eq_ignore_ascii_case("SELECT DATABASE()") {
            let value = (!self.schema.is_empty()).then(|| self.schema.clone());
            let columns = vec![ColumnDesc::named("DATABASE()", ColumnKind::Varchar)];
            self.write_rows(columns, vec![vec![value]]).await?;
            return Ok(true);
        }
        if sql::leading_keyword(trimmed) == "SHOW" {
            return self.on_show(trimmed).await;
        }
        self.forward_statement(trimmed).await
    }

    async fn on_show(&mut self, statement: &str) -> Result<bool, GatewayError> {
        let upper = statement.to_ascii_uppercase();

        if upper.starts_with("SHOW VARIABLES LIKE") {
            let pattern = quoted_pattern(statement).unwrap_or_default();
            let columns = vec![
                ColumnDesc::named("Variable_name", ColumnKind::Varchar),
                ColumnDesc::named("Value", ColumnKind::Varchar),
            ];
            let rows: Vec<Row> = session_variables()
                .iter()
                .filter(|(name, _)| sql::like_match(&pattern, name))
                .map(|(name, value)| vec![Some(name.to_string()), Some(value.to_string())])
                .collect();
            self.write_rows(columns, rows).await?;
            return Ok(true);
        }

        if upper == "SHOW DATABASES" {
            if self.try_backend_show(statement).await? {
                return Ok(true);
            }
            let columns = vec![ColumnDesc::named("Database", ColumnKind::Varchar)];
            let mut names = vec![
                "information_schema".to_string(),
                "mysql".to_string(),
                "performance_schema".to_string(),
                "sys".to_string(),
            ];
            if !self.schema.is_empty() && !names.contains(&self.schema) {
                names.push(self.schema.clone());
            }
            let rows = names.into_iter().map(|name| vec![Some(name)]).collect();
            self.write_rows(columns, rows).await?;
            return Ok(true);
        }

        if upper.starts_with("SHOW TABLES") {
            if self.try_backend_show(statement).await? {
                return Ok(true);
            }
            let tokens: Vec<&str> = statement.split_whitespace().collect();
            let schema = match tokens.get(2) {
                Some(from) if from.eq_ignore_ascii_case("FROM") => tokens
                    .get(3)
                    .map(|db| db.trim_matches('`').to_string())
                    .unwrap_or_else(|| self.schema.clone()),
                _ => self.schema.clone(),
            };
            let header = format!("Tables_in_{schema}");
            let columns = vec![ColumnDesc::named(header, ColumnKind::Varchar)];
            self.write_rows(columns, vec![]).await?;
            return Ok(true);
        }

        self.forward_statement(statement).await
    }

    /// Delegates a SHOW statement; an execute failure selects the synthetic
    /// fallback instead of an ERR.
    async fn try_backend_show(&mut self, statement: &str) -> Result<bool, GatewayError> {
        match self.backend.execute(statement).await {
            Ok(outcome) => {
                self.write_outcome(outcome).await?;
                Ok(true)
            }
            Err(BackendError::Execute(e)) => {
                debug!(
                    "GatewaySrv conn_id={} `{statement}` not served by backend ({e}), synthesizing",
                    self.conn_id
                );
                Ok(false)
            }
            Err(fatal) => Err(fatal.into()),
        }
    }

    async fn forward_statement(&mut self, statement: &str) -> Result<bool, GatewayError> {
        match self.backend.execute(statement).await {
            Ok(outcome) => self.write_outcome(outcome).await,
            Err(e) => {
                self.write_backend_err(e).await?;
                Ok(false)
            }
        }
    }

    /// Text resultset: column count, definitions, EOF, rows, EOF. An update
    /// count answers with a plain OK.
    async fn write_outcome(&mut self, outcome: ExecuteOutcome) -> Result<bool, GatewayError> {
        match outcome {
            ExecuteOutcome::Affected(n) => {
                writers::write_ok_packet(
                    &mut self.writer,
                    n,
                    0,
                    StatusFlags::SERVER_STATUS_AUTOCOMMIT,
                )
                .await?;
                Ok(true)
            }
            ExecuteOutcome::Rows(mut rs) => {
                let columns = rs.columns().to_vec();
                writers::write_column_count(&mut self.writer, columns.len() as u64).await?;
                for column in &columns {
                    writers::write_column_definition(&mut self.writer, column).await?;
                }
                writers::write_eof_packet(&mut self.writer, StatusFlags::SERVER_STATUS_AUTOCOMMIT)
                    .await?;
                loop {
                    match rs.next_row() {
                        Ok(Some(row)) => {
                            writers::write_text_row(&mut self.writer, &row).await?;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            // mid-stream failure: ERR at the next sequence id
                            // terminates the resultset
                            self.write_backend_err(e).await?;
                            return Ok(false);
                        }
                    }
                }
                writers::write_eof_packet(&mut self.writer, StatusFlags::SERVER_STATUS_AUTOCOMMIT)
                    .await?;
                Ok(true)
            }
        }
    }

    async fn write_rows(
        &mut self,
        columns: Vec<ColumnDesc>,
        rows: Vec<Row>,
    ) -> Result<(), GatewayError> {
        self.write_outcome(ExecuteOutcome::Rows(Box::new(VecResultSet::new(
            columns, rows,
        ))))
        .await
        .map(|_| ())
    }

    /// Execute failures become an ERR and the session continues; a lost
    /// backend still answers the client before tearing the session down.
    async fn write_backend_err(&mut self, e: BackendError) -> Result<(), GatewayError> {
        counter_inc(GATEWAY_BACKEND_ERRORS, 1, Some(common_labels()));
        let msg = format!("SQL Error: {e}");
        writers::write_err_packet(ErrorKind::ER_BACKEND_ERROR, msg.as_bytes(), &mut self.writer)
            .await?;
        match e {
            BackendError::Execute(_) => Ok(()),
            fatal => Err(fatal.into()),
        }
    }
}

/// The text between the first pair of single quotes.
fn quoted_pattern(statement: &str) -> Option<String> {
    let start = statement.find('\'')? + 1;
    let end = statement[start..].find('\'')? + start;
    Some(statement[start..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_pattern() {
        assert_eq!(
            quoted_pattern("SHOW VARIABLES LIKE 'sql_mode'").as_deref(),
            Some("sql_mode")
        );
        assert_eq!(
            quoted_pattern("SHOW VARIABLES LIKE 'lower%'").as_deref(),
            Some("lower%")
        );
        assert_eq!(quoted_pattern("SHOW VARIABLES"), None);
    }

    #[test]
    fn test_session_variables_cover_required_keys() {
        let names: Vec<&str> = session_variables().iter().map(|(n, _)| *n).collect();
        assert!(names.contains(&"lower_case_file_system"));
        assert!(names.contains(&"lower_case_table_names"));
        assert!(names.contains(&"sql_mode"));
    }
}
