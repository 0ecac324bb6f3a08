use crate::backend::{BackendConnector, BackendError, BackendSession, ExecuteOutcome, ResultSet};
use crate::protocol::postgres::backend_msg as msg;
use crate::protocol::postgres::codec::{PgFrameReader, PgMessageWriter};
use crate::protocol::postgres::constants::{frontend_tag, TransactionStatus};
use crate::protocol::postgres::frontend::{self, StartupFrame, StartupMessage};
use crate::server::{
    GatewayConfig, GatewayError, ProtocolEngine, ProtocolKind, DEFAULT_PG_SERVER_VERSION,
};
use crate::sql::{self, SqlParser};

use async_trait::async_trait;
use common::metrics::metric_def::GATEWAY_BACKEND_ERRORS;
use common::metrics::{common_labels, counter_inc};
use common::ShutdownMessage;
use hashbrown::HashMap;
use rand::Rng;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};

/// The PostgreSQL protocol front: SSL probe refusal, StartupMessage v3,
/// the simple-query protocol and the extended (Parse/Bind/Execute) flow,
/// all against one backend session per client.
pub struct PostgresEngine {
    config: Arc<GatewayConfig>,
    connector: Arc<dyn BackendConnector>,
    parser: Arc<dyn SqlParser>,
}

impl PostgresEngine {
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
        let client_reader = PgFrameReader::new(reader);
        let mut client_writer = PgMessageWriter::new(writer);

        let backend = match self.connector.connect(&self.config.target).await {
            Ok(backend) => backend,
            Err(e) => {
                warn!("GatewaySrv conn_id={conn_id} backend connect failed: {e}");
                counter_inc(GATEWAY_BACKEND_ERRORS, 1, Some(common_labels()));
                msg::write_error_response(&mut client_writer, "FATAL", "08006", &e.to_string())
                    .await?;
                client_writer.flush_all().await?;
                return Err(e.into());
            }
        };

        let mut session = PostgresSession {
            reader: client_reader,
            writer: client_writer,
            backend,
            conn_id,
            txn: TransactionStatus::Idle,
            statements: HashMap::new(),
            portals: HashMap::new(),
            error_pending: false,
        };
        let result = session.run(self.parser.as_ref(), shutdown).await;
        session.teardown().await;
        result
    }
}

#[async_trait]
impl ProtocolEngine for PostgresEngine {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Postgresql
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

/// A destination bound by `B`, executed by `E`.
#[derive(Debug, Clone)]
struct Portal {
    statement: String,
    params: Vec<Option<String>>,
    /// Set by Describe: Execute answers with a RowDescription ahead of the
    /// rows.
    described: bool,
}

struct PostgresSession<R, W> {
    reader: PgFrameReader<R>,
    writer: PgMessageWriter<W>,
    backend: Box<dyn BackendSession>,
    conn_id: u64,
    txn: TransactionStatus,
    statements: HashMap<String, String>,
    portals: HashMap<String, Portal>,
    /// After an error inside an extended-query sequence, everything up to
    /// the next Sync is discarded.
    error_pending: bool,
}

impl<R, W> PostgresSession<R, W>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    async fn run(
        &mut self,
        parser: &dyn SqlParser,
        mut shutdown: watch::Receiver<ShutdownMessage>,
    ) -> Result<(), GatewayError> {
        let Some(startup) = self.startup().await? else {
            return Ok(());
        };
        self.login(&startup).await?;
        self.command_loop(parser, &mut shutdown).await
    }

    async fn teardown(mut self) {
        let _ = self.writer.flush_all().await;
        if let Err(e) = self.backend.close().await {
            warn!("GatewaySrv conn_id={} backend close error: {e}", self.conn_id);
        }
    }

    /// Handles the pre-auth frames: answers SSL probes with `N`, drops the
    /// connection on CancelRequest, returns the parsed StartupMessage.
    async fn startup(&mut self) -> Result<Option<StartupMessage>, GatewayError> {
        loop {
            let Some(payload) = self.reader.read_startup().await? else {
                return Ok(None);
            };
            match frontend::parse_startup(&payload) {
                Ok(StartupFrame::SslRequest) => {
                    self.writer.write_probe_answer(b'N').await?;
                    self.writer.flush_all().await?;
                }
                Ok(StartupFrame::CancelRequest) => {
                    debug!(
                        "GatewaySrv conn_id={} cancel request is not honored, closing",
                        self.conn_id
                    );
                    return Ok(None);
                }
                Ok(StartupFrame::Startup(startup)) => return Ok(Some(startup)),
                Err(e) => {
                    msg::write_error_response(&mut self.writer, "FATAL", "08P01", &e.to_string())
                        .await?;
                    self.writer.flush_all().await?;
                    return Err(GatewayError::Protocol(e.to_string()));
                }
            }
        }
    }

    /// No password challenge: AuthenticationOk, the parameter set every
    /// driver expects, BackendKeyData and the first ReadyForQuery.
    async fn login(&mut self, startup: &StartupMessage) -> Result<(), GatewayError> {
        for key in startup.params.keys() {
            if !frontend::RECOGNIZED_STARTUP_KEYS.contains(&key.as_str()) {
                debug!(
                    "GatewaySrv conn_id={} ignores startup option {key}",
                    self.conn_id
                );
            }
        }
        debug!(
            "GatewaySrv conn_id={} startup user={:?} database={:?}",
            self.conn_id,
            startup.user(),
            startup.database()
        );
        if let Some(database) = startup.database().filter(|db| !db.is_empty()) {
            if let Err(e) = self.backend.set_schema(database).await {
                warn!(
                    "GatewaySrv conn_id={} initial schema failed: {e}",
                    self.conn_id
                );
            }
        }

        let server_version = self
            .backend
            .server_version()
            .unwrap_or_else(|| DEFAULT_PG_SERVER_VERSION.to_string());

        msg::write_auth_ok(&mut self.writer).await?;
        for (name, value) in [
            ("server_version", server_version.as_str()),
            ("server_encoding", "UTF8"),
            ("client_encoding", "UTF8"),
            ("DateStyle", "ISO, MDY"),
            ("TimeZone", "UTC"),
            ("integer_datetimes", "on"),
        ] {
            msg::write_parameter_status(&mut self.writer, name, value).await?;
        }
        let secret_key = rand::thread_rng().gen::<i32>();
        msg::write_backend_key_data(&mut self.writer, self.conn_id as i32, secret_key).await?;
        msg::write_ready_for_query(&mut self.writer, self.txn).await?;
        self.writer.flush_all().await?;
        Ok(())
    }

    async fn command_loop(
        &mut self,
        parser: &dyn SqlParser,
        shutdown: &mut watch::Receiver<ShutdownMessage>,
    ) -> Result<(), GatewayError> {
        loop {
            let msg_opt = tokio::select! {
                _ = shutdown.changed() => {
                    debug!("GatewaySrv conn_id={} exits on shutdown", self.conn_id);
                    return Ok(());
                }
                m = self.reader.next_message() => m?,
            };
            let Some((tag, payload)) = msg_opt else {
                return Ok(()); // client EOF
            };

            match tag {
                frontend_tag::QUERY => {
                    self.error_pending = false;
                    self.on_simple_query(parser, &payload).await?;
                }
                frontend_tag::TERMINATE => return Ok(()),
                frontend_tag::SYNC => {
                    self.error_pending = false;
                    msg::write_ready_for_query(&mut self.writer, self.txn).await?;
                }
                frontend_tag::FLUSH => {}
                frontend_tag::PARSE
                | frontend_tag::BIND
                | frontend_tag::DESCRIBE
                | frontend_tag::EXECUTE
                | frontend_tag::CLOSE => {
                    if !self.error_pending {
                        self.on_extended(tag, &payload).await?;
                    }
                }
                other => {
                    warn!(
                        "GatewaySrv conn_id={} unsupported message type {:?}",
                        self.conn_id, other as char
                    );
                    msg::write_error_response(
                        &mut self.writer,
                        "ERROR",
                        "0A000",
                        &format!("unsupported message type '{}'", other as char),
                    )
                    .await?;
                    msg::write_ready_for_query(&mut self.writer, self.txn).await?;
                }
            }
            self.writer.flush_all().await?;
        }
    }

    async fn on_simple_query(
        &mut self,
        parser: &dyn SqlParser,
        payload: &[u8],
    ) -> Result<(), GatewayError> {
        let sql = match frontend::parse_query(payload) {
            Ok(sql) => sql,
            Err(e) => {
                msg::write_error_response(&mut self.writer, "ERROR", "08P01", &e.to_string())
                    .await?;
                msg::write_ready_for_query(&mut self.writer, self.txn).await?;
                return Ok(());
            }
        };

        let trimmed = sql.trim();
        if trimmed.is_empty() || trimmed == ";" {
            msg::write_empty_query_response(&mut self.writer).await?;
            msg::write_ready_for_query(&mut self.writer, self.txn).await?;
            return Ok(());
        }
        if let Err(e) = parser.validate(&sql) {
            msg::write_error_response(&mut self.writer, "ERROR", "42601", &e).await?;
            self.fail_txn();
            msg::write_ready_for_query(&mut self.writer, self.txn).await?;
            return Ok(());
        }

        let rewritten = sql::rewrite_for_postgres(&sql);
        match self.backend.execute(&rewritten).await {
            Ok(ExecuteOutcome::Rows(mut rs)) => {
                let columns = rs.columns().to_vec();
                msg::write_row_description(&mut self.writer, &columns).await?;
                if let Some(count) = self.stream_rows(rs.as_mut()).await? {
                    msg::write_command_complete(&mut self.writer, &format!("SELECT {count}"))
                        .await?;
                }
            }
            Ok(ExecuteOutcome::Affected(n)) => {
                self.track_txn(&sql);
                msg::write_command_complete(&mut self.writer, &sql::command_tag(&sql, n)).await?;
            }
            Err(e) => self.write_backend_error(e).await?,
        }
        // success or error, a Q response ends with exactly one ReadyForQuery
        msg::write_ready_for_query(&mut self.writer, self.txn).await?;
        Ok(())
    }

    async fn on_extended(&mut self, tag: u8, payload: &[u8]) -> Result<(), GatewayError> {
        match tag {
            frontend_tag::PARSE => self.on_parse(payload).await,
            frontend_tag::BIND => self.on_bind(payload).await,
            frontend_tag::DESCRIBE => self.on_describe(payload).await,
            frontend_tag::EXECUTE => self.on_execute(payload).await,
            frontend_tag::CLOSE => self.on_close(payload).await,
            _ => Ok(()),
        }
    }

    async fn on_parse(&mut self, payload: &[u8]) -> Result<(), GatewayError> {
        let parsed = match frontend::parse_parse(payload) {
            Ok(parsed) => parsed,
            Err(e) => return self.extended_error("08P01", &e.to_string()).await,
        };
        debug!(
            "GatewaySrv conn_id={} parse name={:?} sql={:?}",
            self.conn_id, parsed.name, parsed.query
        );
        self.statements.insert(parsed.name, parsed.query);
        msg::write_parse_complete(&mut self.writer).await?;
        Ok(())
    }

    async fn on_bind(&mut self, payload: &[u8]) -> Result<(), GatewayError> {
        let bind = match frontend::parse_bind(payload) {
            Ok(bind) => bind,
            Err(e) => return self.extended_error("08P01", &e.to_string()).await,
        };
        if bind.param_formats.contains(&1) && !bind.params.is_empty() {
            return self
                .extended_error("0A000", "binary parameter format is not supported")
                .await;
        }
        let mut params = Vec::with_capacity(bind.params.len());
        for param in bind.params {
            match param {
                None => params.push(None),
                Some(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => params.push(Some(text)),
                    Err(_) => {
                        return self
                            .extended_error("22021", "parameter value is not valid UTF-8")
                            .await
                    }
                },
            }
        }
        self.portals.insert(
            bind.portal,
            Portal {
                statement: bind.statement,
                params,
                described: false,
            },
        );
        msg::write_bind_complete(&mut self.writer).await?;
        Ok(())
    }

    async fn on_describe(&mut self, payload: &[u8]) -> Result<(), GatewayError> {
        let target = match frontend::parse_targeted(payload) {
            Ok(target) => target,
            Err(e) => return self.extended_error("08P01", &e.to_string()).await,
        };
        if target.kind == b'S' {
            if !self.statements.contains_key(&target.name) {
                return self
                    .extended_error(
                        "26000",
                        &format!("prepared statement \"{}\" does not exist", target.name),
                    )
                    .await;
            }
            // parameter types are never inferred; values arrive as text and
            // are bound at Execute time
            msg::write_parameter_description(&mut self.writer, &[]).await?;
            msg::write_no_data(&mut self.writer).await?;
        } else {
            match self.portals.get_mut(&target.name) {
                Some(portal) => portal.described = true,
                None => {
                    return self
                        .extended_error(
                            "34000",
                            &format!("portal \"{}\" does not exist", target.name),
                        )
                        .await
                }
            }
        }
        Ok(())
    }

    async fn on_execute(&mut self, payload: &[u8]) -> Result<(), GatewayError> {
        let exec = match frontend::parse_execute(payload) {
            Ok(exec) => exec,
            Err(e) => return self.extended_error("08P01", &e.to_string()).await,
        };
        let Some(portal) = self.portals.get(&exec.portal).cloned() else {
            return self
                .extended_error("34000", &format!("portal \"{}\" does not exist", exec.portal))
                .await;
        };
        let Some(statement_sql) = self.statements.get(&portal.statement).cloned() else {
            return self
                .extended_error(
                    "26000",
                    &format!("prepared statement \"{}\" does not exist", portal.statement),
                )
                .await;
        };

        let interpolated = bind_parameters(&statement_sql, &portal.params);
        let rewritten = sql::rewrite_for_postgres(&interpolated);
        match self.backend.execute(&rewritten).await {
            Ok(ExecuteOutcome::Rows(mut rs)) => {
                let columns = rs.columns().to_vec();
                if portal.described {
                    msg::write_row_description(&mut self.writer, &columns).await?;
                }
                match self.stream_rows(rs.as_mut()).await? {
                    Some(count) => {
                        msg::write_command_complete(&mut self.writer, &format!("SELECT {count}"))
                            .await?;
                    }
                    None => self.error_pending = true,
                }
            }
            Ok(ExecuteOutcome::Affected(n)) => {
                self.track_txn(&interpolated);
                msg::write_command_complete(&mut self.writer, &sql::command_tag(&interpolated, n))
                    .await?;
            }
            Err(e) => {
                let recoverable = matches!(e, BackendError::Execute(_));
                self.write_backend_error(e).await?;
                if recoverable {
                    self.error_pending = true;
                }
            }
        }
        Ok(())
    }

    async fn on_close(&mut self, payload: &[u8]) -> Result<(), GatewayError> {
        let target = match frontend::parse_targeted(payload) {
            Ok(target) => target,
            Err(e) => return self.extended_error("08P01", &e.to_string()).await,
        };
        // closing something unknown is not an error
        if target.kind == b'S' {
            self.statements.remove(&target.name);
        } else {
            self.portals.remove(&target.name);
        }
        msg::write_close_complete(&mut self.writer).await?;
        Ok(())
    }

    /// Writes the rows of a result set; `Ok(None)` means the stream broke
    /// and an ErrorResponse already went out.
    async fn stream_rows(&mut self, rs: &mut dyn ResultSet) -> Result<Option<u64>, GatewayError> {
        let mut count = 0u64;
        loop {
            match rs.next_row() {
                Ok(Some(row)) => {
                    msg::write_data_row(&mut self.writer, &row).await?;
                    count += 1;
                }
                Ok(None) => return Ok(Some(count)),
                Err(e) => {
                    self.write_backend_error(e).await?;
                    return Ok(None);
                }
            }
        }
    }

    /// Execute failures answer with ERROR and the session continues; a lost
    /// backend answers with FATAL and tears the session down.
    async fn write_backend_error(&mut self, e: BackendError) -> Result<(), GatewayError> {
        counter_inc(GATEWAY_BACKEND_ERRORS, 1, Some(common_labels()));
        match e {
            BackendError::Execute(ref m) => {
                msg::write_error_response(
                    &mut self.writer,
                    "ERROR",
                    "42000",
                    &format!("SQL Error: {m}"),
                )
                .await?;
                self.fail_txn();
                Ok(())
            }
            fatal => {
                msg::write_error_response(&mut self.writer, "FATAL", "08006", &fatal.to_string())
                    .await?;
                self.writer.flush_all().await?;
                Err(fatal.into())
            }
        }
    }

    async fn extended_error(&mut self, sqlstate: &str, message: &str) -> Result<(), GatewayError> {
        msg::write_error_response(&mut self.writer, "ERROR", sqlstate, message).await?;
        self.fail_txn();
        self.error_pending = true;
        Ok(())
    }

    fn fail_txn(&mut self) {
        if self.txn == TransactionStatus::Transaction {
            self.txn = TransactionStatus::Failed;
        }
    }

    /// Transaction status hint for ReadyForQuery, tracked from the statement
    /// keywords the gateway forwards.
    fn track_txn(&mut self, sql: &str) {
        match sql::leading_keyword(sql).as_str() {
            "BEGIN" | "START" => self.txn = TransactionStatus::Transaction,
            "COMMIT" | "ROLLBACK" | "END" => self.txn = TransactionStatus::Idle,
            _ => {}
        }
    }
}

/// True for an integer or decimal literal: an optional leading `-`, digits,
/// at most one dot. `inf`/`nan` and anything `f64::from_str` is lenient
/// about stay quoted.
fn is_numeric_literal(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    !digits.is_empty()
        && digits.chars().any(|c| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|c| *c == '.').count() <= 1
}

/// Substitutes `$n` placeholders with text-format parameter literals,
/// highest index first so `$1` never clobbers the prefix of `$10`.
fn bind_parameters(sql: &str, params: &[Option<String>]) -> String {
    let mut out = sql.to_string();
    for (idx, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", idx + 1);
        let literal = match param {
            None => "NULL".to_string(),
            Some(value) if is_numeric_literal(value) => value.clone(),
            Some(value) => format!("'{}'", value.replace('\'', "''")),
        };
        out = out.replace(&placeholder, &literal);
    }
    out
}
