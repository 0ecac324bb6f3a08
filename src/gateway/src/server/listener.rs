use crate::backend::BackendConnector;
use crate::server::mysql_session::MysqlEngine;
use crate::server::postgres_session::PostgresEngine;
use crate::server::{GatewayConfig, ProtocolEngine, ProtocolKind};
use crate::sql::SqlParser;

use common::metrics::metric_def::{GATEWAY_CONN_TOTAL, GATEWAY_CURR_CONN};
use common::metrics::{common_labels, counter_inc, gauge_dec, gauge_inc};
use common::ShutdownMessage;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Binds the configured port and runs one session task per accepted
/// connection. Shutdown is cooperative: the accept loop stops first, then
/// live sessions finish their current command and exit.
pub struct GatewayListener {
    config: Arc<GatewayConfig>,
    engine: Arc<dyn ProtocolEngine>,
    sessions: Arc<DashMap<u64, SocketAddr>>,
    next_conn_id: AtomicU64,
}

impl GatewayListener {
    pub fn new(
        config: GatewayConfig,
        connector: Arc<dyn BackendConnector>,
        parser: Arc<dyn SqlParser>,
    ) -> Self {
        let config = Arc::new(config);
        let engine: Arc<dyn ProtocolEngine> = match config.protocol {
            ProtocolKind::Mysql => Arc::new(MysqlEngine::new(
                Arc::clone(&config),
                connector,
                parser,
            )),
            ProtocolKind::Postgresql => Arc::new(PostgresEngine::new(
                Arc::clone(&config),
                connector,
                parser,
            )),
        };
        Self {
            config,
            engine,
            sessions: Arc::new(DashMap::new()),
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub async fn serve(
        &self,
        shutdown_rx: watch::Receiver<ShutdownMessage>,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        info!(
            "GatewaySrv listening on port {} protocol={:?}",
            self.config.port, self.config.protocol
        );

        let mut shutdown = shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("GatewaySrv stops accepting connections");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            self.spawn_session(stream, addr, shutdown_rx.clone());
                        }
                        Err(e) => {
                            warn!("GatewaySrv accept connection err. cause by {e:?}");
                        }
                    }
                }
            }
        }
        drop(listener);
        self.drain_sessions().await;
        Ok(())
    }

    fn spawn_session(
        &self,
        stream: tokio::net::TcpStream,
        addr: SocketAddr,
        shutdown: watch::Receiver<ShutdownMessage>,
    ) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(conn_id, addr);
        gauge_inc(GATEWAY_CURR_CONN, 1_f64, Some(common_labels()));
        counter_inc(GATEWAY_CONN_TOTAL, 1, Some(common_labels()));
        info!("GatewaySrv accepted conn_id={conn_id} peer={addr}");

        let engine = Arc::clone(&self.engine);
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            if let Err(e) = engine.serve_connection(stream, conn_id, shutdown).await {
                warn!("GatewaySrv conn_id={conn_id} session ended with error: {e}");
            }
            sessions.remove(&conn_id);
            gauge_dec(GATEWAY_CURR_CONN, 1_f64, Some(common_labels()));
        });
    }

    /// Sessions observe the shutdown flag between commands; give them a
    /// bounded window to finish in-flight work.
    async fn drain_sessions(&self) {
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while !self.sessions.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "GatewaySrv shutdown with {} session(s) still live",
                    self.sessions.len()
                );
                return;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        info!("GatewaySrv all sessions drained");
    }
}
