use clap::Parser;
use common::ShutdownMessage;
use gateway::backend::memory::MemoryConnector;
use gateway::server::cli_args::GatewayServerArgs;
use gateway::server::listener::GatewayListener;
use gateway::sql::PermissiveParser;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

async fn shutdown_signal() -> ShutdownMessage {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        ctrl_c_v = ctrl_c => {
            let msg = format!("GatewaySrv receive ctrl_c signal  {ctrl_c_v:?}");
            ShutdownMessage::Cancel(msg)
        },
        v = terminate => {
            let msg = format!("GatewaySrv receive terminate signal  {v:?}");
            ShutdownMessage::Cancel(msg)
        },
    }
}

fn main() -> anyhow::Result<()> {
    let gateway_args = GatewayServerArgs::parse();
    let log_level_string = gateway_args
        .log_level
        .clone()
        .unwrap_or("INFO".to_string());
    let level = Level::from_str(log_level_string.as_str())?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("INFO,hyper=INFO,tower=INFO,h2=INFO"))
        .add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_line_number(true)
        .init();

    let works = gateway_args.works;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("SQL_GATEWAY")
        .worker_threads(works)
        .build()?;

    info!(
        "GatewaySrv starting protocol={:?} port={} target={}:{}/{}",
        gateway_args.db_type,
        gateway_args.listen_port(),
        gateway_args.target_host,
        gateway_args.target_port,
        gateway_args.target_database
    );
    if gateway_args.enable_metrics {
        common::metrics::init_metrics_context();
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownMessage::Init);
    runtime.block_on(async {
        // The in-memory backend stands in for the real session factory; a
        // deployment swaps in its own `BackendConnector` implementation.
        let listener = GatewayListener::new(
            gateway_args.gateway_config(),
            Arc::new(MemoryConnector::new()),
            Arc::new(PermissiveParser),
        );

        tokio::spawn(async move {
            let shutdown_msg = shutdown_signal().await;
            if let ShutdownMessage::Cancel(ref msg) = shutdown_msg {
                info!("GatewaySrv process receive shutdown msg {msg}");
            }
            let _ = shutdown_tx.send(shutdown_msg);
        });

        listener.serve(shutdown_rx).await
    })?;
    Ok(())
}
