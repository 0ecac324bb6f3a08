use crate::backend::{BackendError, TargetConfig};
use crate::protocol::mysql::constants::{CommandCode, SCRAMBLE_SIZE};

use async_trait::async_trait;
use clap::ValueEnum;
use common::ShutdownMessage;
use mysql_common::constants::CapabilityFlags;
use num_traits::FromPrimitive;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;

pub mod cli_args;
pub mod listener;
pub mod mysql_session;
pub mod postgres_session;

/// Version string presented to MySQL clients when the backend has none.
pub const DEFAULT_MYSQL_SERVER_VERSION: &str = "5.7.25";
/// `server_version` ParameterStatus fallback for PostgreSQL clients.
pub const DEFAULT_PG_SERVER_VERSION: &str = "13.0";

pub const GATEWAY_COM_METRIC_LABEL_KEY: &str = "gateway_com";

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Mysql,
    Postgresql,
}

impl ProtocolKind {
    /// Defaults sit next to, not on top of, the real servers' ports: a local
    /// MySQL on 3306 stays reachable while the gateway takes 3307.
    pub fn default_port(&self) -> u16 {
        match self {
            ProtocolKind::Mysql => 3307,
            ProtocolKind::Postgresql => 5432,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub protocol: ProtocolKind,
    pub port: u16,
    pub target: TargetConfig,
}

/// Session-fatal faults. Per-statement failures never surface here; the
/// dispatch loops convert them into wire error packets and keep going.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Capabilities advertised in the initial handshake. DEPRECATE_EOF is left
/// out on purpose: resultsets terminate with classic EOF packets.
pub fn default_capabilities() -> CapabilityFlags {
    static DEFAULT_CAPABILITIES_ONCE: OnceLock<CapabilityFlags> = OnceLock::new();
    *DEFAULT_CAPABILITIES_ONCE.get_or_init(|| {
        CapabilityFlags::CLIENT_CONNECT_WITH_DB
            | CapabilityFlags::CLIENT_FOUND_ROWS
            | CapabilityFlags::CLIENT_IGNORE_SPACE
            | CapabilityFlags::CLIENT_LONG_FLAG
            | CapabilityFlags::CLIENT_LONG_PASSWORD
            | CapabilityFlags::CLIENT_MULTI_RESULTS
            | CapabilityFlags::CLIENT_MULTI_STATEMENTS
            | CapabilityFlags::CLIENT_PLUGIN_AUTH
            | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
            | CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_TRANSACTIONS
    })
}

/// Per-session scramble from a CSPRNG: random ASCII, never NUL or `$`.
/// https://github.com/mysql/mysql-server/blob/8.0/mysys/crypt_genhash_impl.cc#L427
pub fn gen_scramble() -> [u8; SCRAMBLE_SIZE] {
    let mut scramble: [u8; SCRAMBLE_SIZE] = [0; SCRAMBLE_SIZE];
    let mut r = StdRng::from_entropy();
    for item in scramble.iter_mut() {
        let value = r.gen_range(0..127) as u8;
        *item = value;
        if *item == b'\0' || *item == b'$' {
            *item += 1;
        }
    }
    scramble
}

/// Metric label sets per MySQL command byte, built once.
pub fn sql_com_labels() -> &'static HashMap<u8, Vec<(&'static str, String)>> {
    static GATEWAY_COM: OnceLock<HashMap<u8, Vec<(&'static str, String)>>> = OnceLock::new();
    GATEWAY_COM.get_or_init(|| {
        let process_labels = common::metrics::common_labels();
        (0u8..=CommandCode::ComEnd as u8)
            .filter_map(|code| CommandCode::from_u8(code).map(|com| (code, com)))
            .map(|(code, com)| {
                (
                    code,
                    [
                        &[(GATEWAY_COM_METRIC_LABEL_KEY, com.as_ref().to_string())][..],
                        &process_labels[..],
                    ]
                    .concat(),
                )
            })
            .collect()
    })
}

/// One protocol front. The listener owns the accept loop and hands every
/// connection to exactly one engine; the engines own everything from the
/// first byte to teardown.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    async fn serve_connection(
        &self,
        stream: TcpStream,
        conn_id: u64,
        shutdown: watch::Receiver<ShutdownMessage>,
    ) -> Result<(), GatewayError>;
}
