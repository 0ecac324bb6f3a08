use crate::backend::TargetConfig;
use crate::server::{GatewayConfig, ProtocolKind};

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[clap(
    name = "sql-gateway",
    version = "0.1.0",
    about = "multi-protocol gateway in front of a single SQL backend."
)]
pub struct GatewayServerArgs {
    /// Which protocol front to enable on the listen port.
    #[clap(long = "proxy-db-type", value_enum, default_value_t = ProtocolKind::Mysql)]
    pub db_type: ProtocolKind,
    /// Listen port; defaults to 3307 for mysql, 5432 for postgresql.
    #[clap(long = "proxy-port", value_name = "PORT")]
    pub port: Option<u16>,
    #[clap(long = "target.host", value_name = "HOST", default_value = "127.0.0.1")]
    pub target_host: String,
    #[clap(long = "target.port", value_name = "PORT", default_value_t = 3306)]
    pub target_port: u16,
    #[clap(long = "target.username", value_name = "USER", default_value = "root")]
    pub target_username: String,
    #[clap(long = "target.password", value_name = "PASSWORD", default_value = "")]
    pub target_password: String,
    #[clap(long = "target.database", value_name = "DATABASE", default_value = "")]
    pub target_database: String,
    #[clap(long, value_name = "WORKS", default_value_t = 4)]
    pub works: usize,
    #[clap(long, value_name = "LOG_LEVEL")]
    pub log_level: Option<String>,
    #[clap(long, value_name = "ENABLE METRICS COLLECTOR", default_value_t = false)]
    pub enable_metrics: bool,
}

impl GatewayServerArgs {
    pub fn listen_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.db_type.default_port())
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            protocol: self.db_type,
            port: self.listen_port(),
            target: TargetConfig {
                host: self.target_host.clone(),
                port: self.target_port,
                username: self.target_username.clone(),
                password: self.target_password.clone(),
                database: self.target_database.clone(),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    pub fn test_defaults() {
        let args = GatewayServerArgs::parse_from(["sql-gateway"]);
        assert_eq!(args.db_type, ProtocolKind::Mysql);
        assert_eq!(args.listen_port(), 3307);
        assert_eq!(args.works, 4);
        assert!(!args.enable_metrics);
    }

    #[test]
    pub fn test_config_surface() {
        let args = GatewayServerArgs::parse_from([
            "sql-gateway",
            "--proxy-db-type",
            "postgresql",
            "--proxy-port",
            "6432",
            "--target.host",
            "db.internal",
            "--target.port",
            "5432",
            "--target.username",
            "app",
            "--target.password",
            "secret",
            "--target.database",
            "dmp",
        ]);
        let config = args.gateway_config();
        assert_eq!(config.protocol, ProtocolKind::Postgresql);
        assert_eq!(config.port, 6432);
        assert_eq!(config.target.host, "db.internal");
        assert_eq!(config.target.database, "dmp");
    }

    #[test]
    pub fn test_postgres_default_port() {
        let args =
            GatewayServerArgs::parse_from(["sql-gateway", "--proxy-db-type", "postgresql"]);
        assert_eq!(args.listen_port(), 5432);
    }
}
