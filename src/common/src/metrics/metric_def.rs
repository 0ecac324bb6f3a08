pub const GATEWAY_MAX_CONN: &str = "gateway_max_connections";
pub const GATEWAY_CURR_CONN: &str = "gateway_curr_connections";
pub const GATEWAY_CONN_TOTAL: &str = "gateway_connections_total";
pub const GATEWAY_COM_LATENCY: &str = "gateway_com_latency";
pub const GATEWAY_BACKEND_ERRORS: &str = "gateway_backend_errors_total";

/// (name, description, type) triples for everything the gateway records.
pub fn all_gateway_metrics() -> &'static [(&'static str, &'static str, super::MetricType)] {
    use super::MetricType;
    &[
        (
            GATEWAY_MAX_CONN,
            "The max number of connections allowed by the gateway.",
            MetricType::Gauge,
        ),
        (
            GATEWAY_CURR_CONN,
            "The current client connection count.",
            MetricType::Gauge,
        ),
        (
            GATEWAY_CONN_TOTAL,
            "Client connections accepted since start.",
            MetricType::Counter,
        ),
        (
            GATEWAY_COM_LATENCY,
            "Latency of command execution in milliseconds.",
            MetricType::Histogram,
        ),
        (
            GATEWAY_BACKEND_ERRORS,
            "Backend connect/execute failures surfaced to clients.",
            MetricType::Counter,
        ),
    ]
}
