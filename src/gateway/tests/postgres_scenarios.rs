//! End-to-end exercises of the PostgreSQL protocol front over in-memory
//! pipes, with the in-memory backend standing in for the real database.

use common::ShutdownMessage;
use gateway::backend::memory::MemoryConnector;
use gateway::backend::TargetConfig;
use gateway::protocol::postgres::codec::PgFrameReader;
use gateway::server::postgres_session::PostgresEngine;
use gateway::server::{GatewayConfig, GatewayError, ProtocolKind};
use gateway::sql::PermissiveParser;

use std::sync::Arc;
use tokio::io::{duplex, split, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tokio::task::JoinHandle;

type ClientReader = PgFrameReader<ReadHalf<tokio::io::DuplexStream>>;
type ClientWriter = WriteHalf<tokio::io::DuplexStream>;

struct TestSession {
    reader: ClientReader,
    writer: ClientWriter,
    _shutdown_tx: watch::Sender<ShutdownMessage>,
    handle: JoinHandle<Result<(), GatewayError>>,
}

fn pg_engine(connector: MemoryConnector, database: &str) -> PostgresEngine {
    let config = Arc::new(GatewayConfig {
        protocol: ProtocolKind::Postgresql,
        port: 0,
        target: TargetConfig {
            database: database.to_string(),
            ..Default::default()
        },
    });
    PostgresEngine::new(config, Arc::new(connector), Arc::new(PermissiveParser))
}

fn start_session(engine: PostgresEngine) -> TestSession {
    let engine = Arc::new(engine);
    let (client, server) = duplex(1 << 16);
    let (server_reader, server_writer) = split(server);
    let (client_reader, client_writer) = split(client);
    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownMessage::Init);
    let handle = tokio::spawn(async move {
        engine
            .run_session(server_reader, server_writer, 7, shutdown_rx)
            .await
    });
    TestSession {
        reader: PgFrameReader::new(client_reader),
        writer: client_writer,
        _shutdown_tx: shutdown_tx,
        handle,
    }
}

async fn send_startup<W: AsyncWrite + Unpin>(writer: &mut W, params: &[(&str, &str)]) {
    let mut body = 196608i32.to_be_bytes().to_vec();
    for (key, value) in params {
        body.extend(key.as_bytes());
        body.push(0);
        body.extend(value.as_bytes());
        body.push(0);
    }
    body.push(0);
    writer
        .write_all(&((body.len() + 4) as u32).to_be_bytes())
        .await
        .unwrap();
    writer.write_all(&body).await.unwrap();
}

async fn send_message<W: AsyncWrite + Unpin>(writer: &mut W, tag: u8, body: &[u8]) {
    writer.write_all(&[tag]).await.unwrap();
    writer
        .write_all(&((body.len() + 4) as u32).to_be_bytes())
        .await
        .unwrap();
    writer.write_all(body).await.unwrap();
}

async fn next_message(session: &mut TestSession) -> (u8, Vec<u8>) {
    session.reader.next_message().await.unwrap().unwrap()
}

/// Drives startup (without SSL probe) and consumes the login sequence up to
/// the first ReadyForQuery.
async fn login(session: &mut TestSession, params: &[(&str, &str)]) {
    send_startup(&mut session.writer, params).await;

    let (tag, payload) = next_message(session).await;
    assert_eq!(tag, b'R');
    assert_eq!(payload, vec![0, 0, 0, 0]);

    for _ in 0..6 {
        let (tag, _) = next_message(session).await;
        assert_eq!(tag, b'S');
    }
    let (tag, payload) = next_message(session).await;
    assert_eq!(tag, b'K');
    assert_eq!(payload.len(), 8);
    let (tag, payload) = next_message(session).await;
    assert_eq!(tag, b'Z');
    assert_eq!(payload, vec![b'I']);
}

#[tokio::test]
async fn test_s4_ssl_probe_then_startup() {
    let mut session = start_session(pg_engine(MemoryConnector::new(), "dmp"));

    // SSLRequest: length 8, code 0x04d2162f; answered with a single 'N'
    session
        .writer
        .write_all(&8u32.to_be_bytes())
        .await
        .unwrap();
    session
        .writer
        .write_all(&80877103i32.to_be_bytes())
        .await
        .unwrap();
    let probe = session.reader.r.read_u8().await.unwrap();
    assert_eq!(probe, b'N');

    send_startup(
        &mut session.writer,
        &[("user", "postgres"), ("database", "dmp")],
    )
    .await;

    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'R');
    assert_eq!(payload, vec![0, 0, 0, 0]);

    let mut parameter_names = Vec::new();
    for _ in 0..6 {
        let (tag, payload) = next_message(&mut session).await;
        assert_eq!(tag, b'S');
        let name_end = payload.iter().position(|b| *b == 0).unwrap();
        parameter_names.push(String::from_utf8_lossy(&payload[..name_end]).to_string());
    }
    assert_eq!(
        parameter_names,
        vec![
            "server_version",
            "server_encoding",
            "client_encoding",
            "DateStyle",
            "TimeZone",
            "integer_datetimes"
        ]
    );

    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'K');
    assert_eq!(payload.len(), 8);

    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'Z');
    assert_eq!(payload, vec![b'I']);
}

#[tokio::test]
async fn test_s5_simple_select_one_int_column() {
    let mut session = start_session(pg_engine(MemoryConnector::new(), "dmp"));
    login(&mut session, &[("user", "postgres"), ("database", "dmp")]).await;

    send_message(&mut session.writer, b'Q', b"SELECT 1\0").await;

    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'T');
    assert_eq!(&payload[..2], &[0, 1]);
    let name_end = payload[2..].iter().position(|b| *b == 0).unwrap() + 2;
    let after_name = &payload[name_end + 1..];
    // table oid (4) + attnum (2), then type oid and size
    let oid = u32::from_be_bytes([after_name[6], after_name[7], after_name[8], after_name[9]]);
    let size = i16::from_be_bytes([after_name[10], after_name[11]]);
    assert_eq!(oid, 23);
    assert_eq!(size, 4);

    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'D');
    let mut expected = vec![0u8, 1];
    expected.extend(1i32.to_be_bytes());
    expected.push(b'1');
    assert_eq!(payload, expected);

    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'C');
    assert_eq!(payload, b"SELECT 1\0");

    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'Z');
    assert_eq!(payload, vec![b'I']);
}

#[tokio::test]
async fn test_s6_client_encoding_rewrite() {
    let connector = MemoryConnector::new();
    let mut session = start_session(pg_engine(connector.clone(), "dmp"));
    login(&mut session, &[("user", "postgres"), ("database", "dmp")]).await;

    send_message(
        &mut session.writer,
        b'Q',
        b"SET CLIENT_ENCODING TO 'UNICODE'\0",
    )
    .await;

    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'C');
    assert_eq!(payload, b"SET\0");
    let (tag, _) = next_message(&mut session).await;
    assert_eq!(tag, b'Z');

    assert_eq!(
        connector.statement_log(),
        vec!["SET client_encoding TO 'UTF8'".to_string()]
    );
}

#[tokio::test]
async fn test_backend_error_then_ready_for_query() {
    let mut session = start_session(pg_engine(MemoryConnector::new(), "dmp"));
    login(&mut session, &[("user", "postgres")]).await;

    send_message(&mut session.writer, b'Q', b"SELECT * FROM missing\0").await;

    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'E');
    assert!(payload.starts_with(b"SERROR\0C42000\0MSQL Error:"));

    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'Z');
    assert_eq!(payload, vec![b'I']);

    // the session stays usable
    send_message(&mut session.writer, b'Q', b"SELECT 2\0").await;
    let (tag, _) = next_message(&mut session).await;
    assert_eq!(tag, b'T');
}

#[tokio::test]
async fn test_transaction_status_tracking() {
    let mut session = start_session(pg_engine(MemoryConnector::new(), "dmp"));
    login(&mut session, &[("user", "postgres")]).await;

    send_message(&mut session.writer, b'Q', b"BEGIN\0").await;
    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'C');
    assert_eq!(payload, b"BEGIN\0");
    let (_, payload) = next_message(&mut session).await;
    assert_eq!(payload, vec![b'T']);

    // a failed statement inside the transaction flips the hint to E
    send_message(&mut session.writer, b'Q', b"SELECT * FROM missing\0").await;
    let (tag, _) = next_message(&mut session).await;
    assert_eq!(tag, b'E');
    let (_, payload) = next_message(&mut session).await;
    assert_eq!(payload, vec![b'E']);

    send_message(&mut session.writer, b'Q', b"ROLLBACK\0").await;
    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'C');
    assert_eq!(payload, b"ROLLBACK\0");
    let (_, payload) = next_message(&mut session).await;
    assert_eq!(payload, vec![b'I']);
}

#[tokio::test]
async fn test_empty_query_response() {
    let mut session = start_session(pg_engine(MemoryConnector::new(), "dmp"));
    login(&mut session, &[("user", "postgres")]).await;

    send_message(&mut session.writer, b'Q', b"\0").await;
    let (tag, _) = next_message(&mut session).await;
    assert_eq!(tag, b'I');
    let (tag, _) = next_message(&mut session).await;
    assert_eq!(tag, b'Z');
}

#[tokio::test]
async fn test_extended_query_flow() {
    let mut session = start_session(pg_engine(MemoryConnector::new(), "dmp"));
    login(&mut session, &[("user", "postgres")]).await;

    // Parse unnamed statement
    let mut parse_body = b"\0SELECT 5\0".to_vec();
    parse_body.extend(0i16.to_be_bytes());
    send_message(&mut session.writer, b'P', &parse_body).await;
    let (tag, _) = next_message(&mut session).await;
    assert_eq!(tag, b'1');

    // Bind unnamed portal with no parameters
    let mut bind_body = b"\0\0".to_vec();
    bind_body.extend(0i16.to_be_bytes());
    bind_body.extend(0i16.to_be_bytes());
    bind_body.extend(0i16.to_be_bytes());
    send_message(&mut session.writer, b'B', &bind_body).await;
    let (tag, _) = next_message(&mut session).await;
    assert_eq!(tag, b'2');

    // Describe portal: the row description arrives with Execute
    send_message(&mut session.writer, b'D', b"P\0").await;

    send_message(&mut session.writer, b'E', &{
        let mut body = b"\0".to_vec();
        body.extend(0i32.to_be_bytes());
        body
    })
    .await;

    let (tag, _) = next_message(&mut session).await;
    assert_eq!(tag, b'T');
    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'D');
    let mut expected = vec![0u8, 1];
    expected.extend(1i32.to_be_bytes());
    expected.push(b'5');
    assert_eq!(payload, expected);
    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'C');
    assert_eq!(payload, b"SELECT 1\0");

    send_message(&mut session.writer, b'S', b"").await;
    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'Z');
    assert_eq!(payload, vec![b'I']);
}

#[tokio::test]
async fn test_extended_error_discards_until_sync() {
    let mut session = start_session(pg_engine(MemoryConnector::new(), "dmp"));
    login(&mut session, &[("user", "postgres")]).await;

    // Execute against a portal that was never bound
    send_message(&mut session.writer, b'E', &{
        let mut body = b"nope\0".to_vec();
        body.extend(0i32.to_be_bytes());
        body
    })
    .await;
    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'E');
    assert!(payload.starts_with(b"SERROR\0C34000\0"));

    // a Bind after the error is discarded
    let mut bind_body = b"\0\0".to_vec();
    bind_body.extend(0i16.to_be_bytes());
    bind_body.extend(0i16.to_be_bytes());
    bind_body.extend(0i16.to_be_bytes());
    send_message(&mut session.writer, b'B', &bind_body).await;

    // Sync recovers with ReadyForQuery
    send_message(&mut session.writer, b'S', b"").await;
    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'Z');
    assert_eq!(payload, vec![b'I']);
}

#[tokio::test]
async fn test_cancel_request_closes_connection() {
    let mut session = start_session(pg_engine(MemoryConnector::new(), "dmp"));

    let mut frame = 16u32.to_be_bytes().to_vec();
    frame.extend(80877102i32.to_be_bytes());
    frame.extend(7i32.to_be_bytes());
    frame.extend(42i32.to_be_bytes());
    session.writer.write_all(&frame).await.unwrap();

    session.handle.await.unwrap().unwrap();
    assert!(session.reader.next_message().await.unwrap().is_none());
}

#[tokio::test]
async fn test_terminate_closes_cleanly() {
    let mut session = start_session(pg_engine(MemoryConnector::new(), "dmp"));
    login(&mut session, &[("user", "postgres")]).await;

    send_message(&mut session.writer, b'X', b"").await;
    session.handle.await.unwrap().unwrap();
    assert!(session.reader.next_message().await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_message_type_reports_unsupported() {
    let mut session = start_session(pg_engine(MemoryConnector::new(), "dmp"));
    login(&mut session, &[("user", "postgres")]).await;

    send_message(&mut session.writer, b'z', b"").await;
    let (tag, payload) = next_message(&mut session).await;
    assert_eq!(tag, b'E');
    assert!(payload.starts_with(b"SERROR\0C0A000\0"));
    let (tag, _) = next_message(&mut session).await;
    assert_eq!(tag, b'Z');
}
