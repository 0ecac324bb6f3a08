use crate::protocol::postgres::constants::{
    CANCEL_REQUEST_CODE, PROTOCOL_VERSION, SSL_REQUEST_CODE,
};

use hashbrown::HashMap;
use std::io;

/// Startup parameter keys the gateway acts on; everything else is ignored.
pub const RECOGNIZED_STARTUP_KEYS: &[&str] = &[
    "user",
    "database",
    "client_encoding",
    "DateStyle",
    "TimeZone",
    "application_name",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupFrame {
    SslRequest,
    CancelRequest,
    Startup(StartupMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupMessage {
    pub version: i32,
    pub params: HashMap<String, String>,
}

impl StartupMessage {
    pub fn user(&self) -> Option<&str> {
        self.params.get("user").map(String::as_str)
    }

    pub fn database(&self) -> Option<&str> {
        self.params.get("database").map(String::as_str)
    }
}

fn protocol_err(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn read_i32(payload: &[u8], pos: &mut usize) -> io::Result<i32> {
    let end = *pos + 4;
    let bytes = payload
        .get(*pos..end)
        .ok_or_else(|| protocol_err("message truncated reading int4"))?;
    *pos = end;
    Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i16(payload: &[u8], pos: &mut usize) -> io::Result<i16> {
    let end = *pos + 2;
    let bytes = payload
        .get(*pos..end)
        .ok_or_else(|| protocol_err("message truncated reading int2"))?;
    *pos = end;
    Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_cstr(payload: &[u8], pos: &mut usize) -> io::Result<String> {
    let nul = payload[*pos..]
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| protocol_err("unterminated string in message"))?;
    let s = std::str::from_utf8(&payload[*pos..*pos + nul])
        .map_err(|_| protocol_err("string in message is not UTF-8"))?
        .to_string();
    *pos += nul + 1;
    Ok(s)
}

/// Classifies a startup-phase payload (already stripped of its length word).
pub fn parse_startup(payload: &[u8]) -> io::Result<StartupFrame> {
    let mut pos = 0;
    let version = read_i32(payload, &mut pos)?;
    if version == SSL_REQUEST_CODE && payload.len() == 4 {
        return Ok(StartupFrame::SslRequest);
    }
    if version == CANCEL_REQUEST_CODE {
        return Ok(StartupFrame::CancelRequest);
    }
    if version != PROTOCOL_VERSION {
        return Err(protocol_err(format!(
            "unsupported protocol version {version:#010x}"
        )));
    }

    let mut params = HashMap::new();
    loop {
        if pos >= payload.len() {
            break;
        }
        let key = read_cstr(payload, &mut pos)?;
        if key.is_empty() {
            break;
        }
        let value = read_cstr(payload, &mut pos)?;
        params.insert(key, value);
    }
    Ok(StartupFrame::Startup(StartupMessage { version, params }))
}

/// Simple-query payload: the SQL text minus its trailing NUL.
pub fn parse_query(payload: &[u8]) -> io::Result<String> {
    let sql = payload.strip_suffix(&[0]).unwrap_or(payload);
    std::str::from_utf8(sql)
        .map(str::to_string)
        .map_err(|_| protocol_err("query text is not UTF-8"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMessage {
    pub name: String,
    pub query: String,
    pub param_types: Vec<u32>,
}

pub fn parse_parse(payload: &[u8]) -> io::Result<ParseMessage> {
    let mut pos = 0;
    let name = read_cstr(payload, &mut pos)?;
    let query = read_cstr(payload, &mut pos)?;
    let count = read_i16(payload, &mut pos)?;
    let mut param_types = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        param_types.push(read_i32(payload, &mut pos)? as u32);
    }
    Ok(ParseMessage {
        name,
        query,
        param_types,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMessage {
    pub portal: String,
    pub statement: String,
    pub param_formats: Vec<i16>,
    pub params: Vec<Option<Vec<u8>>>,
    pub result_formats: Vec<i16>,
}

pub fn parse_bind(payload: &[u8]) -> io::Result<BindMessage> {
    let mut pos = 0;
    let portal = read_cstr(payload, &mut pos)?;
    let statement = read_cstr(payload, &mut pos)?;

    let format_count = read_i16(payload, &mut pos)?;
    let mut param_formats = Vec::with_capacity(format_count.max(0) as usize);
    for _ in 0..format_count {
        param_formats.push(read_i16(payload, &mut pos)?);
    }

    let param_count = read_i16(payload, &mut pos)?;
    let mut params = Vec::with_capacity(param_count.max(0) as usize);
    for _ in 0..param_count {
        let len = read_i32(payload, &mut pos)?;
        if len < 0 {
            params.push(None);
        } else {
            let end = pos + len as usize;
            let bytes = payload
                .get(pos..end)
                .ok_or_else(|| protocol_err("message truncated reading parameter"))?;
            params.push(Some(bytes.to_vec()));
            pos = end;
        }
    }

    let result_count = read_i16(payload, &mut pos)?;
    let mut result_formats = Vec::with_capacity(result_count.max(0) as usize);
    for _ in 0..result_count {
        result_formats.push(read_i16(payload, &mut pos)?);
    }

    Ok(BindMessage {
        portal,
        statement,
        param_formats,
        params,
        result_formats,
    })
}

/// Describe and Close share the same kind-byte + name layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetedMessage {
    /// `b'S'` for a statement, `b'P'` for a portal.
    pub kind: u8,
    pub name: String,
}

pub fn parse_targeted(payload: &[u8]) -> io::Result<TargetedMessage> {
    if payload.is_empty() {
        return Err(protocol_err("empty describe/close message"));
    }
    let kind = payload[0];
    if kind != b'S' && kind != b'P' {
        return Err(protocol_err(format!("bad describe/close kind {kind:#04x}")));
    }
    let mut pos = 1;
    let name = read_cstr(payload, &mut pos)?;
    Ok(TargetedMessage { kind, name })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteMessage {
    pub portal: String,
    pub max_rows: i32,
}

pub fn parse_execute(payload: &[u8]) -> io::Result<ExecuteMessage> {
    let mut pos = 0;
    let portal = read_cstr(payload, &mut pos)?;
    let max_rows = read_i32(payload, &mut pos)?;
    Ok(ExecuteMessage { portal, max_rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_startup_message() {
        let mut payload = PROTOCOL_VERSION.to_be_bytes().to_vec();
        payload.extend(b"user\0postgres\0database\0dmp\0ignored_key\0v\0\0");
        let frame = parse_startup(&payload).unwrap();
        let StartupFrame::Startup(msg) = frame else {
            panic!("expected startup message");
        };
        assert_eq!(msg.version, PROTOCOL_VERSION);
        assert_eq!(msg.user(), Some("postgres"));
        assert_eq!(msg.database(), Some("dmp"));
        assert_eq!(msg.params.get("ignored_key").map(String::as_str), Some("v"));
    }

    #[test]
    fn test_parse_ssl_and_cancel_requests() {
        assert_eq!(
            parse_startup(&SSL_REQUEST_CODE.to_be_bytes()).unwrap(),
            StartupFrame::SslRequest
        );
        let mut cancel = CANCEL_REQUEST_CODE.to_be_bytes().to_vec();
        cancel.extend(7i32.to_be_bytes());
        cancel.extend(42i32.to_be_bytes());
        assert_eq!(parse_startup(&cancel).unwrap(), StartupFrame::CancelRequest);
    }

    #[test]
    fn test_parse_startup_bad_version() {
        let payload = (2i32 << 16).to_be_bytes();
        assert!(parse_startup(&payload).is_err());
    }

    #[test]
    fn test_parse_query_strips_nul() {
        assert_eq!(parse_query(b"SELECT 1\0").unwrap(), "SELECT 1");
        assert_eq!(parse_query(b"SELECT 1").unwrap(), "SELECT 1");
    }

    #[test]
    fn test_parse_parse_message() {
        let mut payload = b"stmt1\0SELECT $1\0".to_vec();
        payload.extend(1i16.to_be_bytes());
        payload.extend(23i32.to_be_bytes());
        let msg = parse_parse(&payload).unwrap();
        assert_eq!(msg.name, "stmt1");
        assert_eq!(msg.query, "SELECT $1");
        assert_eq!(msg.param_types, vec![23]);
    }

    #[test]
    fn test_parse_bind_message() {
        let mut payload = b"\0stmt1\0".to_vec();
        payload.extend(0i16.to_be_bytes()); // no format codes: all text
        payload.extend(2i16.to_be_bytes());
        payload.extend(2i32.to_be_bytes());
        payload.extend(b"42");
        payload.extend((-1i32).to_be_bytes()); // NULL
        payload.extend(0i16.to_be_bytes());
        let msg = parse_bind(&payload).unwrap();
        assert_eq!(msg.portal, "");
        assert_eq!(msg.statement, "stmt1");
        assert_eq!(msg.params, vec![Some(b"42".to_vec()), None]);
    }

    #[test]
    fn test_parse_targeted_and_execute() {
        let msg = parse_targeted(b"P\0").unwrap();
        assert_eq!(msg.kind, b'P');
        assert_eq!(msg.name, "");
        assert!(parse_targeted(b"X\0").is_err());

        let mut payload = b"\0".to_vec();
        payload.extend(0i32.to_be_bytes());
        let exec = parse_execute(&payload).unwrap();
        assert_eq!(exec.portal, "");
        assert_eq!(exec.max_rows, 0);
    }

    #[test]
    fn test_truncated_message_is_error() {
        assert!(parse_bind(b"\0stmt1\0").is_err());
        assert!(parse_parse(b"no-terminator").is_err());
    }
}
