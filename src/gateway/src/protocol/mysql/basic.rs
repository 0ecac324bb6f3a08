use mysql_common::constants::CapabilityFlags;
use winnow::binary::{le_u16, le_u32, le_u8};
use winnow::combinator::fail;
use winnow::prelude::*;
use winnow::token::{literal, take, take_until};

/// The client's reply to the initial handshake packet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HandshakeResponse {
    pub client_flag: CapabilityFlags,
    pub max_packet_len: u32,
    pub collation: u16,
    pub username: Option<Vec<u8>>,
    pub auth_response: Vec<u8>,
    pub auth_plugin: Vec<u8>,
    pub database: Option<Vec<u8>>,
}

impl HandshakeResponse {
    /// True for the 32-byte short packet a client sends when it wants to
    /// switch to TLS before finishing the handshake.
    pub fn requests_ssl(&self) -> bool {
        self.client_flag.contains(CapabilityFlags::CLIENT_SSL) && self.username.is_none()
    }

    pub fn username_lossy(&self) -> String {
        match &self.username {
            Some(username) => String::from_utf8_lossy(username).to_string(),
            None => "_NONE".to_string(),
        }
    }
}

/// MySQL length-encoded integer: 1, 3, 4 or 9 bytes depending on magnitude.
/// 0xfb never opens an integer; in column-value position it marks NULL and
/// decodes to 0 here.
pub fn read_length_encoded_number(i: &[u8]) -> IResult<&[u8], u64> {
    let (i, b) = le_u8.parse_peek(i)?;
    let r_size: usize = match b {
        0xfb => return Ok((i, 0)),
        0xfc => 2,
        0xfd => 3,
        0xfe => 8,
        _ => return Ok((i, b as u64)),
    };
    let mut bytes = [0u8; 8];
    let (i, b) = take(r_size).parse_peek(i)?;
    bytes[..r_size].copy_from_slice(b);
    Ok((i, u64::from_le_bytes(bytes)))
}

pub fn read_length_encoded_string(i: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = read_length_encoded_number(i)?;
    take(len).parse_peek(input)
}

fn null_terminated(i: &[u8]) -> IResult<&[u8], &[u8]> {
    let (i, s) = take_until(0.., "\0").parse_peek(i)?;
    let (i, _) = literal(b"\0").parse_peek(i)?;
    Ok((i, s))
}

/// Parses a HandshakeResponse41. Pre-4.1 clients are refused: the server
/// always advertises CLIENT_PROTOCOL_41 and there is nothing useful to do
/// for a client that cannot speak it.
///
/// A payload of exactly 32 bytes with CLIENT_SSL set is the SSLRequest
/// short packet; it parses successfully with no username so the session can
/// refuse it explicitly (see [`HandshakeResponse::requests_ssl`]).
pub fn client_handshake_response(i: &[u8]) -> IResult<&[u8], HandshakeResponse> {
    let payload_len = i.len();
    let (i, caps_low) = le_u16.parse_peek(i)?;
    let capabilities = CapabilityFlags::from_bits_truncate(caps_low as u32);
    if !capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
        return fail::<_, HandshakeResponse, _>.parse_peek(i);
    }
    let (i, caps_high) = le_u16.parse_peek(i)?;
    let capabilities =
        CapabilityFlags::from_bits_truncate((caps_high as u32) << 16 | caps_low as u32);

    let (i, max_packet_len) = le_u32.parse_peek(i)?;
    let (i, collation) = le_u8.parse_peek(i)?;
    let (i, _) = take(23u8).parse_peek(i)?;

    if payload_len == 32 && capabilities.contains(CapabilityFlags::CLIENT_SSL) {
        return Ok((
            i,
            HandshakeResponse {
                client_flag: capabilities,
                max_packet_len,
                collation: u16::from(collation),
                username: None,
                auth_response: vec![],
                auth_plugin: vec![],
                database: None,
            },
        ));
    }

    let (i, username) = null_terminated(i)?;

    let (i, auth_response) =
        if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
            let (i, size) = read_length_encoded_number(i)?;
            take(size).parse_peek(i)?
        } else if capabilities.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
            let (i, size) = le_u8.parse_peek(i)?;
            take(size).parse_peek(i)?
        } else {
            null_terminated(i)?
        };

    let (i, database) =
        if capabilities.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB) && !i.is_empty() {
            let (i, db) = null_terminated(i)?;
            (i, Some(db.to_vec()))
        } else {
            (i, None)
        };

    let (i, auth_plugin) =
        if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) && !i.is_empty() {
            let (i, auth_plugin) = null_terminated(i)?;
            (i, auth_plugin.to_vec())
        } else {
            (i, vec![])
        };

    Ok((
        i,
        HandshakeResponse {
            client_flag: capabilities,
            max_packet_len,
            collation: u16::from(collation),
            username: Some(username.to_vec()),
            auth_response: auth_response.to_vec(),
            auth_plugin,
            database,
        },
    ))
}
