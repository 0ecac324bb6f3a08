use crate::backend::ColumnDesc;
use crate::protocol::mysql::charset::DEFAULT_COLLATION_ID;
use crate::protocol::mysql::constants::AuthPluginName::AuthNativePassword;
use crate::protocol::mysql::constants::{AUTH_PLUGIN_DATA_PART_1_LENGTH, SCRAMBLE_SIZE};
use crate::protocol::mysql::error_codes::ErrorKind;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::type_map;

use byteorder::{LittleEndian, WriteBytesExt};
use mysql_common::constants::{CapabilityFlags, StatusFlags};
use mysql_common::io::WriteMysqlExt;
use std::io::{self, Write};
use tokio::io::AsyncWrite;

/// Initial Handshake v10, sequence id 0.
/// See: https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake_v10.html
pub async fn write_initial_handshake<W: AsyncWrite + Unpin>(
    writer: &mut PacketWriter<W>,
    conn_id: u32,
    scramble: [u8; SCRAMBLE_SIZE],
    server_version: &str,
    server_capabilities: CapabilityFlags,
) -> io::Result<()> {
    writer.write_all(&[10])?; // protocol 10

    writer.write_all(server_version.as_bytes())?;
    writer.write_all(&[0x00])?;
    writer.write_u32::<LittleEndian>(conn_id)?;

    let server_capabilities_vec = server_capabilities.bits().to_le_bytes();

    writer.write_all(&scramble[0..AUTH_PLUGIN_DATA_PART_1_LENGTH])?; // auth-plugin-data-part-1
    writer.write_all(&[0x00])?; // filler

    writer.write_all(&server_capabilities_vec[..2])?; // capability flags, lower 2 bytes

    writer.write_all(&DEFAULT_COLLATION_ID.to_le_bytes())?; // utf8_general_ci
    writer.write_all(&StatusFlags::SERVER_STATUS_AUTOCOMMIT.bits().to_le_bytes())?;
    writer.write_all(&server_capabilities_vec[2..4])?; // capability flags, upper 2 bytes

    writer.write_all(&((scramble.len() + 1) as u8).to_le_bytes())?; // auth-plugin-data length

    writer.write_all(&[0x00; 10][..])?; // 10 bytes filler
    writer.write_all(&scramble[AUTH_PLUGIN_DATA_PART_1_LENGTH..])?; // auth-plugin-data-part-2, 12 bytes
    writer.write_all(&[0x00])?;

    writer.write_all(AuthNativePassword.as_ref().as_bytes())?;
    writer.write_all(&[0x00])?;
    writer.end_packet().await?;
    writer.flush_all().await
}

pub async fn write_ok_packet<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    rows: u64,
    last_insert_id: u64,
    s: StatusFlags,
) -> io::Result<()> {
    w.write_u8(0x00)?; // OK packet type
    w.write_lenenc_int(rows)?;
    w.write_lenenc_int(last_insert_id)?;
    w.write_u16::<LittleEndian>(s.bits())?;
    w.write_all(&[0x00, 0x00])?; // no warnings
    w.end_packet().await
}

/// The payload is always exactly 5 bytes so an EOF is never mistaken for a
/// row whose first cell starts with 0xfe.
pub async fn write_eof_packet<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    s: StatusFlags,
) -> io::Result<()> {
    w.write_all(&[0xfe, 0x00, 0x00])?;
    w.write_u16::<LittleEndian>(s.bits())?;
    w.end_packet().await
}

pub async fn write_err_packet<W: AsyncWrite + Unpin>(
    err: ErrorKind,
    msg: &[u8],
    w: &mut PacketWriter<W>,
) -> io::Result<()> {
    w.write_u8(0xff)?;
    w.write_u16::<LittleEndian>(err as u16)?;
    w.write_u8(b'#')?;
    w.write_all(err.sqlstate())?;
    w.write_all(msg)?;
    w.end_packet().await
}

/// The column-count packet opening a text resultset: just the lenenc count.
pub async fn write_column_count<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    count: u64,
) -> io::Result<()> {
    w.write_lenenc_int(count)?;
    w.end_packet().await
}

/// ColumnDefinition41.
/// See: https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_query_response_text_resultset_column_definition.html
pub async fn write_column_definition<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    c: &ColumnDesc,
) -> io::Result<()> {
    w.write_lenenc_str(b"def")?; // catalog
    w.write_lenenc_str(b"")?; // schema
    w.write_lenenc_str(c.table.as_bytes())?;
    w.write_lenenc_str(c.table.as_bytes())?; // org_table
    w.write_lenenc_str(c.name.as_bytes())?;
    w.write_lenenc_str(c.name.as_bytes())?; // org_name
    w.write_lenenc_int(0xC)?; // length of the fixed fields below
    w.write_u16::<LittleEndian>(DEFAULT_COLLATION_ID as u16)?;
    w.write_u32::<LittleEndian>(type_map::mysql_display_len(c))?;
    w.write_u8(type_map::mysql_type_byte(c.kind) as u8)?;
    w.write_u16::<LittleEndian>(type_map::mysql_column_flags(c).bits())?;
    w.write_u8(c.scale)?; // decimals
    w.write_all(&[0x00, 0x00])?; // filler
    w.end_packet().await
}

/// One text-protocol row: 0xfb for NULL, lenenc string otherwise.
pub async fn write_text_row<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    cells: &[Option<String>],
) -> io::Result<()> {
    for cell in cells {
        match cell {
            None => {
                w.write_u8(0xfb)?;
            }
            Some(value) => {
                w.write_lenenc_str(value.as_bytes())?;
            }
        }
    }
    w.end_packet().await
}
