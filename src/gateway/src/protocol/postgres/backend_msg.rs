use crate::backend::ColumnDesc;
use crate::protocol::postgres::codec::PgMessageWriter;
use crate::protocol::postgres::constants::{backend_tag, TransactionStatus};
use crate::protocol::type_map;

use byteorder::{BigEndian, WriteBytesExt};
use std::io::{self, Write};
use tokio::io::AsyncWrite;

/// AuthenticationOk: auth code 0, no challenge.
pub async fn write_auth_ok<W: AsyncWrite + Unpin>(w: &mut PgMessageWriter<W>) -> io::Result<()> {
    w.write_i32::<BigEndian>(0)?;
    w.end_message(backend_tag::AUTHENTICATION).await
}

pub async fn write_parameter_status<W: AsyncWrite + Unpin>(
    w: &mut PgMessageWriter<W>,
    name: &str,
    value: &str,
) -> io::Result<()> {
    w.write_all(name.as_bytes())?;
    w.write_u8(0)?;
    w.write_all(value.as_bytes())?;
    w.write_u8(0)?;
    w.end_message(backend_tag::PARAMETER_STATUS).await
}

/// The keys a CancelRequest would present. The gateway never honors
/// cancellation, but clients still expect the message during startup.
pub async fn write_backend_key_data<W: AsyncWrite + Unpin>(
    w: &mut PgMessageWriter<W>,
    process_id: i32,
    secret_key: i32,
) -> io::Result<()> {
    w.write_i32::<BigEndian>(process_id)?;
    w.write_i32::<BigEndian>(secret_key)?;
    w.end_message(backend_tag::BACKEND_KEY_DATA).await
}

pub async fn write_ready_for_query<W: AsyncWrite + Unpin>(
    w: &mut PgMessageWriter<W>,
    status: TransactionStatus,
) -> io::Result<()> {
    w.write_u8(status.as_byte())?;
    w.end_message(backend_tag::READY_FOR_QUERY).await
}

pub async fn write_row_description<W: AsyncWrite + Unpin>(
    w: &mut PgMessageWriter<W>,
    columns: &[ColumnDesc],
) -> io::Result<()> {
    w.write_i16::<BigEndian>(columns.len() as i16)?;
    for c in columns {
        w.write_all(c.name.as_bytes())?;
        w.write_u8(0)?;
        w.write_i32::<BigEndian>(0)?; // table OID
        w.write_i16::<BigEndian>(0)?; // attribute number
        w.write_u32::<BigEndian>(type_map::postgres_type_oid(c.kind))?;
        w.write_i16::<BigEndian>(type_map::postgres_type_size(c.kind))?;
        w.write_i32::<BigEndian>(-1)?; // typmod
        w.write_i16::<BigEndian>(0)?; // format: text
    }
    w.end_message(backend_tag::ROW_DESCRIPTION).await
}

/// Text-format DataRow: int4 length per cell, −1 for NULL, no terminator.
pub async fn write_data_row<W: AsyncWrite + Unpin>(
    w: &mut PgMessageWriter<W>,
    cells: &[Option<String>],
) -> io::Result<()> {
    w.write_i16::<BigEndian>(cells.len() as i16)?;
    for cell in cells {
        match cell {
            None => w.write_i32::<BigEndian>(-1)?,
            Some(value) => {
                w.write_i32::<BigEndian>(value.len() as i32)?;
                w.write_all(value.as_bytes())?;
            }
        }
    }
    w.end_message(backend_tag::DATA_ROW).await
}

pub async fn write_command_complete<W: AsyncWrite + Unpin>(
    w: &mut PgMessageWriter<W>,
    tag: &str,
) -> io::Result<()> {
    w.write_all(tag.as_bytes())?;
    w.write_u8(0)?;
    w.end_message(backend_tag::COMMAND_COMPLETE).await
}

pub async fn write_empty_query_response<W: AsyncWrite + Unpin>(
    w: &mut PgMessageWriter<W>,
) -> io::Result<()> {
    w.end_message(backend_tag::EMPTY_QUERY_RESPONSE).await
}

pub async fn write_parse_complete<W: AsyncWrite + Unpin>(
    w: &mut PgMessageWriter<W>,
) -> io::Result<()> {
    w.end_message(backend_tag::PARSE_COMPLETE).await
}

pub async fn write_bind_complete<W: AsyncWrite + Unpin>(
    w: &mut PgMessageWriter<W>,
) -> io::Result<()> {
    w.end_message(backend_tag::BIND_COMPLETE).await
}

pub async fn write_close_complete<W: AsyncWrite + Unpin>(
    w: &mut PgMessageWriter<W>,
) -> io::Result<()> {
    w.end_message(backend_tag::CLOSE_COMPLETE).await
}

pub async fn write_no_data<W: AsyncWrite + Unpin>(w: &mut PgMessageWriter<W>) -> io::Result<()> {
    w.end_message(backend_tag::NO_DATA).await
}

pub async fn write_parameter_description<W: AsyncWrite + Unpin>(
    w: &mut PgMessageWriter<W>,
    param_oids: &[u32],
) -> io::Result<()> {
    w.write_i16::<BigEndian>(param_oids.len() as i16)?;
    for oid in param_oids {
        w.write_u32::<BigEndian>(*oid)?;
    }
    w.end_message(backend_tag::PARAMETER_DESCRIPTION).await
}

/// ErrorResponse with the three mandatory fields: severity (`S`), SQLSTATE
/// (`C`) and message (`M`), closed by a zero byte. Callers owe the client a
/// ReadyForQuery afterwards so its state machine can recover.
pub async fn write_error_response<W: AsyncWrite + Unpin>(
    w: &mut PgMessageWriter<W>,
    severity: &str,
    sqlstate: &str,
    message: &str,
) -> io::Result<()> {
    w.write_u8(b'S')?;
    w.write_all(severity.as_bytes())?;
    w.write_u8(0)?;
    w.write_u8(b'C')?;
    w.write_all(sqlstate.as_bytes())?;
    w.write_u8(0)?;
    w.write_u8(b'M')?;
    w.write_all(message.as_bytes())?;
    w.write_u8(0)?;
    w.write_u8(0)?;
    w.end_message(backend_tag::ERROR_RESPONSE).await
}
