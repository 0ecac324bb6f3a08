use crate::protocol::postgres::constants::MAX_MESSAGE_LEN;

use std::io::{self, prelude::*};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads PostgreSQL frames from a byte stream.
///
/// Startup-phase frames carry no type byte: 4-byte big-endian length
/// (inclusive of itself) followed by the payload. After startup every frame
/// is a 1-byte tag plus the same length form.
pub struct PgFrameReader<R> {
    pub r: R,
}

impl<R: AsyncRead + Unpin> PgFrameReader<R> {
    pub fn new(r: R) -> Self {
        Self { r }
    }

    /// One byte, or `None` on a clean EOF. Used for the leading byte of
    /// every frame so a client hanging up between messages closes silently.
    async fn read_first_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.r.read(&mut byte).await {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn check_len(len: u32) -> io::Result<usize> {
        if len < 4 || len as usize > MAX_MESSAGE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message length {len} out of bounds"),
            ));
        }
        Ok(len as usize - 4)
    }

    /// A startup-phase frame (StartupMessage, SSLRequest or CancelRequest).
    /// Returns the payload without the length word, or `None` on EOF before
    /// the frame started.
    pub async fn read_startup(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Some(first) = self.read_first_byte().await? else {
            return Ok(None);
        };
        let mut rest = [0u8; 3];
        self.r.read_exact(&mut rest).await?;
        let len = u32::from_be_bytes([first, rest[0], rest[1], rest[2]]);
        let mut payload = vec![0u8; Self::check_len(len)?];
        self.r.read_exact(&mut payload).await?;
        Ok(Some(payload))
    }

    /// A post-startup frame: `(tag, payload)`, or `None` on EOF between
    /// messages.
    pub async fn next_message(&mut self) -> io::Result<Option<(u8, Vec<u8>)>> {
        let Some(tag) = self.read_first_byte().await? else {
            return Ok(None);
        };
        let len = self.r.read_u32().await?;
        let mut payload = vec![0u8; Self::check_len(len)?];
        self.r.read_exact(&mut payload).await?;
        Ok(Some((tag, payload)))
    }
}

/// Buffers one message body and frames it on [`end_message`](Self::end_message)
/// with the tag byte and the self-inclusive big-endian length.
///
/// As with the MySQL packet writer, the `std::io::Write` impl appends to the
/// body buffer so the `byteorder` extensions compose directly.
pub struct PgMessageWriter<W> {
    buf: Vec<u8>,
    pub inner_writer: W,
}

impl<W> PgMessageWriter<W> {
    pub fn new(write: W) -> Self {
        Self {
            buf: Vec::new(),
            inner_writer: write,
        }
    }

    fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

impl<W> Write for PgMessageWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin> PgMessageWriter<W> {
    pub async fn end_message(&mut self, tag: u8) -> io::Result<()> {
        let body = self.take_buffer();
        let len = (body.len() + 4) as u32;
        self.inner_writer.write_all(&[tag]).await?;
        self.inner_writer.write_all(&len.to_be_bytes()).await?;
        self.inner_writer.write_all(&body).await?;
        Ok(())
    }

    /// The single-byte answer to an SSLRequest probe (`N` = no TLS).
    pub async fn write_probe_answer(&mut self, b: u8) -> io::Result<()> {
        self.inner_writer.write_all(&[b]).await
    }

    pub async fn flush_all(&mut self) -> io::Result<()> {
        self.inner_writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_startup_frame() {
        let mut bytes = 12u32.to_be_bytes().to_vec();
        bytes.extend(196608i32.to_be_bytes());
        bytes.extend([0u8; 4]);
        let mut reader = PgFrameReader::new(&bytes[..]);
        let payload = reader.read_startup().await.unwrap().unwrap();
        assert_eq!(payload.len(), 8);
        assert_eq!(&payload[..4], &196608i32.to_be_bytes());
    }

    #[tokio::test]
    async fn test_read_startup_eof() {
        let mut reader = PgFrameReader::new(&[][..]);
        assert!(reader.read_startup().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_next_message() {
        // Q "SELECT 1\0"
        let mut bytes = vec![b'Q'];
        bytes.extend(13u32.to_be_bytes());
        bytes.extend(b"SELECT 1\0");
        let mut reader = PgFrameReader::new(&bytes[..]);
        let (tag, payload) = reader.next_message().await.unwrap().unwrap();
        assert_eq!(tag, b'Q');
        assert_eq!(payload, b"SELECT 1\0");
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_payload() {
        let mut bytes = vec![b'Q'];
        bytes.extend(13u32.to_be_bytes());
        bytes.extend(b"SELECT");
        let mut reader = PgFrameReader::new(&bytes[..]);
        assert!(reader.next_message().await.is_err());
    }

    #[tokio::test]
    async fn test_oversize_length_is_fatal() {
        let mut bytes = vec![b'Q'];
        bytes.extend(0x2000000u32.to_be_bytes());
        let mut reader = PgFrameReader::new(&bytes[..]);
        assert!(reader.next_message().await.is_err());
    }

    #[tokio::test]
    async fn test_end_message_frames() {
        let mut writer = PgMessageWriter::new(Vec::new());
        writer.write_all(&[b'I']).unwrap();
        writer.end_message(b'Z').await.unwrap();
        assert_eq!(writer.inner_writer, vec![b'Z', 0, 0, 0, 5, b'I']);
    }
}
