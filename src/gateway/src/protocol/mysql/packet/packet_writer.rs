use crate::protocol::mysql::constants;
use byteorder::{ByteOrder, LittleEndian};

use std::io;
use std::io::prelude::*;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Buffers one packet payload and frames it on [`end_packet`](Self::end_packet),
/// stamping the sequence id and splitting at the 16M payload boundary.
///
/// The `std::io::Write` impl appends to the payload buffer, so the
/// `byteorder`/`mysql_common` write extensions compose directly.
pub struct PacketWriter<W> {
    buf: Vec<u8>,
    seq: u8,
    pub inner_writer: W,
}

impl<W> PacketWriter<W> {
    pub fn new(write: W) -> Self {
        Self {
            buf: Vec::new(),
            seq: 0,
            inner_writer: write,
        }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    pub fn set_seq(&mut self, seq: u8) {
        self.seq = seq;
    }

    fn increase_seq(&mut self) {
        self.seq = self.seq.wrapping_add(1);
    }

    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }
}

impl<W> Write for PacketWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    /// Frames the buffered payload and hands it to the inner writer. A call
    /// with an empty buffer emits a zero-length packet, which is legal.
    pub async fn end_packet(&mut self) -> io::Result<()> {
        let mut header = [0; constants::PACKET_HEADER_LEN];
        if !self.is_empty() {
            let raw_packet = self.take_buffer();
            // split the payload at the boundary of size MAX_PAYLOAD_LEN
            for chunk in raw_packet.chunks(constants::MAX_PAYLOAD_LEN) {
                LittleEndian::write_u24(&mut header, chunk.len() as u32);
                header[3] = self.seq();
                self.increase_seq();
                self.inner_writer.write_all(&header).await?;
                self.inner_writer.write_all(chunk).await?;
            }
            Ok(())
        } else {
            LittleEndian::write_u24(&mut header, 0);
            header[3] = self.seq();
            self.increase_seq();
            self.inner_writer.write_all(&header).await?;
            Ok(())
        }
    }

    pub async fn flush_all(&mut self) -> io::Result<()> {
        self.inner_writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_end_packet_frames_and_advances_seq() {
        let mut writer = PacketWriter::new(Vec::new());
        writer.set_seq(1);
        writer.write_all(&[0x0e]).unwrap();
        writer.end_packet().await.unwrap();
        writer.write_all(&[0x00, 0x00]).unwrap();
        writer.end_packet().await.unwrap();
        assert_eq!(
            writer.inner_writer,
            vec![0x01, 0, 0, 0x01, 0x0e, 0x02, 0, 0, 0x02, 0x00, 0x00]
        );
        assert_eq!(writer.seq(), 3);
    }

    #[tokio::test]
    async fn test_empty_payload_packet() {
        let mut writer = PacketWriter::new(Vec::new());
        writer.end_packet().await.unwrap();
        assert_eq!(writer.inner_writer, vec![0x00, 0x00, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_seq_wraps_mod_256() {
        let mut writer = PacketWriter::new(Vec::new());
        writer.set_seq(255);
        writer.write_all(&[0xaa]).unwrap();
        writer.end_packet().await.unwrap();
        assert_eq!(writer.seq(), 0);
    }
}
