pub mod packet_reader;
pub mod packet_writer;
pub mod writers;

use crate::protocol::mysql::constants;
use crate::protocol::mysql::constants::HeaderInfo;
use std::ops::Deref;

/// One logical MySQL payload with its framing stripped. Payloads above 16M
/// arrive as several wire frames; the parser below concatenates them back
/// into a single `Packet`.
/// See: [MySQL Packet](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html)
#[derive(Clone, Debug)]
pub struct Packet(Vec<u8>);

impl Packet {
    pub fn from_vec(vec: Vec<u8>) -> Self {
        Packet(vec)
    }

    fn extend(&mut self, bytes: &[u8]) {
        self.0.extend(bytes);
    }

    /// An EOF packet is a 0xfe header and at most 5 payload bytes; a row
    /// whose first cell starts with 0xfe is always longer.
    /// See: [MySQL EOF_Packet](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_eof_packet.html)
    pub fn is_eof_packet(&self) -> bool {
        !self.0.is_empty() && self.0[0] == (HeaderInfo::EOFHeader as u8) && self.0.len() <= 5
    }

    pub fn is_ok_packet(&self) -> bool {
        !self.0.is_empty() && self.0[0] == (HeaderInfo::OKHeader as u8)
    }

    pub fn is_err_packet(&self) -> bool {
        !self.0.is_empty() && self.0[0] == (HeaderInfo::ErrHeader as u8)
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Packet {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

/// A maximum-length frame; the logical message continues in the next frame.
#[inline]
fn max_len_frame(i: &[u8]) -> nom::IResult<&[u8], (u8, &[u8])> {
    let (i, _) = nom::bytes::complete::tag(&[0xff, 0xff, 0xff])(i)?;
    let (i, seq) = nom::bytes::complete::take(1u8)(i)?;
    let (i, bytes) = nom::bytes::complete::take(constants::MAX_PAYLOAD_LEN)(i)?;
    Ok((i, (seq[0], bytes)))
}

/// One wire frame: 3-byte little-endian payload length, sequence id, payload.
#[inline]
pub fn single_frame(i: &[u8]) -> nom::IResult<&[u8], (u8, &[u8])> {
    let (i, length) = nom::number::complete::le_u24(i)?;
    let (i, seq) = nom::bytes::complete::take(1u8)(i)?;
    let (i, bytes) = nom::bytes::complete::take(length)(i)?;
    Ok((i, (seq[0], bytes)))
}

/// Parses one logical packet: zero or more maximum-length frames followed by
/// a terminating shorter frame, each incrementing the sequence id by one.
/// Returns the sequence id of the final frame.
pub fn packet(i: &[u8]) -> nom::IResult<&[u8], (u8, Packet)> {
    nom::combinator::map(
        nom::sequence::pair(
            nom::multi::fold_many0(
                max_len_frame,
                || (0, None),
                |(seq, pkt): (_, Option<Packet>), (nseq, p)| {
                    let pkt = if let Some(mut pkt) = pkt {
                        assert_eq!(nseq, seq + 1);
                        pkt.extend(p);
                        Some(pkt)
                    } else {
                        Some(Packet(Vec::from(p)))
                    };
                    (nseq, pkt)
                },
            ),
            single_frame,
        ),
        move |(full, last)| {
            let seq = last.0;
            let pkt = if let Some(mut pkt) = full.1 {
                assert_eq!(last.0, full.0 + 1);
                pkt.extend(last.1);
                pkt
            } else {
                Packet(Vec::from(last.1))
            };
            (seq, pkt)
        },
    )(i)
}

#[cfg(test)]
mod tests {
    use crate::protocol::mysql::packet::*;

    #[test]
    fn test_single_frame_ping() {
        let frame_rs = single_frame(&[0x01, 0, 0, 0, 0x0e]);
        assert!(frame_rs.is_ok());
        let frame = frame_rs.unwrap().1;
        assert_eq!(frame.1, &[0x0e]);
    }

    #[test]
    fn test_packet_ping() {
        let p = packet(&[0x01, 0, 0, 0, 0x0e]).unwrap().1;
        assert_eq!(p.0, 0);
        assert_eq!(&*p.1, &[0x0e][..]);
    }

    #[test]
    fn test_packet_incomplete() {
        // header promises 2 bytes but only one follows.
        assert!(packet(&[0x02, 0, 0, 0, 0x0e]).is_err());
    }

    #[test]
    fn test_long_packet_exact() {
        let mut data = vec![0xff, 0xff, 0xff, 0];
        data.extend(&[0; constants::MAX_PAYLOAD_LEN][..]);
        data.extend(&[0x00, 0x00, 0x00, 1]);

        let (rest, p) = packet(&data[..]).unwrap();
        assert!(rest.is_empty());
        assert_eq!(p.0, 1);
        assert_eq!(p.1.len(), constants::MAX_PAYLOAD_LEN);
    }

    #[test]
    fn test_long_packet_with_tail() {
        let mut data = vec![0xff, 0xff, 0xff, 0];
        data.extend(&[0; constants::MAX_PAYLOAD_LEN][..]);
        data.extend(&[0x01, 0x00, 0x00, 1, 0x10]);

        let (rest, p) = packet(&data[..]).unwrap();
        assert!(rest.is_empty());
        assert_eq!(p.0, 1);
        assert_eq!(p.1.len(), constants::MAX_PAYLOAD_LEN + 1);
        assert_eq!(&p.1[constants::MAX_PAYLOAD_LEN..], &[0x10]);
    }

    #[test]
    fn test_packet_classification() {
        assert!(Packet::from_vec(vec![0xfe, 0, 0, 2, 0]).is_eof_packet());
        assert!(!Packet::from_vec(vec![0xfe, 0, 0, 2, 0, 0, 0, 0]).is_eof_packet());
        assert!(Packet::from_vec(vec![0x00, 0, 0, 2, 0, 0, 0]).is_ok_packet());
        assert!(Packet::from_vec(vec![0xff, 0x15, 0x04]).is_err_packet());
    }
}
