//! RTP header framing
//!
//! Every voice packet starts with a fixed 12-byte header:
//!
//! ```text
//! 0        1        2        4                8                12
//! +--------+--------+--------+----------------+----------------+
//! | 0x80   |   PT   |  seq   |   timestamp    |      ssrc      |
//! +--------+--------+--------+----------------+----------------+
//! ```
//!
//! All multi-byte fields are big-endian. The header bytes double as the nonce
//! seed for the encryption modes.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::NetworkError;

/// Header size in bytes
pub const HEADER_LEN: usize = 12;

/// Version 2, no padding, no extension, no CSRCs
pub const VERSION_FLAGS: u8 = 0x80;

/// Fixed voice packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            payload_type,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Append the header to `buf`
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_LEN);
        buf.put_u8(VERSION_FLAGS);
        buf.put_u8(self.payload_type);
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }

    /// Encode into a fixed array
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = VERSION_FLAGS;
        out[1] = self.payload_type;
        out[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        out[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        out
    }

    /// Parse the header at the start of `packet`
    pub fn parse(packet: &[u8]) -> Result<Self, NetworkError> {
        if packet.len() < HEADER_LEN || packet[0] != VERSION_FLAGS {
            return Err(NetworkError::InvalidPacket);
        }

        let mut buf = &packet[1..HEADER_LEN];
        let payload_type = buf.get_u8();
        let sequence = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        Ok(Self {
            payload_type,
            sequence,
            timestamp,
            ssrc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = RtpHeader::new(0x78, 0x0102, 0x0304_0506, 0x0708_090A);
        let mut buf = BytesMut::new();
        header.write_to(&mut buf);

        assert_eq!(
            &buf[..],
            &[0x80, 0x78, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A]
        );
        assert_eq!(&buf[..], &header.to_bytes()[..]);
        assert_eq!(RtpHeader::parse(&buf).unwrap(), header);
    }

    #[test]
    fn test_parse_rejects_short_packet() {
        assert!(RtpHeader::parse(&[0x80, 0x78, 0x00]).is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_version() {
        let mut bytes = RtpHeader::new(0x78, 1, 2, 3).to_bytes();
        bytes[0] = 0x90;
        assert!(RtpHeader::parse(&bytes).is_err());
    }
}
