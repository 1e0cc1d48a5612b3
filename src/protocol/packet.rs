//! Packet definitions and their byte-exact encoding.
//!
//! ```text
//! tag  fields (little-endian)
//! 0    SeekRequest   offset: i64, whence: i64
//! 1    SeekResponse  offset: i64, ok: u8
//! 2    ReadRequest   size: i64
//! 3    ReadResponse  length: i64, payload: [u8; length]
//! ```

use std::fmt;
use std::io::{self, Cursor, Read, SeekFrom, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, Result};

/// Largest fixed-width section following a tag (SeekRequest: two i64).
pub const MAX_FIXED_LEN: usize = 16;

/// Packet type, as carried by the tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    SeekRequest,
    SeekResponse,
    ReadRequest,
    ReadResponse,
}

impl PacketKind {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PacketKind::SeekRequest),
            1 => Some(PacketKind::SeekResponse),
            2 => Some(PacketKind::ReadRequest),
            3 => Some(PacketKind::ReadResponse),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            PacketKind::SeekRequest => 0,
            PacketKind::SeekResponse => 1,
            PacketKind::ReadRequest => 2,
            PacketKind::ReadResponse => 3,
        }
    }

    /// Number of fixed-width bytes following the tag.
    ///
    /// For `ReadResponse` this is only the length prefix; the payload follows.
    pub fn fixed_len(self) -> usize {
        match self {
            PacketKind::SeekRequest => 16,
            PacketKind::SeekResponse => 9,
            PacketKind::ReadRequest => 8,
            PacketKind::ReadResponse => 8,
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketKind::SeekRequest => "SeekRequest",
            PacketKind::SeekResponse => "SeekResponse",
            PacketKind::ReadRequest => "ReadRequest",
            PacketKind::ReadResponse => "ReadResponse",
        };
        f.write_str(name)
    }
}

/// Reference point of a seek, as carried in `SeekRequest.whence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

impl Whence {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Whence::Start),
            1 => Some(Whence::Current),
            2 => Some(Whence::End),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Whence::Start => 0,
            Whence::Current => 1,
            Whence::End => 2,
        }
    }

    /// Combine with an offset into a [`SeekFrom`].
    ///
    /// Returns `None` for a negative offset from the start.
    pub fn seek_from(self, offset: i64) -> Option<SeekFrom> {
        match self {
            Whence::Start => u64::try_from(offset).ok().map(SeekFrom::Start),
            Whence::Current => Some(SeekFrom::Current(offset)),
            Whence::End => Some(SeekFrom::End(offset)),
        }
    }
}

/// One message on the holder connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    SeekRequest { offset: i64, whence: i64 },
    SeekResponse { offset: i64, ok: bool },
    ReadRequest { size: i64 },
    /// The declared length on the wire is always `data.len()`.
    ReadResponse { data: Vec<u8> },
}

/// Outcome of parsing the fixed-width section of a packet.
pub(crate) enum Fixed {
    Complete(Packet),
    /// A `ReadResponse` whose payload of this many bytes still has to be read.
    Payload(usize),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::SeekRequest { .. } => PacketKind::SeekRequest,
            Packet::SeekResponse { .. } => PacketKind::SeekResponse,
            Packet::ReadRequest { .. } => PacketKind::ReadRequest,
            Packet::ReadResponse { .. } => PacketKind::ReadResponse,
        }
    }

    /// Total encoded size, tag included.
    pub fn encoded_len(&self) -> usize {
        let payload = match self {
            Packet::ReadResponse { data } => data.len(),
            _ => 0,
        };
        1 + self.kind().fixed_len() + payload
    }

    /// Write the tag and fields to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.encode())
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        buf[0] = self.kind().as_u8();
        let fields = &mut buf[1..];

        match self {
            Packet::SeekRequest { offset, whence } => {
                LittleEndian::write_i64(&mut fields[..8], *offset);
                LittleEndian::write_i64(&mut fields[8..16], *whence);
            }
            Packet::SeekResponse { offset, ok } => {
                LittleEndian::write_i64(&mut fields[..8], *offset);
                fields[8] = u8::from(*ok);
            }
            Packet::ReadRequest { size } => {
                LittleEndian::write_i64(&mut fields[..8], *size);
            }
            Packet::ReadResponse { data } => {
                // A Vec never holds more than isize::MAX bytes.
                LittleEndian::write_i64(&mut fields[..8], data.len() as i64);
                fields[8..].copy_from_slice(data);
            }
        }
        buf
    }

    /// Decode one packet from a blocking reader.
    ///
    /// Consumes exactly the bytes of one packet. An unknown tag fails after
    /// consuming the tag byte only; a declared length above
    /// `protocol.max_payload` fails before the payload is allocated.
    pub fn decode<R: Read>(r: &mut R, protocol: &ProtocolConfig) -> Result<Packet> {
        let tag = r.read_u8()?;
        let kind = PacketKind::from_u8(tag).ok_or(ProtocolError::UnknownTag(tag))?;

        let mut fixed = [0u8; MAX_FIXED_LEN];
        let fixed = &mut fixed[..kind.fixed_len()];
        r.read_exact(fixed)?;

        match Packet::parse_fixed(kind, fixed, protocol)? {
            Fixed::Complete(packet) => Ok(packet),
            Fixed::Payload(len) => {
                let mut data = vec![0u8; len];
                r.read_exact(&mut data)?;
                Ok(Packet::ReadResponse { data })
            }
        }
    }

    /// Parse the fixed-width fields that follow a tag.
    pub(crate) fn parse_fixed(
        kind: PacketKind,
        fixed: &[u8],
        protocol: &ProtocolConfig,
    ) -> Result<Fixed> {
        let mut cursor = Cursor::new(fixed);

        let packet = match kind {
            PacketKind::SeekRequest => Packet::SeekRequest {
                offset: cursor.read_i64::<LittleEndian>()?,
                whence: cursor.read_i64::<LittleEndian>()?,
            },
            PacketKind::SeekResponse => Packet::SeekResponse {
                offset: cursor.read_i64::<LittleEndian>()?,
                ok: cursor.read_u8()? != 0,
            },
            PacketKind::ReadRequest => {
                let size = cursor.read_i64::<LittleEndian>()?;
                check_length(size, protocol)?;
                Packet::ReadRequest { size }
            }
            PacketKind::ReadResponse => {
                let length = cursor.read_i64::<LittleEndian>()?;
                return Ok(Fixed::Payload(check_length(length, protocol)?));
            }
        };

        Ok(Fixed::Complete(packet))
    }
}

/// Validate a declared length against the payload limit.
fn check_length(value: i64, protocol: &ProtocolConfig) -> Result<usize> {
    let declared = u64::try_from(value).map_err(|_| ProtocolError::NegativeLength(value))?;
    if declared > protocol.max_payload {
        return Err(ProtocolError::SizeExceeded {
            declared,
            max: protocol.max_payload,
        }
        .into());
    }
    usize::try_from(declared).map_err(|_| {
        ProtocolError::SizeExceeded {
            declared,
            max: usize::MAX as u64,
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;

    fn limits(max_payload: u64) -> ProtocolConfig {
        ProtocolConfig { max_payload }
    }

    fn round_trip(packet: &Packet, protocol: &ProtocolConfig) -> Packet {
        let bytes = packet.encode();
        assert_eq!(bytes.len(), packet.encoded_len());
        let mut cursor = Cursor::new(bytes.as_slice());
        let decoded = Packet::decode(&mut cursor, protocol).unwrap();
        assert_eq!(cursor.position() as usize, bytes.len());
        decoded
    }

    #[test]
    fn test_round_trip_variants() {
        let protocol = limits(64);
        let packets = [
            Packet::SeekRequest { offset: 0, whence: 0 },
            Packet::SeekRequest { offset: -10, whence: 2 },
            Packet::SeekRequest { offset: i64::MAX, whence: 1 },
            Packet::SeekResponse { offset: 2, ok: true },
            Packet::SeekResponse { offset: 0, ok: false },
            Packet::ReadRequest { size: 0 },
            Packet::ReadRequest { size: 64 },
            Packet::ReadResponse { data: Vec::new() },
            Packet::ReadResponse { data: vec![0xab; 64] },
        ];
        for packet in &packets {
            assert_eq!(&round_trip(packet, &protocol), packet);
        }
    }

    #[test]
    fn test_seek_request_layout() {
        let bytes = Packet::SeekRequest { offset: 2, whence: 0 }.encode();
        assert_eq!(
            bytes,
            [0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_seek_response_layout() {
        let bytes = Packet::SeekResponse { offset: -1, ok: true }.encode();
        assert_eq!(bytes, [1, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 1]);
    }

    #[test]
    fn test_empty_read_response_encodes_zero_length() {
        let bytes = Packet::ReadResponse { data: Vec::new() }.encode();
        assert_eq!(bytes, [3, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_read_response_layout() {
        let bytes = Packet::ReadResponse {
            data: b"2345".to_vec(),
        }
        .encode();
        assert_eq!(bytes, [3, 4, 0, 0, 0, 0, 0, 0, 0, b'2', b'3', b'4', b'5']);
    }

    #[test]
    fn test_write_to_streams_packets_back_to_back() {
        let packets = [
            Packet::SeekRequest { offset: 2, whence: 0 },
            Packet::ReadResponse { data: b"2345".to_vec() },
            Packet::ReadResponse { data: Vec::new() },
            Packet::SeekResponse { offset: 2, ok: true },
        ];
        let mut stream = Vec::new();
        for packet in &packets {
            packet.write_to(&mut stream).unwrap();
        }
        let total: usize = packets.iter().map(Packet::encoded_len).sum();
        assert_eq!(stream.len(), total);

        let mut cursor = Cursor::new(stream.as_slice());
        for packet in &packets {
            assert_eq!(&Packet::decode(&mut cursor, &limits(16)).unwrap(), packet);
        }
    }

    #[test]
    fn test_unknown_tag_consumes_one_byte() {
        let bytes = [7u8, 1, 2, 3];
        let mut cursor = Cursor::new(&bytes[..]);
        let err = Packet::decode(&mut cursor, &limits(16)).unwrap_err();
        assert!(matches!(err, RelayError::Protocol(ProtocolError::UnknownTag(7))));
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_oversized_response_rejected_before_payload() {
        let mut bytes = vec![3u8];
        bytes.extend_from_slice(&(1i64 << 40).to_le_bytes());
        let mut cursor = Cursor::new(bytes.as_slice());
        let err = Packet::decode(&mut cursor, &limits(1024)).unwrap_err();
        assert!(matches!(
            err,
            RelayError::Protocol(ProtocolError::SizeExceeded { declared, max: 1024 })
                if declared == 1 << 40
        ));
        assert_eq!(cursor.position(), 9);
    }

    #[test]
    fn test_oversized_read_request_rejected() {
        let bytes = Packet::ReadRequest { size: 65 }.encode();
        let err = Packet::decode(&mut Cursor::new(bytes), &limits(64)).unwrap_err();
        assert!(matches!(
            err,
            RelayError::Protocol(ProtocolError::SizeExceeded { declared: 65, max: 64 })
        ));
    }

    #[test]
    fn test_negative_length_rejected() {
        let bytes = Packet::ReadRequest { size: -1 }.encode();
        let err = Packet::decode(&mut Cursor::new(bytes), &limits(64)).unwrap_err();
        assert!(matches!(
            err,
            RelayError::Protocol(ProtocolError::NegativeLength(-1))
        ));
    }

    #[test]
    fn test_truncated_field_is_transport_error() {
        // Tag plus only half of the offset field.
        let bytes = [0u8, 1, 2, 3, 4];
        let err = Packet::decode(&mut Cursor::new(&bytes[..]), &limits(64)).unwrap_err();
        match err {
            RelayError::Transport(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_short_payload_is_transport_error() {
        let mut bytes = Packet::ReadResponse { data: vec![1; 8] }.encode();
        bytes.truncate(bytes.len() - 3);
        let err = Packet::decode(&mut Cursor::new(bytes), &limits(64)).unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
    }

    #[test]
    fn test_nonzero_ok_byte_is_true() {
        let mut bytes = Packet::SeekResponse { offset: 5, ok: true }.encode();
        bytes[9] = 0x7f;
        let packet = Packet::decode(&mut Cursor::new(bytes), &limits(64)).unwrap();
        assert_eq!(packet, Packet::SeekResponse { offset: 5, ok: true });
    }

    #[test]
    fn test_whence_mapping() {
        assert_eq!(Whence::from_i64(2), Some(Whence::End));
        assert_eq!(Whence::from_i64(3), None);
        assert_eq!(Whence::Start.seek_from(4), Some(SeekFrom::Start(4)));
        assert_eq!(Whence::Start.seek_from(-4), None);
        assert_eq!(Whence::End.seek_from(-4), Some(SeekFrom::End(-4)));
        assert_eq!(Whence::Current.as_i64(), 1);
    }

    #[test]
    fn test_tag_table() {
        for tag in 0u8..=255 {
            match PacketKind::from_u8(tag) {
                Some(kind) => assert_eq!(kind.as_u8(), tag),
                None => assert!(tag > 3),
            }
        }
    }
}
