//! Packet I/O over asynchronous byte streams.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::packet::{Fixed, MAX_FIXED_LEN, Packet, PacketKind};
use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, Result};

/// Read one packet, treating end-of-stream anywhere as a transport error.
pub async fn read_packet<R>(r: &mut R, protocol: &ProtocolConfig) -> Result<Packet>
where
    R: AsyncRead + Unpin,
{
    let tag = r.read_u8().await?;
    read_after_tag(r, tag, protocol).await
}

/// Read one packet, returning `None` if the stream ends cleanly before a tag.
///
/// End-of-stream after the tag byte is still a transport error.
pub async fn try_read_packet<R>(r: &mut R, protocol: &ProtocolConfig) -> Result<Option<Packet>>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 1];
    if r.read(&mut tag).await? == 0 {
        return Ok(None);
    }
    read_after_tag(r, tag[0], protocol).await.map(Some)
}

async fn read_after_tag<R>(r: &mut R, tag: u8, protocol: &ProtocolConfig) -> Result<Packet>
where
    R: AsyncRead + Unpin,
{
    let kind = PacketKind::from_u8(tag).ok_or(ProtocolError::UnknownTag(tag))?;

    let mut fixed = [0u8; MAX_FIXED_LEN];
    let fixed = &mut fixed[..kind.fixed_len()];
    r.read_exact(fixed).await?;

    match Packet::parse_fixed(kind, fixed, protocol)? {
        Fixed::Complete(packet) => Ok(packet),
        Fixed::Payload(len) => {
            let mut data = vec![0u8; len];
            r.read_exact(&mut data).await?;
            Ok(Packet::ReadResponse { data })
        }
    }
}

/// Write one packet and flush it.
pub async fn write_packet<W>(w: &mut W, packet: &Packet) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&packet.encode()).await?;
    w.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;

    #[tokio::test]
    async fn test_stream_round_trip() {
        let protocol = ProtocolConfig { max_payload: 1024 };
        let (mut a, mut b) = tokio::io::duplex(64);

        let sent = vec![
            Packet::SeekRequest { offset: -3, whence: 2 },
            Packet::ReadRequest { size: 1024 },
            Packet::ReadResponse { data: vec![9; 1024] },
            Packet::SeekResponse { offset: 7, ok: true },
        ];
        let writer = {
            let sent = sent.clone();
            tokio::spawn(async move {
                for packet in &sent {
                    write_packet(&mut a, packet).await.unwrap();
                }
            })
        };

        for expected in &sent {
            let packet = read_packet(&mut b, &protocol).await.unwrap();
            assert_eq!(&packet, expected);
        }
        writer.await.unwrap();
        assert!(try_read_packet(&mut b, &protocol).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clean_eof_before_tag() {
        let protocol = ProtocolConfig::default();
        let mut empty: &[u8] = &[];
        assert!(try_read_packet(&mut empty, &protocol).await.unwrap().is_none());

        let mut empty: &[u8] = &[];
        let err = read_packet(&mut empty, &protocol).await.unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
    }

    #[tokio::test]
    async fn test_eof_mid_packet_is_transport_error() {
        let protocol = ProtocolConfig::default();
        let bytes = Packet::ReadRequest { size: 16 }.encode();
        let mut truncated = &bytes[..5];
        let err = try_read_packet(&mut truncated, &protocol).await.unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
    }

    #[tokio::test]
    async fn test_unknown_tag_consumes_one_byte() {
        let protocol = ProtocolConfig::default();
        let bytes = [0xffu8, 2, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut input = &bytes[..];
        let err = read_packet(&mut input, &protocol).await.unwrap_err();
        assert!(matches!(err, RelayError::Protocol(ProtocolError::UnknownTag(0xff))));
        assert_eq!(input.len(), bytes.len() - 1);
    }

    #[tokio::test]
    async fn test_oversized_response_rejected() {
        let protocol = ProtocolConfig { max_payload: 16 };
        let mut bytes = vec![3u8];
        bytes.extend_from_slice(&i64::MAX.to_le_bytes());
        let mut input = &bytes[..];
        let err = read_packet(&mut input, &protocol).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Protocol(ProtocolError::SizeExceeded { max: 16, .. })
        ));
    }
}
