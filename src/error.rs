//! Error types shared by the holder and the gateway.
//!
//! Errors fall in two groups. Connection-fatal errors ([`RelayError::Protocol`],
//! [`RelayError::Transport`], [`RelayError::Timeout`]) mean the byte stream can
//! no longer be trusted to be aligned on a packet boundary. Everything else is
//! scoped to the request that triggered it.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::PacketKind;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Malformed or out-of-contract data on the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The tag byte does not name any packet type.
    #[error("unknown packet tag {0:#04x}")]
    UnknownTag(u8),

    /// A declared length is larger than the configured maximum payload.
    #[error("declared length {declared} exceeds maximum payload of {max} bytes")]
    SizeExceeded { declared: u64, max: u64 },

    /// A length or size field carried a negative value.
    #[error("negative length {0} in packet")]
    NegativeLength(i64),

    /// A well-formed packet arrived where a different kind was required.
    #[error("unexpected {received} packet, expected {expected}")]
    UnexpectedPacket {
        expected: &'static str,
        received: PacketKind,
    },
}

/// Errors produced by relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The peer did not answer within the round-trip deadline.
    #[error("transport error: round trip timed out after {0:?}")]
    Timeout(Duration),

    /// The holder answered a read with more bytes than were asked for.
    #[error("requested {requested} bytes but holder returned {received}")]
    LengthMismatch { requested: usize, received: usize },

    /// The holder answered a seek with `ok = false`.
    #[error("holder rejected seek to offset {offset} (whence {whence})")]
    RemoteOperationFailed { offset: i64, whence: i64 },

    /// A single round trip was asked to carry more than the payload limit.
    /// Nothing was sent.
    #[error("read of {requested} bytes exceeds maximum payload of {max} bytes")]
    RequestTooLarge { requested: usize, max: u64 },

    /// No holder connection is established.
    #[error("no holder connected")]
    NoBackendAvailable,
}

impl RelayError {
    /// Whether this error leaves the shared connection unusable.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Protocol(_) | RelayError::Transport(_) | RelayError::Timeout(_)
        )
    }

    /// Build a transport error for a connection that can no longer be used.
    pub(crate) fn broken(reason: &str) -> Self {
        RelayError::Transport(io::Error::new(io::ErrorKind::NotConnected, reason.to_string()))
    }
}
