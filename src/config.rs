//! Runtime configuration for both sides of the relay.
//!
//! The command line ([`crate::cli`]) is the only source of configuration;
//! these structs are what the rest of the crate consumes.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Default upper bound for a single read payload (8 MiB).
pub const DEFAULT_MAX_PAYLOAD: u64 = 8 * 1024 * 1024;

/// Default size of one body chunk fetched from the holder (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default deadline for one request/response round trip.
pub const DEFAULT_ROUND_TRIP_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_CONTROL_ADDR: &str = "0.0.0.0:8081";
pub const DEFAULT_GATEWAY_ADDR: &str = "127.0.0.1:8081";
pub const DEFAULT_CONTENT_NAME: &str = "download";

/// Wire-level limits shared by encoder and decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Largest `ReadRequest.size` / `ReadResponse.length` accepted.
    pub max_payload: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Configuration of the gateway process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Public address serving HTTP downloads.
    pub http_addr: SocketAddr,
    /// Address the holder dials into.
    pub control_addr: SocketAddr,
    /// File name advertised in `Content-Disposition`.
    pub content_name: String,
    /// Last-modified time of the content, if known.
    pub last_modified: Option<DateTime<Utc>>,
    pub round_trip_timeout: Duration,
    /// Bytes fetched per body chunk; never above `protocol.max_payload`.
    pub chunk_size: usize,
    /// Accept a new holder after the current one is lost.
    pub allow_reconnect: bool,
    pub protocol: ProtocolConfig,
}

impl GatewayConfig {
    /// Chunk size clamped to what one round trip may carry.
    pub fn effective_chunk_size(&self) -> usize {
        let max = usize::try_from(self.protocol.max_payload).unwrap_or(usize::MAX);
        self.chunk_size.clamp(1, max.max(1))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            control_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            content_name: DEFAULT_CONTENT_NAME.to_string(),
            last_modified: None,
            round_trip_timeout: DEFAULT_ROUND_TRIP_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            allow_reconnect: false,
            protocol: ProtocolConfig::default(),
        }
    }
}

/// Configuration of the holder process.
#[derive(Debug, Clone)]
pub struct HolderConfig {
    /// Gateway control address to dial, `host:port`.
    pub gateway_addr: String,
    /// File to expose.
    pub path: PathBuf,
    pub protocol: ProtocolConfig,
}
