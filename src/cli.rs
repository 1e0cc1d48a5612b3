use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CONTENT_NAME, DEFAULT_CONTROL_ADDR, DEFAULT_GATEWAY_ADDR,
    DEFAULT_HTTP_ADDR, DEFAULT_MAX_PAYLOAD, DEFAULT_ROUND_TRIP_TIMEOUT, GatewayConfig, HolderConfig,
    ProtocolConfig,
};

#[derive(Parser, Debug)]
#[command(name = "ftrelay")]
#[command(version)]
#[command(
    about = "Expose a local file for ranged HTTP download through a relay gateway",
    long_about = None
)]
#[command(after_help = "Examples:\n  \
  ftrelay gateway --name report.pdf     serve HTTP on :8080, wait for a holder on :8081\n  \
  ftrelay share ./report.pdf           expose report.pdf through the gateway at 127.0.0.1:8081\n  \
  curl -r 0-99 http://gateway:8080/    fetch the first 100 bytes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose logging (-vv => trace)
    #[arg(short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (-qq => errors only)
    #[arg(short = 'q', global = true, action = ArgAction::Count)]
    pub quiet: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve downloads over HTTP, reading through a connected holder
    Gateway(GatewayArgs),
    /// Expose a local file through a gateway
    Share(ShareArgs),
}

#[derive(Args, Debug)]
pub struct GatewayArgs {
    /// Public HTTP listen address
    #[arg(long, value_name = "ADDR", default_value = DEFAULT_HTTP_ADDR)]
    pub http: SocketAddr,

    /// Listen address for the holder connection
    #[arg(long, value_name = "ADDR", default_value = DEFAULT_CONTROL_ADDR)]
    pub control: SocketAddr,

    /// File name offered to downloaders
    #[arg(long, value_name = "NAME", default_value = DEFAULT_CONTENT_NAME)]
    pub name: String,

    /// Last-modified time of the content (RFC 3339)
    #[arg(long, value_name = "TIME", value_parser = parse_timestamp)]
    pub last_modified: Option<DateTime<Utc>>,

    /// Seconds to wait for the holder to answer one request
    #[arg(
        long,
        value_name = "SECS",
        default_value_t = DEFAULT_ROUND_TRIP_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,

    /// Bytes fetched from the holder per body chunk
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Largest read payload accepted from the holder
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: u64,

    /// Accept a new holder after the connection is lost
    #[arg(long)]
    pub reconnect: bool,
}

#[derive(Args, Debug)]
pub struct ShareArgs {
    /// File to expose
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Gateway control address
    #[arg(long, value_name = "ADDR", default_value = DEFAULT_GATEWAY_ADDR)]
    pub gateway: String,

    /// Largest read request accepted from the gateway
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: u64,
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    /// Default log filter derived from `-v` / `-q`.
    pub fn log_level(&self) -> &'static str {
        match i16::from(self.verbose) - i16::from(self.quiet) {
            i16::MIN..=-2 => "error",
            -1 => "warn",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

impl GatewayArgs {
    pub fn to_config(&self) -> GatewayConfig {
        GatewayConfig {
            http_addr: self.http,
            control_addr: self.control,
            content_name: self.name.clone(),
            last_modified: self.last_modified,
            round_trip_timeout: Duration::from_secs(self.timeout),
            chunk_size: self.chunk_size,
            allow_reconnect: self.reconnect,
            protocol: ProtocolConfig {
                max_payload: self.max_payload,
            },
        }
    }
}

impl ShareArgs {
    pub fn to_config(&self) -> HolderConfig {
        HolderConfig {
            gateway_addr: self.gateway.clone(),
            path: self.file.clone(),
            protocol: ProtocolConfig {
                max_payload: self.max_payload,
            },
        }
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp: {e}"))
}
