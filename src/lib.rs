//! # ftrelay
//!
//! Expose a file that lives behind NAT or a firewall for ranged HTTP
//! download.
//!
//! The **holder** owns the file and dials out to a **gateway**. The gateway
//! serves HTTP; every byte it sends to a downloader is fetched from the
//! holder over that single TCP connection using a small binary protocol of
//! seek and read requests. Range requests, multi-range responses and
//! conditional headers are handled on the gateway, so the holder only ever
//! sees "seek here" and "read this many bytes".
//!
//! ## Example
//!
//! ```no_run
//! use ftrelay::{Gateway, GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig {
//!         content_name: "report.pdf".to_string(),
//!         ..GatewayConfig::default()
//!     };
//!     Gateway::bind(&config).await?.run().await
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod holder;
pub mod io;
pub mod protocol;

pub use cli::Cli;
pub use config::{GatewayConfig, HolderConfig, ProtocolConfig};
pub use error::{ProtocolError, RelayError, Result};
pub use gateway::{BackendState, Gateway, RemoteFile, Session};
pub use holder::{Holder, HolderStats, share};
pub use io::{LocalFile, ReadAt};
pub use protocol::{Packet, PacketKind, Whence};
