//! Gateway side of the relay.
//!
//! The gateway listens on two ports: a control port where exactly one holder
//! dials in, and a public HTTP port. Every HTTP request is answered by
//! reading through the holder connection.
//!
//! - [`session`]: connection state and the connection guard
//! - [`reader`]: seek/read round trips and the [`ReadAt`](crate::io::ReadAt) adapter
//! - [`content`]: range-aware HTTP responses over any [`ReadAt`](crate::io::ReadAt)
//! - [`bridge`]: axum routes

mod bridge;
mod content;
mod reader;
mod session;

pub use bridge::{GatewayState, router};
pub use content::{ByteRange, ContentInfo, RangeError, http_date, parse_range, serve_content};
pub use reader::{Link, RemoteFile};
pub use session::{BackendState, Session};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;

/// A bound gateway, ready to run.
pub struct Gateway {
    http: TcpListener,
    control: TcpListener,
    state: GatewayState,
    allow_reconnect: bool,
}

impl Gateway {
    /// Bind the HTTP and control listeners.
    pub async fn bind(config: &GatewayConfig) -> anyhow::Result<Self> {
        let http = TcpListener::bind(config.http_addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {}", config.http_addr))?;
        let control = TcpListener::bind(config.control_addr)
            .await
            .with_context(|| {
                format!("failed to bind control listener on {}", config.control_addr)
            })?;

        let session = Arc::new(Session::new(config.protocol, config.round_trip_timeout));
        let state = GatewayState {
            session,
            content: Arc::new(ContentInfo::new(
                config.content_name.clone(),
                config.last_modified,
            )),
            chunk_size: config.effective_chunk_size(),
        };

        Ok(Self {
            http,
            control,
            state,
            allow_reconnect: config.allow_reconnect,
        })
    }

    pub fn http_addr(&self) -> io::Result<SocketAddr> {
        self.http.local_addr()
    }

    pub fn control_addr(&self) -> io::Result<SocketAddr> {
        self.control.local_addr()
    }

    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.state.session)
    }

    /// Accept the holder and serve HTTP until the HTTP server stops.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            http = %self.http_addr()?,
            control = %self.control_addr()?,
            content = %self.state.content.name,
            "gateway listening"
        );

        let session = self.session();
        let accept = tokio::spawn(accept_holders(self.control, session, self.allow_reconnect));

        let served = axum::serve(self.http, router(self.state)).await;
        accept.abort();
        served.context("HTTP server failed")
    }
}

/// Attach incoming holder connections to the session.
///
/// Without reconnection the listener is dropped after the first holder, so
/// later dials are refused by the OS.
async fn accept_holders(listener: TcpListener, session: Arc<Session>, allow_reconnect: bool) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("failed to accept holder connection: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, "failed to set TCP_NODELAY: {e}");
        }

        if !session.attach(stream, peer.to_string()) {
            warn!(%peer, "refusing holder connection, one is already attached");
            continue;
        }

        if !allow_reconnect {
            info!("holder attached; no further holder connections will be accepted");
            return;
        }
    }
}
