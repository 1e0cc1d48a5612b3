//! The gateway's view of its single holder connection.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{error, info};

use super::reader::{Link, RemoteFile};
use crate::config::ProtocolConfig;
use crate::error::{RelayError, Result};

/// Availability of the holder, as seen by HTTP requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// No holder has connected yet.
    Waiting,
    Connected,
    /// The holder connection failed and was torn down.
    Lost,
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendState::Waiting => "waiting",
            BackendState::Connected => "connected",
            BackendState::Lost => "lost",
        };
        f.write_str(name)
    }
}

/// One accepted holder connection.
///
/// The mutex is the connection guard: a caller owns the wire from its first
/// request until the last response of its logical operation is consumed.
pub(crate) struct Channel {
    pub(crate) id: u64,
    pub(crate) peer: String,
    pub(crate) link: Arc<Mutex<Link>>,
}

enum Backend {
    Waiting,
    Connected(Arc<Channel>),
    Lost,
}

/// Session state shared by every HTTP worker.
pub struct Session {
    backend: RwLock<Backend>,
    protocol: ProtocolConfig,
    round_trip_timeout: Duration,
    next_id: AtomicU64,
    bytes_received: AtomicU64,
}

impl Session {
    pub fn new(protocol: ProtocolConfig, round_trip_timeout: Duration) -> Self {
        Self {
            backend: RwLock::new(Backend::Waiting),
            protocol,
            round_trip_timeout,
            next_id: AtomicU64::new(1),
            bytes_received: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> BackendState {
        let backend = self.backend.read().unwrap_or_else(|e| e.into_inner());
        match *backend {
            Backend::Waiting => BackendState::Waiting,
            Backend::Connected(_) => BackendState::Connected,
            Backend::Lost => BackendState::Lost,
        }
    }

    /// Install `stream` as the holder connection.
    ///
    /// A live connection that has closed while idle is dropped first.
    /// Returns `false` and leaves the session untouched if a holder is
    /// still connected.
    pub fn attach<S>(&self, stream: S, peer: impl Into<String>) -> bool
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.refresh();

        let mut backend = self.backend.write().unwrap_or_else(|e| e.into_inner());
        if matches!(*backend, Backend::Connected(_)) {
            return false;
        }

        let channel = Channel {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            peer: peer.into(),
            link: Arc::new(Mutex::new(Link::new(
                stream,
                self.protocol,
                self.round_trip_timeout,
            ))),
        };
        info!(peer = %channel.peer, connection = channel.id, "holder connected");

        *backend = Backend::Connected(Arc::new(channel));
        true
    }

    /// Current state, after checking an idle holder connection for closure.
    ///
    /// A connection that is in use is left to its own round trips.
    pub fn refresh(&self) -> BackendState {
        if let Some(channel) = self.live_channel() {
            if let Ok(mut link) = channel.link.try_lock() {
                if let Err(cause) = link.check_idle() {
                    self.mark_lost(channel.id, &cause);
                }
            }
        }
        self.state()
    }

    /// Get a reader bound to the live connection.
    pub fn open(self: &Arc<Self>) -> Result<RemoteFile> {
        let channel = self.live_channel().ok_or(RelayError::NoBackendAvailable)?;
        Ok(RemoteFile::new(Arc::clone(self), channel))
    }

    fn live_channel(&self) -> Option<Arc<Channel>> {
        let backend = self.backend.read().unwrap_or_else(|e| e.into_inner());
        match &*backend {
            Backend::Connected(channel) => Some(Arc::clone(channel)),
            Backend::Waiting | Backend::Lost => None,
        }
    }

    /// Tear down connection `id` after a connection-fatal error.
    ///
    /// Ignored when `id` is no longer the live connection.
    pub(crate) fn mark_lost(&self, id: u64, cause: &RelayError) {
        let mut backend = self.backend.write().unwrap_or_else(|e| e.into_inner());
        if let Backend::Connected(channel) = &*backend {
            if channel.id == id {
                error!(peer = %channel.peer, connection = id, "holder connection lost: {cause}");
                *backend = Backend::Lost;
            }
        }
    }

    /// Total payload bytes received from holders.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub(crate) fn record_received(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
    }
}
