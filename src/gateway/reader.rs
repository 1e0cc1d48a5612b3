//! Random access over the holder connection.
//!
//! [`Link`] performs single round trips and can only be reached through the
//! session's connection guard. [`RemoteFile`] runs whole logical operations
//! (seek, then read) under one guard acquisition.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::session::{Channel, Session};
use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, RelayError, Result};
use crate::io::ReadAt;
use crate::protocol::{Packet, Whence, read_packet, write_packet};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Request/response endpoint on the gateway side of the connection.
pub struct Link {
    reader: BufReader<BoxedRead>,
    writer: BufWriter<BoxedWrite>,
    protocol: ProtocolConfig,
    timeout: Duration,
    broken: bool,
}

impl Link {
    pub fn new<S>(stream: S, protocol: ProtocolConfig, timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(Box::new(reader)),
            writer: BufWriter::new(Box::new(writer)),
            protocol,
            timeout,
            broken: false,
        }
    }

    /// Check an idle link without waiting.
    ///
    /// The holder never writes between round trips, so end of stream, a
    /// read error or unsolicited bytes all leave the link unusable.
    pub(crate) fn check_idle(&mut self) -> Result<()> {
        if self.broken {
            return Err(RelayError::broken("holder connection is broken"));
        }

        let failure = match self.reader.fill_buf().now_or_never() {
            None => return Ok(()),
            Some(Ok(buffered)) if buffered.is_empty() => {
                RelayError::broken("holder closed the connection")
            }
            Some(Ok(_)) => RelayError::broken("unsolicited data from holder"),
            Some(Err(e)) => RelayError::Transport(e),
        };
        self.broken = true;
        Err(failure)
    }

    async fn round_trip(&mut self, request: Packet) -> Result<Packet> {
        if self.broken {
            return Err(RelayError::broken("holder connection is broken"));
        }

        let deadline = self.timeout;
        let exchange = async {
            write_packet(&mut self.writer, &request).await?;
            read_packet(&mut self.reader, &self.protocol).await
        };
        let result = match tokio::time::timeout(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout(deadline)),
        };

        if let Err(e) = &result {
            if e.is_connection_fatal() {
                self.broken = true;
            }
        }
        result
    }

    fn desynchronized(&mut self, expected: &'static str, received: &Packet) -> RelayError {
        self.broken = true;
        ProtocolError::UnexpectedPacket {
            expected,
            received: received.kind(),
        }
        .into()
    }

    /// Move the holder's cursor; returns the new absolute offset.
    pub async fn seek(&mut self, offset: i64, whence: Whence) -> Result<i64> {
        let whence = whence.as_i64();
        match self.round_trip(Packet::SeekRequest { offset, whence }).await? {
            Packet::SeekResponse { offset: position, ok: true } => Ok(position),
            Packet::SeekResponse { ok: false, .. } => {
                Err(RelayError::RemoteOperationFailed { offset, whence })
            }
            other => Err(self.desynchronized("SeekResponse", &other)),
        }
    }

    /// Read up to `size` bytes at the holder's cursor.
    ///
    /// A payload shorter than `size` means end of file. A longer one is a
    /// [`RelayError::LengthMismatch`].
    pub async fn read(&mut self, size: usize) -> Result<Vec<u8>> {
        if size as u64 > self.protocol.max_payload {
            return Err(RelayError::RequestTooLarge {
                requested: size,
                max: self.protocol.max_payload,
            });
        }

        match self.round_trip(Packet::ReadRequest { size: size as i64 }).await? {
            Packet::ReadResponse { data } if data.len() <= size => Ok(data),
            Packet::ReadResponse { data } => Err(RelayError::LengthMismatch {
                requested: size,
                received: data.len(),
            }),
            other => Err(self.desynchronized("ReadResponse", &other)),
        }
    }

    /// Read `len` bytes starting at `offset`, stopping early at end of file.
    ///
    /// One seek followed by as many reads as the payload limit requires.
    pub async fn read_span(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let target = i64::try_from(offset).unwrap_or(i64::MAX);
        let position = self.seek(target, Whence::Start).await?;
        debug!(offset, len, position, "read span");

        let chunk = usize::try_from(self.protocol.max_payload)
            .unwrap_or(usize::MAX)
            .max(1);
        let mut out = Vec::with_capacity(len);

        while out.len() < len {
            let want = (len - out.len()).min(chunk);
            let data = self.read(want).await?;
            let at_end = data.len() < want;
            out.extend_from_slice(&data);
            if at_end {
                break;
            }
        }

        Ok(out)
    }

    /// Size of the held file, from a seek to its end.
    pub async fn size(&mut self) -> Result<u64> {
        let end = self.seek(0, Whence::End).await?;
        // The frame was well formed, so only this request fails.
        u64::try_from(end).map_err(|_| RelayError::RemoteOperationFailed {
            offset: 0,
            whence: Whence::End.as_i64(),
        })
    }
}

/// Reader over the holder's file, shared by concurrent HTTP requests.
#[derive(Clone)]
pub struct RemoteFile {
    session: Arc<Session>,
    channel: Arc<Channel>,
}

impl RemoteFile {
    pub(crate) fn new(session: Arc<Session>, channel: Arc<Channel>) -> Self {
        Self { session, channel }
    }

    /// Single guarded seek round trip.
    pub async fn seek(&self, offset: i64, whence: Whence) -> Result<i64> {
        self.guarded(move |mut link| async move { link.seek(offset, whence).await })
            .await
    }

    /// Single guarded read round trip at the holder's current cursor.
    pub async fn read(&self, size: usize) -> Result<Vec<u8>> {
        let data = self
            .guarded(move |mut link| async move { link.read(size).await })
            .await?;
        self.session.record_received(data.len());
        Ok(data)
    }

    /// Run `op` with exclusive use of the connection.
    ///
    /// The operation runs on its own task, so a caller that goes away
    /// mid-exchange does not leave a half-read frame behind; the guard is
    /// released once the operation finishes. Connection-fatal errors mark
    /// the session lost.
    async fn guarded<T, F, Fut>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(OwnedMutexGuard<Link>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let channel = Arc::clone(&self.channel);

        let task = tokio::spawn(async move {
            let link = Arc::clone(&channel.link).lock_owned().await;
            let result = op(link).await;
            if let Err(e) = &result {
                if e.is_connection_fatal() {
                    session.mark_lost(channel.id, e);
                }
            }
            result
        });

        task.await
            .map_err(|e| RelayError::Transport(std::io::Error::other(e)))?
    }
}

#[async_trait]
impl ReadAt for RemoteFile {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let len = buf.len();
        let data = self
            .guarded(move |mut link| async move { link.read_span(offset, len).await })
            .await?;

        buf[..data.len()].copy_from_slice(&data);
        self.session.record_received(data.len());
        Ok(data.len())
    }

    async fn size(&self) -> Result<u64> {
        self.guarded(|mut link| async move { link.size().await }).await
    }
}
