//! Holder side of the relay.
//!
//! The holder owns the real file and answers one request at a time: decode a
//! packet, perform the local seek or read, send the response, repeat. It
//! never initiates traffic.

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, BufReader, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::{HolderConfig, ProtocolConfig};
use crate::error::{ProtocolError, Result};
use crate::io::LocalFile;
use crate::protocol::{Packet, Whence, try_read_packet, write_packet};

/// Counters reported when a holder session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HolderStats {
    pub seeks: u64,
    pub rejected_seeks: u64,
    pub reads: u64,
    pub bytes_sent: u64,
}

/// Request loop bound to one local file.
pub struct Holder<F> {
    file: LocalFile<F>,
    protocol: ProtocolConfig,
    stats: HolderStats,
}

impl<F> Holder<F>
where
    F: AsyncRead + AsyncSeek + Unpin + Send,
{
    pub fn new(file: LocalFile<F>, protocol: ProtocolConfig) -> Self {
        Self {
            file,
            protocol,
            stats: HolderStats::default(),
        }
    }

    /// Answer requests on `conn` until the gateway closes it.
    ///
    /// Returns the session counters on a clean close at a packet boundary.
    /// Any decode failure, unexpected packet or local I/O error ends the
    /// loop with that error.
    pub async fn serve<S>(mut self, conn: S) -> Result<HolderStats>
    where
        S: AsyncRead + AsyncWrite,
    {
        let (reader, writer) = tokio::io::split(conn);
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        while let Some(request) = try_read_packet(&mut reader, &self.protocol).await? {
            let response = self.handle(request).await?;
            write_packet(&mut writer, &response).await?;
        }

        info!(
            seeks = self.stats.seeks,
            reads = self.stats.reads,
            bytes_sent = self.stats.bytes_sent,
            "gateway closed the connection"
        );
        Ok(self.stats)
    }

    async fn handle(&mut self, request: Packet) -> Result<Packet> {
        match request {
            Packet::SeekRequest { offset, whence } => self.seek(offset, whence).await,
            Packet::ReadRequest { size } => self.read(size).await,
            other => Err(ProtocolError::UnexpectedPacket {
                expected: "SeekRequest or ReadRequest",
                received: other.kind(),
            }
            .into()),
        }
    }

    async fn seek(&mut self, offset: i64, whence: i64) -> Result<Packet> {
        self.stats.seeks += 1;

        let Some(pos) = Whence::from_i64(whence).and_then(|w| w.seek_from(offset)) else {
            return Ok(self.reject_seek(offset, whence));
        };

        match self.file.seek(pos).await {
            Ok(position) => {
                debug!(offset, whence, position, "seek");
                Ok(Packet::SeekResponse {
                    offset: i64::try_from(position).unwrap_or(i64::MAX),
                    ok: true,
                })
            }
            // Seeking before byte 0; the cursor has not moved.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                Ok(self.reject_seek(offset, whence))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reject_seek(&mut self, offset: i64, whence: i64) -> Packet {
        warn!(offset, whence, "rejecting seek");
        self.stats.rejected_seeks += 1;
        Packet::SeekResponse { offset: 0, ok: false }
    }

    async fn read(&mut self, size: i64) -> Result<Packet> {
        let size = usize::try_from(size).map_err(|_| ProtocolError::NegativeLength(size))?;
        let data = self.file.read_up_to(size).await?;

        self.stats.reads += 1;
        self.stats.bytes_sent += data.len() as u64;
        debug!(requested = size, returned = data.len(), "read");

        Ok(Packet::ReadResponse { data })
    }
}

/// Open the configured file, dial the gateway and serve it until the
/// connection ends.
pub async fn share(config: &HolderConfig) -> anyhow::Result<HolderStats> {
    let file = LocalFile::open(&config.path)
        .await
        .with_context(|| format!("failed to open {}", config.path.display()))?;
    let size = file.size().await?;

    let stream = TcpStream::connect(&config.gateway_addr)
        .await
        .with_context(|| format!("failed to connect to gateway at {}", config.gateway_addr))?;
    stream.set_nodelay(true)?;

    info!(
        path = %config.path.display(),
        size,
        gateway = %config.gateway_addr,
        "sharing file"
    );

    let stats = Holder::new(file, config.protocol).serve(stream).await?;
    if stats.seeks == 0 && stats.reads == 0 {
        warn!(
            "gateway closed the connection before sending a request; \
             another holder may be attached"
        );
    }
    Ok(stats)
}
