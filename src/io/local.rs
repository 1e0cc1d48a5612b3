use std::io::{self, SeekFrom};
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// Local file handle owned by the holder.
///
/// Keeps the cursor the gateway steers with seek and read requests.
pub struct LocalFile<F = File> {
    file: F,
}

impl LocalFile<File> {
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path).await?;
        Ok(Self { file })
    }

    /// Current length of the file on disk.
    pub async fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata().await?.len())
    }
}

impl<F> LocalFile<F>
where
    F: AsyncRead + AsyncSeek + Unpin + Send,
{
    /// Wrap an already open handle.
    pub fn from_handle(file: F) -> Self {
        Self { file }
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos).await
    }

    /// Read up to `size` bytes from the cursor.
    ///
    /// Keeps reading until `size` bytes are collected or the file ends, so a
    /// short result only ever means end of file.
    pub async fn read_up_to(&mut self, size: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        let mut filled = 0;

        while filled < size {
            match self.file.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        buf.truncate(filled);
        Ok(buf)
    }
}
