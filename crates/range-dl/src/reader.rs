//! Fixed-size chunk reading over response bodies and local readers

use futures_util::{StreamExt, TryStreamExt};
use reqwest::Response;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

/// Chunk size used when a caller does not configure one.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Reads at most `chunk_size` bytes per call from the wrapped reader.
pub struct ChunkReader<R> {
    inner: R,
    buf: Vec<u8>,
    bytes_read: u64,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(inner: R, chunk_size: usize) -> Self {
        Self {
            inner,
            buf: vec![0; chunk_size.max(1)],
            bytes_read: 0,
        }
    }

    /// Next chunk, or `None` at end of stream.
    pub async fn next_chunk(&mut self) -> io::Result<Option<&[u8]>> {
        let n = self.inner.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        self.bytes_read += n as u64;
        Ok(Some(&self.buf[..n]))
    }

    pub fn chunk_size(&self) -> usize {
        self.buf.len()
    }

    /// Total bytes handed out so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Wraps a response body so it can be consumed in `chunk_size` pieces.
pub fn response_reader(
    response: Response,
    chunk_size: usize,
) -> ChunkReader<impl AsyncRead + Send + Unpin> {
    let stream = response.bytes_stream().map_err(io::Error::other).boxed();
    ChunkReader::new(StreamReader::new(stream), chunk_size)
}
