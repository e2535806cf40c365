use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::resp::{Decoder, Encoder, Frame};

/// A framed connection to one Redis node.
///
/// Wraps any async stream (TCP, TLS) and handles RESP encoding and decoding,
/// with optional per-direction timeouts.
pub struct Connection<S> {
    stream: S,
    decoder: Decoder,
    encoder: Encoder,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a connection over the given stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: Decoder::new(),
            encoder: Encoder::new(),
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// Configures read and write timeouts.
    pub fn with_timeouts(
        mut self,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Self {
        self.read_timeout = read_timeout;
        self.write_timeout = write_timeout;
        self
    }

    /// Writes one frame to the peer.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.encoder.encode(frame);
        let data = self.encoder.take();
        match self.write_timeout {
            Some(limit) => tokio::time::timeout(limit, self.stream.write_all(&data))
                .await
                .map_err(|_| timed_out("write timeout"))??,
            None => self.stream.write_all(&data).await?,
        }
        Ok(())
    }

    /// Reads one frame from the peer.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return Ok(frame);
            }

            let mut buf = [0u8; 4096];
            let read = self.stream.read(&mut buf);
            let n = match self.read_timeout {
                Some(limit) => tokio::time::timeout(limit, read)
                    .await
                    .map_err(|_| timed_out("read timeout"))??,
                None => read.await?,
            };
            if n == 0 {
                return Err(Error::Io {
                    source: io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"),
                });
            }
            self.decoder.feed(&buf[..n]);
        }
    }
}

fn timed_out(what: &str) -> Error {
    Error::Io {
        source: io::Error::new(io::ErrorKind::TimedOut, what),
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}
