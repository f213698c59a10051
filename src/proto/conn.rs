//! Buffered ICAP connection over an arbitrary byte-stream transport.
//!
//! The engine only ever sees read/write/flush on something implementing
//! `AsyncRead + AsyncWrite`; whether that is a plain TCP socket, a
//! TLS-wrapped stream or an in-memory duplex is the caller's business.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::trace;

use crate::{Error, Result};

use super::chunked::{BodyFrame, ChunkedDecoder};
use super::decode::RequestDecoder;
use super::request::Request;

/// Per-connection tuning knobs.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// How long a single socket read may stall before the transaction is
    /// failed with a timeout.
    pub read_timeout: Duration,
    /// How long buffered response bytes may take to drain.
    pub write_timeout: Duration,
    /// Upper bound on an ICAP head: request line, headers and embedded
    /// HTTP header blocks.
    pub max_head_size: usize,
    /// How many decoded body chunks may sit between the socket reader and a
    /// slow adaptation callback before the reader stops pulling more bytes.
    pub relay_buffer_chunks: usize,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            max_head_size: 16 * 1024,
            relay_buffer_chunks: 16,
        }
    }
}

/// A transport plus its read/write buffers.
#[derive(Debug)]
pub(crate) struct Conn<T> {
    io: T,
    read_buf: BytesMut,
    write_buf: BytesMut,
    config: ConnConfig,
}

impl<T> Conn<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(io: T, config: ConnConfig) -> Self {
        Self {
            io,
            read_buf: BytesMut::with_capacity(8 * 1024),
            write_buf: BytesMut::with_capacity(8 * 1024),
            config,
        }
    }

    /// Read until the decoder yields a complete request head.
    ///
    /// `Ok(None)` is a clean end of the connection: the peer closed between
    /// transactions. EOF in the middle of a head is an error.
    pub(crate) async fn read_request(
        &mut self,
        decoder: &mut RequestDecoder,
    ) -> Result<Option<Request>> {
        loop {
            if let Some(request) = decoder.decode(&mut self.read_buf)? {
                return Ok(Some(request));
            }
            if self.fill().await? == 0 {
                return if self.read_buf.is_empty() && !decoder.is_partial() {
                    Ok(None)
                } else {
                    Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()))
                };
            }
        }
    }

    /// Read until the chunked decoder yields the next body frame.
    ///
    /// EOF while the body is unfinished means the peer sent fewer bytes
    /// than its chunk sizes declared.
    pub(crate) async fn read_body_frame(
        &mut self,
        decoder: &mut ChunkedDecoder,
    ) -> Result<BodyFrame> {
        loop {
            if let Some(frame) = decoder.decode(&mut self.read_buf)? {
                return Ok(frame);
            }
            if self.fill().await? == 0 {
                debug_assert!(!decoder.is_done());
                return Err(Error::ChunkSizeMismatch);
            }
        }
    }

    async fn fill(&mut self) -> Result<usize> {
        match timeout(self.config.read_timeout, self.io.read_buf(&mut self.read_buf)).await {
            Ok(Ok(n)) => {
                trace!(bytes = n, "socket read");
                Ok(n)
            }
            Ok(Err(err)) => Err(Error::Io(err)),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Staging buffer for outgoing bytes; nothing hits the socket until
    /// [`Conn::flush`].
    pub(crate) fn write_buf(&mut self) -> &mut BytesMut {
        &mut self.write_buf
    }

    pub(crate) async fn flush(&mut self) -> Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let buf = self.write_buf.split();
        match timeout(self.config.write_timeout, async {
            self.io.write_all(&buf).await?;
            self.io.flush().await
        })
        .await
        {
            Ok(Ok(())) => {
                trace!(bytes = buf.len(), "socket write");
                Ok(())
            }
            Ok(Err(err)) => Err(Error::Io(err)),
            Err(_) => Err(Error::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;

    #[tokio::test]
    async fn reads_request_across_partial_writes() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut conn = Conn::new(server, ConnConfig::default());

        let wire = b"OPTIONS icap://h/svc ICAP/1.0\r\nHost: h\r\n\r\n";
        let (a, b) = wire.split_at(17);
        client.write_all(a).await.unwrap();

        let reader = tokio::spawn(async move {
            let mut decoder = RequestDecoder::new(16 * 1024);
            conn.read_request(&mut decoder).await
        });
        client.write_all(b).await.unwrap();

        let request = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(request.method(), Method::Options);
    }

    #[tokio::test]
    async fn clean_eof_between_requests() {
        let (client, server) = tokio::io::duplex(256);
        let mut conn = Conn::new(server, ConnConfig::default());
        drop(client);
        let mut decoder = RequestDecoder::new(16 * 1024);
        assert!(conn.read_request(&mut decoder).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_head_is_an_error() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut conn = Conn::new(server, ConnConfig::default());
        client.write_all(b"REQMOD icap://h/s ICAP/1.0\r\nHo").await.unwrap();
        drop(client);
        let mut decoder = RequestDecoder::new(16 * 1024);
        assert!(matches!(
            conn.read_request(&mut decoder).await,
            Err(Error::Io(_))
        ));
    }

    #[tokio::test]
    async fn eof_mid_body_is_a_chunk_mismatch() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut conn = Conn::new(server, ConnConfig::default());
        client.write_all(b"5\r\nab").await.unwrap();
        drop(client);
        let mut decoder = ChunkedDecoder::new();
        // the partial data frame comes through first
        assert!(matches!(
            conn.read_body_frame(&mut decoder).await.unwrap(),
            BodyFrame::Data(_)
        ));
        assert!(matches!(
            conn.read_body_frame(&mut decoder).await,
            Err(Error::ChunkSizeMismatch)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_read_times_out() {
        let (_client, server) = tokio::io::duplex(256);
        let mut conn = Conn::new(
            server,
            ConnConfig {
                read_timeout: Duration::from_millis(50),
                ..ConnConfig::default()
            },
        );
        let mut decoder = RequestDecoder::new(16 * 1024);
        assert!(matches!(
            conn.read_request(&mut decoder).await,
            Err(Error::Timeout)
        ));
    }

    #[tokio::test]
    async fn flush_drains_the_write_buffer() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut conn = Conn::new(server, ConnConfig::default());
        conn.write_buf().extend_from_slice(b"ICAP/1.0 200 OK\r\n\r\n");
        conn.flush().await.unwrap();

        let mut out = vec![0u8; 19];
        client.read_exact(&mut out).await.unwrap();
        assert_eq!(&out[..], b"ICAP/1.0 200 OK\r\n\r\n");
    }
}
