//! Preview negotiation (RFC 3507 section 4.5).
//!
//! When a request carries `Preview: N` the client sends at most N body
//! bytes, terminated either by a plain zero chunk (more body exists) or by
//! `0; ieof` (the preview holds the complete body). The adaptation callback
//! then decides: request the remainder with `100 Continue`, skip with
//! `204 No Content`, or answer with a full response right away.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::Result;

use super::chunked::{BodyFrame, ChunkedDecoder};
use super::conn::Conn;

/// Progress of one preview exchange.
#[derive(Debug)]
pub(crate) struct PreviewState {
    limit: usize,
    received: usize,
    ieof: bool,
}

impl PreviewState {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            received: 0,
            ieof: false,
        }
    }

    fn push(&mut self, len: usize) -> Result<()> {
        self.received += len;
        if self.received > self.limit {
            return Err(crate::Error::PreviewOverflow);
        }
        Ok(())
    }

    fn finish(&mut self, ieof: bool) {
        self.ieof = ieof;
    }

    pub(crate) fn received(&self) -> usize {
        self.received
    }

    /// True when the preview was terminated with `ieof`: the callback saw
    /// the entire body and `100 Continue` must never be sent.
    pub(crate) fn is_complete(&self) -> bool {
        self.ieof
    }
}

/// Read the preview chunks off the connection into one buffer.
///
/// Previews are bounded by their negotiated limit, so buffering them whole
/// is fine; the unbounded remainder is what gets streamed.
pub(crate) async fn collect<T>(
    conn: &mut Conn<T>,
    decoder: &mut ChunkedDecoder,
    state: &mut PreviewState,
) -> Result<Bytes>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut preview = BytesMut::new();
    loop {
        match conn.read_body_frame(decoder).await? {
            BodyFrame::Data(data) => {
                state.push(data.len())?;
                preview.extend_from_slice(&data);
            }
            BodyFrame::End(end) => {
                state.finish(end.ieof);
                return Ok(preview.freeze());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn complete_when_ieof_seen() {
        let mut state = PreviewState::new(10);
        state.push(10).unwrap();
        state.finish(true);
        assert!(state.is_complete());
        assert_eq!(state.received(), 10);
    }

    #[test]
    fn incomplete_without_ieof() {
        let mut state = PreviewState::new(10);
        state.push(10).unwrap();
        state.finish(false);
        assert!(!state.is_complete());
    }

    #[test]
    fn rejects_bytes_beyond_the_negotiated_limit() {
        let mut state = PreviewState::new(4);
        state.push(4).unwrap();
        assert!(matches!(state.push(1), Err(Error::PreviewOverflow)));
    }
}
