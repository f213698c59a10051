//! Chunked transfer codec, the only body framing ICAP permits.
//!
//! Identical to HTTP/1.1 chunking with one ICAP twist: a zero chunk may
//! carry the `ieof` extension (`0; ieof`), meaning the whole adaptation
//! exchange's body ended inside a preview. That flag is surfaced on the
//! end-of-body frame because the dispatcher acts on it, not the codec.

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::{Error, Result};

use super::tokenize;

const MAX_CHUNK_SIZE_LINE: usize = 256;
const MAX_TRAILER_BLOCK: usize = 4096;

/// One step of a decoded body.
#[derive(Debug)]
pub(crate) enum BodyFrame {
    Data(Bytes),
    End(BodyEnd),
}

/// Terminal frame of a chunked body.
#[derive(Debug, Default)]
pub(crate) struct BodyEnd {
    /// The zero chunk carried `ieof`: the overall exchange's body is done,
    /// not just this transfer.
    pub(crate) ieof: bool,
    pub(crate) trailers: HeaderMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    Size,
    Data { remaining: usize },
    DataEnd,
    Trailer,
    Done,
}

/// Incremental chunked-body decoder over a growing read buffer.
#[derive(Debug)]
pub(crate) struct ChunkedDecoder {
    state: ChunkedState,
    ieof: bool,
    trailers: HeaderMap,
    trailer_budget: usize,
}

impl ChunkedDecoder {
    pub(crate) fn new() -> Self {
        Self {
            state: ChunkedState::Size,
            ieof: false,
            trailers: HeaderMap::new(),
            trailer_budget: MAX_TRAILER_BLOCK,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state == ChunkedState::Done
    }

    /// Decode the next frame. `Ok(None)` means more bytes are needed.
    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<BodyFrame>> {
        loop {
            match self.state {
                ChunkedState::Size => {
                    let Some(line) = tokenize::next_line(buf, MAX_CHUNK_SIZE_LINE)? else {
                        return Ok(None);
                    };
                    let (size, ieof) = parse_size_line(&line)?;
                    if size == 0 {
                        self.ieof = ieof;
                        self.state = ChunkedState::Trailer;
                    } else {
                        self.state = ChunkedState::Data { remaining: size };
                    }
                }
                ChunkedState::Data { remaining } => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let take = remaining.min(buf.len());
                    let data = buf.split_to(take).freeze();
                    self.state = if take == remaining {
                        ChunkedState::DataEnd
                    } else {
                        ChunkedState::Data {
                            remaining: remaining - take,
                        }
                    };
                    return Ok(Some(BodyFrame::Data(data)));
                }
                ChunkedState::DataEnd => {
                    // the CRLF that closes the chunk data; anything else
                    // means the peer sent more bytes than it declared
                    let line = match tokenize::next_line(buf, 8) {
                        Ok(Some(line)) => line,
                        Ok(None) => return Ok(None),
                        Err(Error::MessageTooLarge) => return Err(Error::ChunkSizeMismatch),
                        Err(err) => return Err(err),
                    };
                    if !line.is_empty() {
                        return Err(Error::ChunkSizeMismatch);
                    }
                    self.state = ChunkedState::Size;
                }
                ChunkedState::Trailer => {
                    let Some(line) = tokenize::next_line(buf, self.trailer_budget)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.state = ChunkedState::Done;
                        return Ok(Some(BodyFrame::End(BodyEnd {
                            ieof: self.ieof,
                            trailers: std::mem::take(&mut self.trailers),
                        })));
                    }
                    self.trailer_budget = self.trailer_budget.saturating_sub(line.len() + 2);
                    let (name, value) = tokenize::split_header(&line)?;
                    let name =
                        HeaderName::from_bytes(name.as_bytes()).map_err(|_| Error::InvalidHeader)?;
                    let value = HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader)?;
                    self.trailers.append(name, value);
                }
                ChunkedState::Done => return Ok(None),
            }
        }
    }
}

fn parse_size_line(line: &[u8]) -> Result<(usize, bool)> {
    let line = std::str::from_utf8(line).map_err(|_| Error::InvalidChunkSize)?;
    let (size, extensions) = match line.split_once(';') {
        Some((size, extensions)) => (size, Some(extensions)),
        None => (line, None),
    };
    let size = size.trim();
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidChunkSize);
    }
    let size = usize::from_str_radix(size, 16).map_err(|_| Error::InvalidChunkSize)?;
    // chunk extensions are ignored, except the ICAP ieof marker on the
    // terminating chunk
    let ieof = size == 0
        && extensions
            .map(|ext| ext.split(';').any(|t| t.trim().eq_ignore_ascii_case("ieof")))
            .unwrap_or(false);
    Ok((size, ieof))
}

/// Emit one data chunk as `<hex-size>CRLF<data>CRLF`.
///
/// Empty spans are skipped: a zero-size chunk would terminate the body.
pub(crate) fn write_chunk(dst: &mut BytesMut, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    write_hex(dst, data.len());
    dst.extend_from_slice(b"\r\n");
    dst.extend_from_slice(data);
    dst.extend_from_slice(b"\r\n");
}

/// Terminate a chunked body: zero chunk, optional trailers, final CRLF.
pub(crate) fn write_final_chunk(dst: &mut BytesMut, trailers: Option<&HeaderMap>) {
    dst.extend_from_slice(b"0\r\n");
    if let Some(trailers) = trailers {
        for (name, value) in trailers {
            dst.extend_from_slice(name.as_str().as_bytes());
            dst.extend_from_slice(b": ");
            dst.extend_from_slice(value.as_bytes());
            dst.extend_from_slice(b"\r\n");
        }
    }
    dst.extend_from_slice(b"\r\n");
}

fn write_hex(dst: &mut BytesMut, mut n: usize) {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut tmp = [0u8; 2 * std::mem::size_of::<usize>()];
    let mut i = tmp.len();
    loop {
        i -= 1;
        tmp[i] = DIGITS[n & 0xf];
        n >>= 4;
        if n == 0 {
            break;
        }
    }
    dst.extend_from_slice(&tmp[i..]);
}
