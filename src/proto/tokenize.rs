//! Line tokenization over a growing read buffer.
//!
//! ICAP heads are CRLF-delimited; real-world clients occasionally emit bare
//! LF, which is accepted on input. Output paths always emit CRLF.

use bytes::{Bytes, BytesMut};

use crate::{Error, Result};

/// Pull the next line out of `buf`, without its terminator.
///
/// `Ok(None)` means the buffer ends mid-line; the caller should read more
/// bytes and retry. `max` bounds how many bytes the line (including its
/// terminator) may span before the message is rejected with
/// [`Error::MessageTooLarge`].
pub(crate) fn next_line(buf: &mut BytesMut, max: usize) -> Result<Option<Bytes>> {
    match memchr::memchr(b'\n', buf) {
        Some(nl) => {
            if nl + 1 > max {
                return Err(Error::MessageTooLarge);
            }
            let mut line = buf.split_to(nl + 1);
            line.truncate(nl);
            if line.last() == Some(&b'\r') {
                line.truncate(nl - 1);
            }
            Ok(Some(line.freeze()))
        }
        None => {
            if buf.len() >= max {
                return Err(Error::MessageTooLarge);
            }
            Ok(None)
        }
    }
}

/// Split a header line at its first colon into `(name, value)`.
///
/// The name keeps its original case (lookups are case-insensitive anyway),
/// trailing whitespace stripped; the value is trimmed on both sides.
pub(crate) fn split_header(line: &[u8]) -> Result<(&str, &str)> {
    let line = std::str::from_utf8(line).map_err(|_| Error::InvalidHeader)?;
    let colon = memchr::memchr(b':', line.as_bytes()).ok_or(Error::InvalidHeader)?;
    let name = line[..colon].trim_end();
    if name.is_empty() {
        return Err(Error::InvalidHeader);
    }
    let value = line[colon + 1..].trim();
    Ok((name, value))
}
