//! Inbound ICAP request representation.

use bytes::BytesMut;
use http::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::body::BodyInput;
use crate::{Error, Method, Result, Version};

use super::encaps::Encapsulated;
use super::tokenize;

/// A parsed ICAP request head plus a handle to its (still unconsumed) body.
///
/// Constructed by the message parser once the full head (request line, ICAP
/// headers and any embedded HTTP header blocks) is available; the body is
/// attached by the dispatcher as a preview or live stream.
#[derive(Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Url,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) encapsulated: Encapsulated,
    pub(crate) preview: Option<usize>,
    pub(crate) http_request: Option<HttpHead>,
    pub(crate) http_response: Option<HttpHead>,
    pub(crate) body: BodyInput,
}

impl Request {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// The service name addressed by the request URI, without the leading
    /// slash: `icap://host/reqmod` yields `"reqmod"`.
    pub fn service_path(&self) -> &str {
        self.uri.path().trim_start_matches('/')
    }

    /// ICAP headers. Names are case-insensitive; duplicate headers are kept
    /// in arrival order. The structural `Encapsulated` header is not in the
    /// map, see [`Request::encapsulated`].
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn encapsulated(&self) -> &Encapsulated {
        &self.encapsulated
    }

    /// The negotiated preview size, when the client sent `Preview: N`.
    pub fn preview_size(&self) -> Option<usize> {
        self.preview
    }

    /// Embedded HTTP request head (REQMOD, and optionally RESPMOD).
    pub fn http_request(&self) -> Option<&HttpHead> {
        self.http_request.as_ref()
    }

    /// Embedded HTTP response head (RESPMOD).
    pub fn http_response(&self) -> Option<&HttpHead> {
        self.http_response.as_ref()
    }

    pub fn body(&self) -> &BodyInput {
        &self.body
    }

    /// Take ownership of the body handle, leaving [`BodyInput::None`].
    pub fn take_body(&mut self) -> BodyInput {
        std::mem::replace(&mut self.body, BodyInput::None)
    }

    /// Whether the client advertised `Allow: 204`.
    pub fn allow_204(&self) -> bool {
        self.headers
            .get_all("allow")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|token| token.trim() == "204")
    }

    /// Connections are persistent unless the client sent
    /// `Connection: close`.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(value) => !value.as_bytes().eq_ignore_ascii_case(b"close"),
            None => true,
        }
    }

    /// Clone the head with a different body handle; used when the callback
    /// is invoked a second time after a preview.
    pub(crate) fn with_body(&self, body: BodyInput) -> Request {
        Request {
            method: self.method,
            uri: self.uri.clone(),
            version: self.version,
            headers: self.headers.clone(),
            encapsulated: self.encapsulated.clone(),
            preview: self.preview,
            http_request: self.http_request.clone(),
            http_response: self.http_response.clone(),
            body,
        }
    }
}

/// An embedded HTTP header block: request line or status line plus headers.
///
/// The block is pass-through content as far as ICAP is concerned; the engine
/// parses it only far enough to re-serialize it and to let callers inspect
/// message framing headers like `Content-Length`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpHead {
    pub(crate) start_line: String,
    pub(crate) headers: HeaderMap,
}

impl HttpHead {
    pub fn new(start_line: impl Into<String>) -> Self {
        Self {
            start_line: start_line.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Append a header. Invalid names or values are silently dropped.
    pub fn header<N, V>(mut self, name: N, value: V) -> Self
    where
        N: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        if let (Ok(name), Ok(value)) = (name.try_into(), value.try_into()) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn start_line(&self) -> &str {
        &self.start_line
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// `Content-Length` of the embedded message, if declared and well-formed.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(http::header::CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// Whether the embedded message declared `Transfer-Encoding: chunked`.
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get_all(http::header::TRANSFER_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("chunked"))
    }

    /// Parse one encapsulated header block, sized by the `Encapsulated`
    /// offsets. Continuation lines are folded with a single space.
    pub(crate) fn parse(block: &[u8]) -> Result<Self> {
        let mut buf = BytesMut::from(block);
        let limit = block.len() + 2;
        let start_line = match tokenize::next_line(&mut buf, limit)? {
            Some(line) if !line.is_empty() => String::from_utf8(line.to_vec())
                .map_err(|_| Error::InvalidHeader)?,
            _ => return Err(Error::InvalidHeader),
        };

        let mut raw: Vec<(String, String)> = Vec::new();
        while let Some(line) = tokenize::next_line(&mut buf, limit)? {
            if line.is_empty() {
                break;
            }
            if line[0] == b' ' || line[0] == b'\t' {
                let folded = std::str::from_utf8(&line)
                    .map_err(|_| Error::InvalidHeader)?
                    .trim();
                let Some((_, value)) = raw.last_mut() else {
                    return Err(Error::InvalidHeader);
                };
                value.push(' ');
                value.push_str(folded);
                continue;
            }
            let (name, value) = tokenize::split_header(&line)?;
            raw.push((name.to_string(), value.to_string()));
        }

        let mut headers = HeaderMap::with_capacity(raw.len());
        for (name, value) in raw {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| Error::InvalidHeader)?;
            let value = HeaderValue::from_str(&value).map_err(|_| Error::InvalidHeader)?;
            headers.append(name, value);
        }
        Ok(Self {
            start_line,
            headers,
        })
    }

    /// Serialize the block, CRLF-terminated including the closing blank line.
    pub(crate) fn write(&self, dst: &mut BytesMut) {
        dst.extend_from_slice(self.start_line.as_bytes());
        dst.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            dst.extend_from_slice(name.as_str().as_bytes());
            dst.extend_from_slice(b": ");
            dst.extend_from_slice(value.as_bytes());
            dst.extend_from_slice(b"\r\n");
        }
        dst.extend_from_slice(b"\r\n");
    }
}
