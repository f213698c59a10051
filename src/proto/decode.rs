//! Incremental ICAP message head parsing.
//!
//! Decoders work against a growing `BytesMut`: `Ok(None)` means the head is
//! not complete yet and the caller should read more bytes. Embedded HTTP
//! header blocks are consumed as part of the head (their sizes are known
//! from the `Encapsulated` offsets), while body chunks stay in the buffer
//! for the chunked decoder.

use bytes::BytesMut;
use http::{HeaderMap, HeaderName, HeaderValue};
use smallvec::SmallVec;
use tracing::trace;
use url::Url;

use crate::body::BodyInput;
use crate::{Error, Method, Result, Version};

use super::encaps::{Encapsulated, SectionType};
use super::request::{HttpHead, Request};
use super::status::StatusCode;
use super::tokenize;

type SectionSizes = SmallVec<[(SectionType, usize); 2]>;

#[derive(Debug)]
enum DecodeState {
    StartLine,
    Headers,
    Sections { sizes: SectionSizes, index: usize },
    Done,
}

/// Common head-parsing scaffolding shared by the request and response
/// decoders: header accumulation with continuation folding, `Encapsulated`
/// interception and embedded-block consumption.
#[derive(Debug)]
struct HeadFields {
    budget: usize,
    max_section: usize,
    raw_headers: Vec<(String, String)>,
    encapsulated: Encapsulated,
    seen_encapsulated: bool,
    preview: Option<usize>,
    http_request: Option<HttpHead>,
    http_response: Option<HttpHead>,
}

impl HeadFields {
    fn new(max_head_size: usize) -> Self {
        Self {
            budget: max_head_size,
            max_section: max_head_size,
            raw_headers: Vec::new(),
            encapsulated: Encapsulated::default(),
            seen_encapsulated: false,
            preview: None,
            http_request: None,
            http_response: None,
        }
    }

    fn next_line(&mut self, buf: &mut BytesMut) -> Result<Option<bytes::Bytes>> {
        let before = buf.len();
        let line = tokenize::next_line(buf, self.budget)?;
        if line.is_some() {
            self.budget -= before - buf.len();
        }
        Ok(line)
    }

    fn push_header_line(&mut self, line: &[u8]) -> Result<()> {
        if line[0] == b' ' || line[0] == b'\t' {
            // continuation line, folded into the previous header
            let folded = std::str::from_utf8(line)
                .map_err(|_| Error::InvalidHeader)?
                .trim();
            let Some((_, value)) = self.raw_headers.last_mut() else {
                return Err(Error::InvalidHeader);
            };
            value.push(' ');
            value.push_str(folded);
            return Ok(());
        }
        let (name, value) = tokenize::split_header(line)?;
        if name.eq_ignore_ascii_case("encapsulated") {
            if self.seen_encapsulated {
                return Err(Error::InvalidEncapsulated("header listed twice"));
            }
            self.seen_encapsulated = true;
            self.encapsulated = Encapsulated::parse(value)?;
            return Ok(());
        }
        if name.eq_ignore_ascii_case("preview") {
            self.preview = Some(value.parse().map_err(|_| Error::InvalidHeader)?);
        }
        self.raw_headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn build_header_map(&mut self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(self.raw_headers.len());
        for (name, value) in self.raw_headers.drain(..) {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| Error::InvalidHeader)?;
            let value = HeaderValue::from_str(&value).map_err(|_| Error::InvalidHeader)?;
            headers.append(name, value);
        }
        Ok(headers)
    }

    /// Sizes of the embedded header blocks still to be consumed.
    fn section_sizes(&self) -> Result<SectionSizes> {
        let sizes: SectionSizes = self.encapsulated.header_section_sizes().collect();
        for (_, size) in &sizes {
            if *size > self.max_section {
                return Err(Error::MessageTooLarge);
            }
        }
        Ok(sizes)
    }

    /// Consume one embedded header block out of `buf` if it fully arrived.
    fn take_section(
        &mut self,
        buf: &mut BytesMut,
        section: SectionType,
        size: usize,
    ) -> Result<bool> {
        if buf.len() < size {
            return Ok(false);
        }
        let block = buf.split_to(size);
        let head = HttpHead::parse(&block)?;
        match section {
            SectionType::ReqHdr => self.http_request = Some(head),
            SectionType::ResHdr => self.http_response = Some(head),
            _ => return Err(Error::InvalidEncapsulated("body section before headers")),
        }
        Ok(true)
    }
}

/// Incremental parser for an inbound ICAP request head.
#[derive(Debug)]
pub(crate) struct RequestDecoder {
    state: DecodeState,
    fields: HeadFields,
    method: Option<Method>,
    uri: Option<Url>,
    version: Option<Version>,
    headers: HeaderMap,
}

impl RequestDecoder {
    pub(crate) fn new(max_head_size: usize) -> Self {
        Self {
            state: DecodeState::StartLine,
            fields: HeadFields::new(max_head_size),
            method: None,
            uri: None,
            version: None,
            headers: HeaderMap::new(),
        }
    }

    /// True once any bytes of a request have been consumed; a clean EOF is
    /// only clean while the decoder is still fresh.
    pub(crate) fn is_partial(&self) -> bool {
        !matches!(self.state, DecodeState::StartLine)
    }

    /// Drive the parse as far as `buf` allows. `Ok(None)` asks for more
    /// bytes; `Ok(Some(..))` yields the request with body bytes still in
    /// `buf`.
    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Request>> {
        loop {
            match &mut self.state {
                DecodeState::StartLine => {
                    let Some(line) = self.fields.next_line(buf)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        // stray CRLF between pipelined transactions
                        continue;
                    }
                    self.parse_request_line(&line)?;
                    self.state = DecodeState::Headers;
                }
                DecodeState::Headers => {
                    let Some(line) = self.fields.next_line(buf)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.finish_headers()?;
                        continue;
                    }
                    self.fields.push_header_line(&line)?;
                }
                DecodeState::Sections { sizes, index } => {
                    let (section, size) = sizes[*index];
                    if !self.fields.take_section(buf, section, size)? {
                        return Ok(None);
                    }
                    *index += 1;
                    if *index == sizes.len() {
                        self.state = DecodeState::Done;
                    }
                }
                DecodeState::Done => return Ok(Some(self.take_request()?)),
            }
        }
    }

    fn parse_request_line(&mut self, line: &[u8]) -> Result<()> {
        let line = std::str::from_utf8(line).map_err(|_| Error::InvalidRequestLine)?;
        let mut parts = line.split_whitespace();
        let method = parts.next().ok_or(Error::InvalidRequestLine)?;
        let uri = parts.next().ok_or(Error::InvalidRequestLine)?;
        let version = parts.next().ok_or(Error::InvalidRequestLine)?;
        if parts.next().is_some() {
            return Err(Error::InvalidRequestLine);
        }
        self.method = Some(Method::from_bytes(method.as_bytes())?);
        self.uri = Some(Url::parse(uri).map_err(|_| Error::InvalidRequestLine)?);
        self.version = Some(Version::parse(version)?);
        trace!(method, uri, "request line parsed");
        Ok(())
    }

    fn finish_headers(&mut self) -> Result<()> {
        let Some(method) = self.method else {
            return Err(Error::InvalidRequestLine);
        };
        self.headers = self.fields.build_header_map()?;
        if self.fields.encapsulated.is_empty() {
            // RFC 3507: only OPTIONS may omit the Encapsulated header
            if method != Method::Options {
                return Err(Error::MissingEncapsulated);
            }
            self.state = DecodeState::Done;
            return Ok(());
        }
        self.fields.encapsulated.validate_for(method)?;
        let sizes = self.fields.section_sizes()?;
        self.state = if sizes.is_empty() {
            DecodeState::Done
        } else {
            DecodeState::Sections { sizes, index: 0 }
        };
        Ok(())
    }

    fn take_request(&mut self) -> Result<Request> {
        let (Some(method), Some(uri), Some(version)) =
            (self.method, self.uri.take(), self.version)
        else {
            return Err(Error::InvalidRequestLine);
        };
        Ok(Request {
            method,
            uri,
            version,
            headers: std::mem::take(&mut self.headers),
            encapsulated: std::mem::take(&mut self.fields.encapsulated),
            preview: self.fields.preview,
            http_request: self.fields.http_request.take(),
            http_response: self.fields.http_response.take(),
            body: BodyInput::None,
        })
    }
}

/// Head of a parsed inbound ICAP response.
///
/// The server side never receives responses, but clients and tests do, and
/// the wire grammar is shared; body chunks stay in the caller's buffer just
/// like for requests.
#[derive(Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
    pub encapsulated: Encapsulated,
    pub http_request: Option<HttpHead>,
    pub http_response: Option<HttpHead>,
}

/// Incremental parser for an inbound ICAP response head.
#[derive(Debug)]
pub struct ResponseDecoder {
    state: DecodeState,
    fields: HeadFields,
    status: Option<StatusCode>,
    reason: String,
    headers: HeaderMap,
}

impl ResponseDecoder {
    pub fn new(max_head_size: usize) -> Self {
        Self {
            state: DecodeState::StartLine,
            fields: HeadFields::new(max_head_size),
            status: None,
            reason: String::new(),
            headers: HeaderMap::new(),
        }
    }

    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseHead>> {
        loop {
            match &mut self.state {
                DecodeState::StartLine => {
                    let Some(line) = self.fields.next_line(buf)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        continue;
                    }
                    self.parse_status_line(&line)?;
                    self.state = DecodeState::Headers;
                }
                DecodeState::Headers => {
                    let Some(line) = self.fields.next_line(buf)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.finish_headers()?;
                        continue;
                    }
                    self.fields.push_header_line(&line)?;
                }
                DecodeState::Sections { sizes, index } => {
                    let (section, size) = sizes[*index];
                    if !self.fields.take_section(buf, section, size)? {
                        return Ok(None);
                    }
                    *index += 1;
                    if *index == sizes.len() {
                        self.state = DecodeState::Done;
                    }
                }
                DecodeState::Done => return Ok(Some(self.take_head()?)),
            }
        }
    }

    fn parse_status_line(&mut self, line: &[u8]) -> Result<()> {
        let line = std::str::from_utf8(line).map_err(|_| Error::InvalidRequestLine)?;
        let mut parts = line.splitn(3, ' ');
        let version = parts.next().ok_or(Error::InvalidRequestLine)?;
        let code = parts.next().ok_or(Error::InvalidRequestLine)?;
        let reason = parts.next().unwrap_or("");
        Version::parse(version)?;
        let code: u16 = code.parse().map_err(|_| Error::InvalidRequestLine)?;
        self.status = Some(StatusCode::from_u16(code).ok_or(Error::InvalidRequestLine)?);
        self.reason = reason.trim().to_string();
        Ok(())
    }

    fn finish_headers(&mut self) -> Result<()> {
        self.headers = self.fields.build_header_map()?;
        if self.fields.encapsulated.is_empty() {
            self.state = DecodeState::Done;
            return Ok(());
        }
        let sizes = self.fields.section_sizes()?;
        self.state = if sizes.is_empty() {
            DecodeState::Done
        } else {
            DecodeState::Sections { sizes, index: 0 }
        };
        Ok(())
    }

    fn take_head(&mut self) -> Result<ResponseHead> {
        let Some(status) = self.status else {
            return Err(Error::InvalidRequestLine);
        };
        Ok(ResponseHead {
            status,
            reason: std::mem::take(&mut self.reason),
            headers: std::mem::take(&mut self.headers),
            encapsulated: std::mem::take(&mut self.fields.encapsulated),
            http_request: self.fields.http_request.take(),
            http_response: self.fields.http_response.take(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 16 * 1024;

    fn decode_request(input: &[u8]) -> Result<Option<Request>> {
        let mut buf = BytesMut::from(input);
        RequestDecoder::new(MAX).decode(&mut buf)
    }

    #[test]
    fn parses_options_without_encapsulated() {
        let request = decode_request(b"OPTIONS icap://icap.example.org/reqmod ICAP/1.0\r\nHost: icap.example.org\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(request.method(), Method::Options);
        assert_eq!(request.service_path(), "reqmod");
        assert_eq!(request.version(), Version::V1_0);
        assert_eq!(request.headers().get("host").unwrap(), "icap.example.org");
        assert!(request.encapsulated().is_empty());
    }

    #[test]
    fn parses_reqmod_with_embedded_request() {
        let http = "GET /index.html HTTP/1.1\r\nHost: www.origin.example\r\n\r\n";
        let wire = format!(
            "REQMOD icap://icap.example.org/filter ICAP/1.0\r\n\
             Host: icap.example.org\r\n\
             Encapsulated: req-hdr=0, null-body={}\r\n\r\n{}",
            http.len(),
            http
        );
        let request = decode_request(wire.as_bytes()).unwrap().unwrap();
        assert_eq!(request.method(), Method::ReqMod);
        assert!(!request.encapsulated().has_body());
        let head = request.http_request().unwrap();
        assert_eq!(head.start_line(), "GET /index.html HTTP/1.1");
        assert_eq!(head.headers().get("host").unwrap(), "www.origin.example");
        assert!(request.http_response().is_none());
    }

    #[test]
    fn parses_respmod_with_both_heads() {
        let req_hdr = "GET /origin HTTP/1.1\r\nHost: www.origin.example\r\n\r\n";
        let res_hdr = "HTTP/1.1 200 OK\r\nContent-Length: 20\r\n\r\n";
        let wire = format!(
            "RESPMOD icap://icap.example.org/respmod ICAP/1.0\r\n\
             Encapsulated: req-hdr=0, res-hdr={}, res-body={}\r\n\r\n{}{}",
            req_hdr.len(),
            req_hdr.len() + res_hdr.len(),
            req_hdr,
            res_hdr
        );
        let mut buf = BytesMut::from(wire.as_bytes());
        let request = RequestDecoder::new(MAX).decode(&mut buf).unwrap().unwrap();
        assert!(request.encapsulated().has_body());
        assert_eq!(
            request.http_request().unwrap().start_line(),
            "GET /origin HTTP/1.1"
        );
        assert_eq!(
            request.http_response().unwrap().content_length(),
            Some(20)
        );
        // body chunks are left untouched for the chunked decoder
        assert!(buf.is_empty());
    }

    #[test]
    fn parse_is_idempotent() {
        let wire = b"REQMOD icap://h/svc ICAP/1.0\r\nAllow: 204\r\nPreview: 128\r\nEncapsulated: req-body=0\r\n\r\n";
        let a = decode_request(wire).unwrap().unwrap();
        let b = decode_request(wire).unwrap().unwrap();
        assert_eq!(a.method(), b.method());
        assert_eq!(a.uri(), b.uri());
        assert_eq!(a.headers(), b.headers());
        assert_eq!(a.encapsulated(), b.encapsulated());
        assert_eq!(a.preview_size(), b.preview_size());
        assert_eq!(a.preview_size(), Some(128));
        assert!(a.allow_204());
    }

    #[test]
    fn partial_head_waits_for_more() {
        let wire = b"REQMOD icap://h/svc ICAP/1.0\r\nEncapsulated: req-body=0\r\n\r\n";
        let mut decoder = RequestDecoder::new(MAX);
        let mut buf = BytesMut::from(&wire[..10]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&wire[10..]);
        let request = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(request.method(), Method::ReqMod);
    }

    #[test]
    fn missing_encapsulated_fails_for_modify_methods() {
        assert!(matches!(
            decode_request(b"REQMOD icap://h/svc ICAP/1.0\r\nHost: h\r\n\r\n"),
            Err(Error::MissingEncapsulated)
        ));
    }

    #[test]
    fn rejects_http_request_line() {
        assert!(matches!(
            decode_request(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n"),
            Err(Error::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn rejects_wrong_version() {
        assert!(matches!(
            decode_request(b"REQMOD icap://h/svc ICAP/2.0\r\n\r\n"),
            Err(Error::InvalidVersion(_))
        ));
    }

    #[test]
    fn rejects_inconsistent_sections() {
        // req-body on RESPMOD
        assert!(matches!(
            decode_request(
                b"RESPMOD icap://h/svc ICAP/1.0\r\nEncapsulated: req-body=0\r\n\r\n"
            ),
            Err(Error::InvalidEncapsulated(_))
        ));
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut wire = b"REQMOD icap://h/svc ICAP/1.0\r\n".to_vec();
        wire.extend_from_slice("X-Filler: ".as_bytes());
        wire.extend_from_slice(&vec![b'a'; 64]);
        wire.extend_from_slice(b"\r\n\r\n");
        let mut buf = BytesMut::from(&wire[..]);
        let mut decoder = RequestDecoder::new(48);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(Error::MessageTooLarge)
        ));
    }

    #[test]
    fn stray_crlf_between_requests_is_skipped() {
        let request =
            decode_request(b"\r\nOPTIONS icap://h/svc ICAP/1.0\r\n\r\n").unwrap().unwrap();
        assert_eq!(request.method(), Method::Options);
    }

    #[test]
    fn decodes_response_head() {
        let res_hdr = "HTTP/1.1 403 Forbidden\r\nContent-Length: 8\r\n\r\n";
        let wire = format!(
            "ICAP/1.0 200 OK\r\nISTag: \"xyz\"\r\nEncapsulated: res-hdr=0, res-body={}\r\n\r\n{}",
            res_hdr.len(),
            res_hdr
        );
        let mut buf = BytesMut::from(wire.as_bytes());
        let head = ResponseDecoder::new(MAX).decode(&mut buf).unwrap().unwrap();
        assert_eq!(head.status, StatusCode::Ok);
        assert_eq!(head.reason, "OK");
        assert_eq!(head.headers.get("istag").unwrap(), "\"xyz\"");
        assert!(head.encapsulated.has_body());
        assert_eq!(
            head.http_response.unwrap().start_line(),
            "HTTP/1.1 403 Forbidden"
        );
    }
}
