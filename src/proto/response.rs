//! Outbound ICAP response representation and builders.

use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::trace;

use crate::body::BodyStream;

use super::request::HttpHead;
use super::status::StatusCode;

/// An ICAP response: status, ICAP headers, optional embedded HTTP heads and
/// an optional body stream.
///
/// The `Encapsulated` header is never set by hand; the encoder computes it
/// from the embedded heads and body when the response is written. A
/// [`StatusCode::NoContent`] response must not carry a body.
#[derive(Debug)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) reason: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) http_request: Option<HttpHead>,
    pub(crate) http_response: Option<HttpHead>,
    pub(crate) body: Option<BodyStream>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            headers: HeaderMap::new(),
            http_request: None,
            http_response: None,
            body: None,
        }
    }

    /// Shortcut for `204 No Content`: "use the original message unmodified".
    pub fn no_content() -> Self {
        Self::new(StatusCode::NoContent)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The reason phrase, falling back to the canonical one.
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .unwrap_or_else(|| self.status.canonical_reason())
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Append an ICAP header. Invalid names or values are silently dropped.
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

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Embed an adapted HTTP request head (REQMOD result).
    pub fn with_http_request(mut self, head: HttpHead) -> Self {
        self.http_request = Some(head);
        self
    }

    /// Embed an adapted HTTP response head (RESPMOD result, block pages...).
    pub fn with_http_response(mut self, head: HttpHead) -> Self {
        self.http_response = Some(head);
        self
    }

    pub fn http_request(&self) -> Option<&HttpHead> {
        self.http_request.as_ref()
    }

    pub fn http_response(&self) -> Option<&HttpHead> {
        self.http_response.as_ref()
    }

    /// Attach the outgoing body. Ownership of the stream moves into the
    /// response; the encoder is the one that finally drains it.
    pub fn with_body(mut self, body: impl Into<BodyStream>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub(crate) fn take_body(&mut self) -> Option<BodyStream> {
        self.body.take()
    }

    /// Make sure an ISTag header is present; RFC 3507 requires one on every
    /// response. Quotes are added if the configured tag lacks them.
    pub(crate) fn ensure_istag(&mut self, istag: &str) {
        if self.headers.contains_key("istag") {
            return;
        }
        let quoted;
        let value = if istag.starts_with('"') {
            istag
        } else {
            quoted = format!("\"{istag}\"");
            &quoted
        };
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(HeaderName::from_static("istag"), value);
            }
            Err(_) => trace!(istag, "configured ISTag is not a valid header value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_defaults_to_canonical() {
        let response = Response::new(StatusCode::Ok);
        assert_eq!(response.reason(), "OK");
        let response = Response::new(StatusCode::Ok).with_reason("Fine");
        assert_eq!(response.reason(), "Fine");
    }

    #[test]
    fn no_content_has_no_body() {
        let response = Response::no_content();
        assert_eq!(response.status(), StatusCode::NoContent);
        assert!(!response.has_body());
    }

    #[test]
    fn istag_is_quoted_once() {
        let mut response = Response::new(StatusCode::Ok);
        response.ensure_istag("tag-1.0");
        assert_eq!(response.headers().get("istag").unwrap(), "\"tag-1.0\"");

        let mut response = Response::new(StatusCode::Ok);
        response.ensure_istag("\"already\"");
        assert_eq!(response.headers().get("istag").unwrap(), "\"already\"");
    }

    #[test]
    fn explicit_istag_wins() {
        let mut response = Response::new(StatusCode::Ok).header("ISTag", "\"mine\"");
        response.ensure_istag("other");
        assert_eq!(response.headers().get("istag").unwrap(), "\"mine\"");
    }

    #[test]
    fn invalid_builder_headers_are_dropped() {
        let response = Response::new(StatusCode::Ok).header("bad header", "x");
        assert!(response.headers().is_empty());
    }
}
