//! ICAP (Internet Content Adaptation Protocol) server engine according to
//! RFC 3507.
//!
//! ICAP is the HTTP-like protocol proxies use to hand HTTP requests and
//! responses to an external adaptation service (virus scanning, content
//! filtering, header rewriting). This crate implements the protocol engine:
//! parsing inbound ICAP messages including their encapsulated HTTP sections,
//! decoding and encoding chunked bodies as lazy streams, negotiating message
//! previews, driving the per-connection transaction state machine and
//! serializing responses back onto the wire.
//!
//! The adaptation logic itself is supplied by the caller as an
//! [`IcapService`]; per-service capabilities (supported methods, preview
//! size, ISTag) live in a [`ServiceOptions`] entry of a [`ServiceRegistry`].
//! The engine runs over any `AsyncRead + AsyncWrite` transport via
//! [`serve_connection`], or as a TCP accept loop via [`Server`].
//!
//! ```no_run
//! use icap_core::{BoxError, Decision, Method, Request, Server, ServiceOptions};
//!
//! async fn scan(_request: Request) -> Result<Decision, BoxError> {
//!     Ok(Decision::NoModification)
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .bind("127.0.0.1:1344")
//!         .add_service(
//!             "reqmod",
//!             ServiceOptions::new([Method::ReqMod], "scan-1.0").with_preview(1024),
//!             scan,
//!         )
//!         .build()
//!         .await
//!         .unwrap()
//!         .run()
//!         .await
//!         .unwrap();
//! }
//! ```

use thiserror::Error;

mod body;
pub mod proto;
mod server;
mod service;

pub use crate::body::{BodyInput, BodyStream};
pub use crate::proto::{
    serve_connection, ConnConfig, Encapsulated, HttpHead, Request, Response, SectionType,
    StatusCode,
};
pub use crate::server::{Server, ServerBuilder};
pub use crate::service::{
    BoxError, Decision, IcapService, ServiceFuture, ServiceOptions, ServiceRegistry,
};

/// Default ICAP port as specified in RFC 3507
pub const DEFAULT_ICAP_PORT: u16 = 1344;

/// ICAP version string
pub const ICAP_VERSION: &str = "ICAP/1.0";

/// The three request methods defined by RFC 3507.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    ReqMod,
    RespMod,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::ReqMod => "REQMOD",
            Method::RespMod => "RESPMOD",
        }
    }

    pub fn from_bytes(src: &[u8]) -> Result<Self> {
        match src {
            b"OPTIONS" => Ok(Method::Options),
            b"REQMOD" => Ok(Method::ReqMod),
            b"RESPMOD" => Ok(Method::RespMod),
            other => Err(Error::UnsupportedMethod(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ICAP protocol version. Only 1.0 has ever been specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V1_0,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1_0 => "ICAP/1.0",
        }
    }

    pub fn parse(src: &str) -> Result<Self> {
        match src {
            "ICAP/1.0" => Ok(Version::V1_0),
            other => Err(Error::InvalidVersion(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("invalid version: {0}")]
    InvalidVersion(String),
    #[error("malformed request line")]
    InvalidRequestLine,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("message too large")]
    MessageTooLarge,
    #[error("missing Encapsulated header")]
    MissingEncapsulated,
    #[error("malformed Encapsulated header: {0}")]
    InvalidEncapsulated(&'static str),
    #[error("invalid chunk size")]
    InvalidChunkSize,
    #[error("chunk size mismatch: body ended before its declared length")]
    ChunkSizeMismatch,
    #[error("preview exceeded its negotiated size")]
    PreviewOverflow,
    #[error("i/o timed out")]
    Timeout,
    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),
    #[error("adaptation callback failed: {0}")]
    Service(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Status for the best-effort error reply emitted before the connection
    /// is torn down. `None` when the failure is pure I/O and nothing can
    /// usefully be written anymore.
    pub(crate) fn response_status(&self) -> Option<StatusCode> {
        match self {
            Error::UnsupportedMethod(_) => Some(StatusCode::MethodNotAllowed),
            Error::Timeout => Some(StatusCode::RequestTimeout),
            Error::Service(_) | Error::InvalidResponse(_) => Some(StatusCode::ServerError),
            Error::Io(_) => None,
            _ => Some(StatusCode::BadRequest),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_as_str() {
        assert_eq!(Method::Options.as_str(), "OPTIONS");
        assert_eq!(Method::ReqMod.as_str(), "REQMOD");
        assert_eq!(Method::RespMod.as_str(), "RESPMOD");
    }

    #[test]
    fn method_from_bytes() {
        assert_eq!(Method::from_bytes(b"REQMOD").unwrap(), Method::ReqMod);
        assert!(matches!(
            Method::from_bytes(b"GET"),
            Err(Error::UnsupportedMethod(m)) if m == "GET"
        ));
    }

    #[test]
    fn version_parse() {
        assert_eq!(Version::parse("ICAP/1.0").unwrap(), Version::V1_0);
        assert!(matches!(
            Version::parse("ICAP/1.1"),
            Err(Error::InvalidVersion(_))
        ));
    }

    #[test]
    fn error_status_mapping() {
        assert_eq!(
            Error::UnsupportedMethod("GET".into()).response_status(),
            Some(StatusCode::MethodNotAllowed)
        );
        assert_eq!(
            Error::InvalidChunkSize.response_status(),
            Some(StatusCode::BadRequest)
        );
        assert_eq!(
            Error::Timeout.response_status(),
            Some(StatusCode::RequestTimeout)
        );
        assert_eq!(
            Error::Io(std::io::ErrorKind::BrokenPipe.into()).response_status(),
            None
        );
    }
}
