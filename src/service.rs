//! Adaptation callbacks and per-service capability configuration.
//!
//! The engine routes each transaction to an [`IcapService`] registered under
//! the service path of the request URI. What a service advertises in its
//! OPTIONS response (supported methods, preview size, ISTag) lives beside
//! it as [`ServiceOptions`]. The registry is built once at startup and
//! shared read-only across connection tasks.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::proto::{Response, StatusCode};
use crate::{Method, Request};

/// Errors bubbling out of adaptation callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by [`IcapService::handle`].
pub type ServiceFuture<'a> = Pin<Box<dyn Future<Output = Result<Decision, BoxError>> + Send + 'a>>;

/// What an adaptation callback decided about a message.
#[derive(Debug)]
pub enum Decision {
    /// Only meaningful while a preview is outstanding: send `100 Continue`
    /// and call again with the remainder of the body.
    Continue,
    /// The message needs no modification; the server answers
    /// `204 No Content`.
    NoModification,
    /// A full ICAP response, possibly with adapted headers and body.
    Respond(Response),
}

/// The adaptation callback invoked for REQMOD and RESPMOD transactions.
///
/// With a preview the callback runs up to twice per transaction: once with
/// [`BodyInput::Preview`](crate::BodyInput::Preview), and, if it answers
/// [`Decision::Continue`], once more with the streamed remainder.
/// Without a preview it runs once with the full body stream.
///
/// Implemented for any `Fn(Request) -> impl Future` closure, so simple
/// services are just async functions.
pub trait IcapService: Send + Sync {
    fn handle(&self, request: Request) -> ServiceFuture<'_>;
}

impl<F, Fut> IcapService for F
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Decision, BoxError>> + Send + 'static,
{
    fn handle(&self, request: Request) -> ServiceFuture<'_> {
        Box::pin((self)(request))
    }
}

/// Capabilities a service advertises in its OPTIONS response.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    methods: Vec<Method>,
    istag: String,
    service: Option<String>,
    preview: Option<usize>,
    options_ttl: Option<u32>,
    allow_204: bool,
}

impl ServiceOptions {
    /// A service supporting `methods`, identified by `istag`.
    ///
    /// The ISTag names the current state of the service; clients revalidate
    /// cached results whenever it changes.
    pub fn new(methods: impl IntoIterator<Item = Method>, istag: impl Into<String>) -> Self {
        Self {
            methods: methods.into_iter().collect(),
            istag: istag.into(),
            service: None,
            preview: None,
            options_ttl: None,
            allow_204: true,
        }
    }

    /// Human-readable service description (`Service` header).
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Preview size offered to clients (`Preview` header).
    pub fn with_preview(mut self, bytes: usize) -> Self {
        self.preview = Some(bytes);
        self
    }

    /// How long clients may cache this OPTIONS response, in seconds.
    pub fn with_options_ttl(mut self, seconds: u32) -> Self {
        self.options_ttl = Some(seconds);
        self
    }

    /// Whether to advertise `Allow: 204` (on by default).
    pub fn with_allow_204(mut self, allow: bool) -> Self {
        self.allow_204 = allow;
        self
    }

    pub fn istag(&self) -> &str {
        &self.istag
    }

    pub fn preview(&self) -> Option<usize> {
        self.preview
    }

    pub(crate) fn supports(&self, method: Method) -> bool {
        self.methods.contains(&method)
    }

    /// Build the OPTIONS response body-less head from these capabilities.
    pub(crate) fn to_options_response(&self) -> Response {
        let methods = self
            .methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let mut response = Response::new(StatusCode::Ok).header("Methods", methods);
        if let Some(service) = &self.service {
            response = response.header("Service", service.as_str());
        }
        if let Some(preview) = self.preview {
            response = response.header("Preview", preview.to_string());
        }
        if let Some(ttl) = self.options_ttl {
            response = response.header("Options-TTL", ttl.to_string());
        }
        if self.allow_204 {
            response = response.header("Allow", "204");
        }
        response
    }
}

/// A registered service: its capabilities plus the callback.
#[derive(Clone)]
pub(crate) struct ServiceEntry {
    pub(crate) options: ServiceOptions,
    pub(crate) service: Arc<dyn IcapService>,
}

/// All services of a server, keyed by service path.
///
/// Built once, then shared behind an `Arc`; connection tasks only read it.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, ServiceEntry>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under `path` (leading slashes are ignored, so
    /// `"reqmod"` serves `icap://host/reqmod`).
    pub fn register<S>(&mut self, path: impl AsRef<str>, options: ServiceOptions, service: S)
    where
        S: IcapService + 'static,
    {
        self.services.insert(
            path.as_ref().trim_matches('/').to_string(),
            ServiceEntry {
                options,
                service: Arc::new(service),
            },
        );
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub(crate) fn lookup(&self, path: &str) -> Option<ServiceEntry> {
        self.services.get(path.trim_matches('/')).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_request: Request) -> Result<Decision, BoxError> {
        Ok(Decision::NoModification)
    }

    #[test]
    fn registry_lookup_normalizes_paths() {
        let mut registry = ServiceRegistry::new();
        registry.register(
            "/reqmod/",
            ServiceOptions::new([Method::ReqMod], "tag-1"),
            noop,
        );
        assert!(registry.lookup("reqmod").is_some());
        assert!(registry.lookup("/reqmod").is_some());
        assert!(registry.lookup("respmod").is_none());
    }

    #[test]
    fn options_response_carries_capabilities() {
        let options = ServiceOptions::new([Method::ReqMod, Method::RespMod], "tag-2")
            .with_service("Example Scanner")
            .with_preview(1024)
            .with_options_ttl(3600);
        assert!(options.supports(Method::ReqMod));
        assert!(!options.supports(Method::Options));

        let response = options.to_options_response();
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(
            response.headers().get("methods").unwrap(),
            "REQMOD, RESPMOD"
        );
        assert_eq!(response.headers().get("service").unwrap(), "Example Scanner");
        assert_eq!(response.headers().get("preview").unwrap(), "1024");
        assert_eq!(response.headers().get("options-ttl").unwrap(), "3600");
        assert_eq!(response.headers().get("allow").unwrap(), "204");
    }

    #[test]
    fn allow_204_can_be_disabled() {
        let options = ServiceOptions::new([Method::ReqMod], "tag-3").with_allow_204(false);
        let response = options.to_options_response();
        assert!(response.headers().get("allow").is_none());
    }

    #[tokio::test]
    async fn closures_are_services() {
        let mut registry = ServiceRegistry::new();
        registry.register(
            "echo",
            ServiceOptions::new([Method::ReqMod], "tag-4"),
            |_request: Request| async move { Ok::<_, BoxError>(Decision::NoModification) },
        );
        assert!(!registry.is_empty());
    }
}
