//! Per-connection transaction dispatch.
//!
//! One task owns one connection and drives it through: read head → route to
//! a registered service → (OPTIONS reply | preview negotiation | body relay)
//! → response emission → next request or close. Transactions on a
//! connection are strictly sequential; nothing here is shared between
//! connections except the read-only service registry.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace, warn};

use crate::body::{BodyInput, BodyStream};
use crate::service::{Decision, ServiceEntry, ServiceOptions, ServiceRegistry};
use crate::{Error, Method, Result};

use super::chunked::{BodyEnd, BodyFrame, ChunkedDecoder};
use super::conn::{Conn, ConnConfig};
use super::decode::RequestDecoder;
use super::encode;
use super::preview::{self, PreviewState};
use super::request::Request;
use super::response::Response;
use super::status::StatusCode;

/// Flush the write buffer whenever a streamed body has staged this much.
const FLUSH_WATERMARK: usize = 8 * 1024;

/// Serve one established connection until it closes.
///
/// The transport can be anything byte-stream shaped: a TCP socket, a
/// TLS stream, an in-memory pipe. Returns once the peer closes cleanly, or
/// with the error that tore the connection down (a best-effort ICAP error
/// status is emitted first whenever one applies).
pub async fn serve_connection<T>(
    io: T,
    services: Arc<ServiceRegistry>,
    config: ConnConfig,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    Dispatcher {
        conn: Conn::new(io, config.clone()),
        services,
        config,
    }
    .run()
    .await
}

struct Dispatcher<T> {
    conn: Conn<T>,
    services: Arc<ServiceRegistry>,
    config: ConnConfig,
}

impl<T> Dispatcher<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(mut self) -> Result<()> {
        loop {
            let mut decoder = RequestDecoder::new(self.config.max_head_size);
            let request = match self.conn.read_request(&mut decoder).await {
                Ok(Some(request)) => request,
                Ok(None) => {
                    trace!("connection closed by peer");
                    return Ok(());
                }
                Err(err) => return self.abort(err).await,
            };
            debug!(
                method = request.method().as_str(),
                uri = %request.uri(),
                "transaction started"
            );
            let keep_alive = request.is_keep_alive();
            match self.transact(request).await {
                Ok(()) if keep_alive => continue,
                Ok(()) => {
                    trace!("closing: client requested Connection: close");
                    return Ok(());
                }
                Err(err) => return self.abort(err).await,
            }
        }
    }

    /// Emit a best-effort error status, then surface the failure.
    async fn abort(&mut self, err: Error) -> Result<()> {
        warn!(error = %err, "transaction failed, closing connection");
        if let Some(status) = err.response_status() {
            let sent = self.write_response(Response::new(status), None).await;
            if sent.is_err() {
                trace!("error status could not be written");
            }
        }
        Err(err)
    }

    async fn transact(&mut self, request: Request) -> Result<()> {
        let Some(entry) = self.services.lookup(request.service_path()) else {
            debug!(path = request.service_path(), "no such service");
            return self.reject(request, StatusCode::ServiceNotFound).await;
        };
        match request.method() {
            Method::Options => self.handle_options(request, entry).await,
            method if !entry.options.supports(method) => {
                debug!(method = method.as_str(), "method not offered by service");
                self.reject(request, StatusCode::MethodNotAllowed).await
            }
            _ => self.handle_modify(request, entry).await,
        }
    }

    /// Consume any declared body, then answer `status` with no sections.
    /// Leaving unread chunks on a kept-alive connection would poison the
    /// next transaction's framing.
    async fn reject(&mut self, request: Request, status: StatusCode) -> Result<()> {
        self.drain_body(&request).await?;
        self.write_response(Response::new(status), None).await
    }

    async fn drain_body(&mut self, request: &Request) -> Result<()> {
        if !request.encapsulated().has_body() {
            return Ok(());
        }
        let mut decoder = ChunkedDecoder::new();
        loop {
            match self.conn.read_body_frame(&mut decoder).await? {
                BodyFrame::Data(_) => continue,
                BodyFrame::End(_) => return Ok(()),
            }
        }
    }

    async fn handle_options(&mut self, request: Request, entry: ServiceEntry) -> Result<()> {
        self.drain_body(&request).await?;
        let response = entry.options.to_options_response();
        self.write_response(response, Some(&entry.options)).await
    }

    async fn handle_modify(&mut self, request: Request, entry: ServiceEntry) -> Result<()> {
        if !request.encapsulated().has_body() {
            // null-body: the callback gets exactly one invocation and no
            // chunks were consumed, so a callback failure leaves the
            // connection reusable
            return match entry.service.handle(request).await {
                Ok(decision) => self.finish(decision, &entry).await,
                Err(err) => {
                    warn!(error = %err, "adaptation callback failed");
                    self.write_response(
                        Response::new(StatusCode::ServerError),
                        Some(&entry.options),
                    )
                    .await
                }
            };
        }
        match request.preview_size() {
            Some(limit) => self.handle_preview(request, entry, limit).await,
            None => {
                let decision = self.relay_body(request, &entry).await?;
                self.finish(decision, &entry).await
            }
        }
    }

    /// Preview negotiation: buffer up to the negotiated prefix, ask the
    /// callback, then either stop (204 / full response) or pull in the rest
    /// after `100 Continue`.
    async fn handle_preview(
        &mut self,
        request: Request,
        entry: ServiceEntry,
        limit: usize,
    ) -> Result<()> {
        let mut state = PreviewState::new(limit);
        let mut decoder = ChunkedDecoder::new();
        let bytes = preview::collect(&mut self.conn, &mut decoder, &mut state).await?;
        trace!(
            limit,
            received = state.received(),
            complete = state.is_complete(),
            "preview collected"
        );

        let preview_request = request.with_body(BodyInput::Preview {
            bytes,
            complete: state.is_complete(),
        });
        let decision = entry
            .service
            .handle(preview_request)
            .await
            .map_err(Error::Service)?;

        match decision {
            Decision::Continue if state.is_complete() => {
                // the preview already held the whole body; nothing more will
                // arrive and 100 Continue must not be sent
                let request = request.with_body(BodyInput::Stream(BodyStream::empty()));
                let decision = entry.service.handle(request).await.map_err(Error::Service)?;
                self.finish(decision, &entry).await
            }
            Decision::Continue => {
                self.write_response(Response::new(StatusCode::Continue), None)
                    .await?;
                let decision = self.relay_body(request, &entry).await?;
                self.finish(decision, &entry).await
            }
            decision => self.finish(decision, &entry).await,
        }
    }

    /// Stream body chunks to the callback through a bounded channel while it
    /// runs. The channel bound is the backpressure: once the callback stops
    /// pulling, the socket reader stops too. If the callback returns without
    /// draining its stream, the remaining frames are read and discarded so
    /// the connection stays usable.
    async fn relay_body(&mut self, request: Request, entry: &ServiceEntry) -> Result<Decision> {
        let (sender, stream) = BodyStream::channel(self.config.relay_buffer_chunks);
        let request = request.with_body(BodyInput::Stream(stream));
        let service = entry.service.clone();

        let conn = &mut self.conn;
        let feed = async move {
            let mut decoder = ChunkedDecoder::new();
            let mut sender = Some(sender);
            loop {
                match conn.read_body_frame(&mut decoder).await? {
                    BodyFrame::Data(data) => {
                        if let Some(tx) = &sender {
                            if !tx.send(data).await {
                                trace!("callback dropped its body stream, draining");
                                sender = None;
                            }
                        }
                    }
                    BodyFrame::End(end) => return Ok::<BodyEnd, Error>(end),
                }
            }
        };
        let call = service.handle(request);

        let (end, decision) = tokio::join!(feed, call);
        let end = end?;
        if !end.trailers.is_empty() {
            trace!(count = end.trailers.len(), "discarding request body trailers");
        }
        decision.map_err(Error::Service)
    }

    async fn finish(&mut self, decision: Decision, entry: &ServiceEntry) -> Result<()> {
        match decision {
            Decision::NoModification => {
                self.write_response(Response::no_content(), Some(&entry.options))
                    .await
            }
            Decision::Respond(response) => {
                self.write_response(response, Some(&entry.options)).await
            }
            Decision::Continue => Err(Error::Service(
                "callback requested continuation without an outstanding preview".into(),
            )),
        }
    }

    /// Encode and send a response: head first, then the body stream chunk by
    /// chunk, flushing as the write buffer fills.
    async fn write_response(
        &mut self,
        mut response: Response,
        options: Option<&ServiceOptions>,
    ) -> Result<()> {
        if let Some(options) = options {
            if !response.status().is_informational() {
                response.ensure_istag(options.istag());
            }
        }
        let body = response.take_body();
        encode::encode_head(&response, body.is_some(), self.conn.write_buf())?;
        trace!(status = %response.status(), "response head staged");
        if let Some(mut body) = body {
            while let Some(chunk) = body.data().await {
                encode::write_chunk(self.conn.write_buf(), &chunk);
                if self.conn.write_buf().len() >= FLUSH_WATERMARK {
                    self.conn.flush().await?;
                }
            }
            encode::write_final_chunk(self.conn.write_buf(), None);
        }
        self.conn.flush().await
    }
}
