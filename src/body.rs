//! Message body handles.
//!
//! ICAP bodies are finite, forward-only and not seekable, so they are
//! modeled as a pull stream owned by exactly one component at a time: the
//! parser feeds it, the adaptation callback drains it, the encoder writes
//! it. Live bodies ride a bounded channel, which is what keeps the socket
//! reader from outrunning a slow consumer.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use tokio::sync::mpsc;

/// The body handed to an adaptation callback.
#[derive(Debug)]
pub enum BodyInput {
    /// No adaptation content: the request declared `null-body` or carried no
    /// encapsulated body at all.
    None,
    /// The preview prefix of the body. `complete` is true when the client
    /// terminated the preview with `ieof`, i.e. the whole body fit inside it.
    Preview { bytes: Bytes, complete: bool },
    /// The body (or the post-preview remainder) as a live stream.
    Stream(BodyStream),
}

impl BodyInput {
    pub fn is_none(&self) -> bool {
        matches!(self, BodyInput::None)
    }

    /// View any variant as a stream; `None` becomes an empty stream and a
    /// preview yields its buffered bytes once.
    pub fn into_stream(self) -> BodyStream {
        match self {
            BodyInput::None => BodyStream::empty(),
            BodyInput::Preview { bytes, .. } => BodyStream::from(bytes),
            BodyInput::Stream(stream) => stream,
        }
    }
}

/// A lazy, forward-only sequence of body chunks.
///
/// The stream is finite and cannot be restarted; once a chunk has been
/// pulled it is gone. Ownership is transferred, never shared.
#[derive(Debug)]
pub struct BodyStream {
    inner: Inner,
}

#[derive(Debug)]
enum Inner {
    Empty,
    Full(Option<Bytes>),
    Channel(mpsc::Receiver<Bytes>),
}

impl BodyStream {
    /// A stream that ends immediately.
    pub fn empty() -> Self {
        Self { inner: Inner::Empty }
    }

    /// A live stream fed by the connection task through a bounded channel.
    pub(crate) fn channel(capacity: usize) -> (BodySender, BodyStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            BodySender { tx },
            BodyStream {
                inner: Inner::Channel(rx),
            },
        )
    }

    /// Pull the next chunk, `None` at end of body.
    pub async fn data(&mut self) -> Option<Bytes> {
        match &mut self.inner {
            Inner::Empty => None,
            Inner::Full(slot) => slot.take().filter(|bytes| !bytes.is_empty()),
            Inner::Channel(rx) => rx.recv().await,
        }
    }

    /// Drain the stream into a single buffer.
    pub async fn collect(mut self) -> Bytes {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.data().await {
            out.extend_from_slice(&chunk);
        }
        out.freeze()
    }
}

impl Stream for BodyStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        match &mut self.inner {
            Inner::Empty => Poll::Ready(None),
            Inner::Full(slot) => Poll::Ready(slot.take().filter(|bytes| !bytes.is_empty())),
            Inner::Channel(rx) => rx.poll_recv(cx),
        }
    }
}

impl From<Bytes> for BodyStream {
    fn from(bytes: Bytes) -> Self {
        Self {
            inner: Inner::Full(Some(bytes)),
        }
    }
}

impl From<Vec<u8>> for BodyStream {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for BodyStream {
    fn from(text: String) -> Self {
        Bytes::from(text).into()
    }
}

impl From<&'static str> for BodyStream {
    fn from(text: &'static str) -> Self {
        Bytes::from_static(text.as_bytes()).into()
    }
}

/// Feeding half of a live body stream. Dropping it ends the stream.
#[derive(Debug)]
pub(crate) struct BodySender {
    tx: mpsc::Sender<Bytes>,
}

impl BodySender {
    /// Returns false once the consumer has dropped its end.
    pub(crate) async fn send(&self, data: Bytes) -> bool {
        self.tx.send(data).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_stream_ends_immediately() {
        let mut stream = BodyStream::empty();
        assert!(stream.data().await.is_none());
    }

    #[tokio::test]
    async fn full_stream_yields_once() {
        let mut stream = BodyStream::from("hello");
        assert_eq!(stream.data().await.unwrap(), "hello");
        assert!(stream.data().await.is_none());
    }

    #[tokio::test]
    async fn channel_stream_relays_and_ends_on_drop() {
        let (tx, mut stream) = BodyStream::channel(4);
        assert!(tx.send(Bytes::from_static(b"a")).await);
        assert!(tx.send(Bytes::from_static(b"bc")).await);
        drop(tx);
        assert_eq!(stream.data().await.unwrap(), "a");
        assert_eq!(stream.data().await.unwrap(), "bc");
        assert!(stream.data().await.is_none());
    }

    #[tokio::test]
    async fn sender_notices_dropped_consumer() {
        let (tx, stream) = BodyStream::channel(1);
        drop(stream);
        assert!(!tx.send(Bytes::from_static(b"a")).await);
    }

    #[tokio::test]
    async fn collect_concatenates() {
        let (tx, stream) = BodyStream::channel(4);
        let feeder = tokio::spawn(async move {
            tx.send(Bytes::from_static(b"Wiki")).await;
            tx.send(Bytes::from_static(b"pedia")).await;
        });
        assert_eq!(stream.collect().await, "Wikipedia");
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn input_into_stream() {
        assert!(BodyInput::None.into_stream().data().await.is_none());
        let preview = BodyInput::Preview {
            bytes: Bytes::from_static(b"abc"),
            complete: true,
        };
        assert_eq!(preview.into_stream().collect().await, "abc");
    }
}
