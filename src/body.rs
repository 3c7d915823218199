//! Outgoing request bodies.
//!
//! [`BodySource`] describes what the caller hands over when the request is created: nothing,
//! a fixed buffer, or a stream. The body actually polled by hyper is a [`RequestBody`]: the
//! source first, then (for deferred requests) whatever is written through the request
//! handle afterwards. When hyper has consumed the end of that body, the request is finalized.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt as _;
use http_body::{Body as _, Frame, SizeHint};
use http_body_util::Full;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt as _};
use tokio::sync::watch;

use crate::BoxError;

type BoxStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

pub(crate) type Receiver = futures_channel::mpsc::Receiver<Result<Bytes, BoxError>>;

const READ_CHUNK: usize = 8 * 1024;

/// Where a request body comes from.
///
/// Sources can be created from [`Bytes`], [`String`], `&'static str` or `Vec<u8>` using
/// [`From`], or from any stream or reader with [`BodySource::stream`] and
/// [`BodySource::reader`].
pub struct BodySource {
    inner: InnerSource,
}

enum InnerSource {
    Empty,
    Full(Bytes),
    Stream(BoxStream),
}

impl BodySource {
    /// No body.
    pub fn empty() -> Self {
        Self {
            inner: InnerSource::Empty,
        }
    }

    /// A fixed body.
    pub fn full<D>(data: D) -> Self
    where
        D: Into<Bytes>,
    {
        let data = data.into();
        if data.is_empty() {
            return Self::empty();
        }

        Self {
            inner: InnerSource::Full(data),
        }
    }

    /// A body streamed from `stream`. An error from the stream fails the request.
    pub fn stream<S, D, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<D, E>> + Send + 'static,
        D: Into<Bytes>,
        E: Into<BoxError>,
    {
        let stream = stream.map(|item| item.map(Into::into).map_err(Into::into));
        Self {
            inner: InnerSource::Stream(Box::pin(stream)),
        }
    }

    /// A body read from `reader` until EOF. A read error fails the request.
    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        let stream = futures_util::stream::unfold(Some(Box::pin(reader)), |reader| async move {
            let mut reader = reader?;
            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            match reader.read_buf(&mut buf).await {
                Ok(0) => None,
                Ok(_) => Some((Ok(buf.freeze()), Some(reader))),
                Err(error) => Some((Err(error), None)),
            }
        });
        Self::stream(stream)
    }

    /// True if there is no body.
    pub fn is_empty(&self) -> bool {
        matches!(self.inner, InnerSource::Empty)
    }

    /// The exact length of the body, when known up front.
    pub fn exact_len(&self) -> Option<u64> {
        match &self.inner {
            InnerSource::Empty => Some(0),
            InnerSource::Full(data) => Some(data.len() as u64),
            InnerSource::Stream(_) => None,
        }
    }
}

impl Default for BodySource {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for BodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            InnerSource::Empty => f.debug_struct("Empty").finish(),
            InnerSource::Full(data) => f.debug_struct("Full").field("len", &data.len()).finish(),
            InnerSource::Stream(_) => f.debug_struct("Stream").finish(),
        }
    }
}

impl From<Bytes> for BodySource {
    fn from(body: Bytes) -> Self {
        Self::full(body)
    }
}

impl From<String> for BodySource {
    fn from(body: String) -> Self {
        Self::full(body)
    }
}

impl From<&'static str> for BodySource {
    fn from(body: &'static str) -> Self {
        Self::full(body)
    }
}

impl From<Vec<u8>> for BodySource {
    fn from(body: Vec<u8>) -> Self {
        Self::full(body)
    }
}

/// Marks a failure of the request body source, as opposed to the connection.
///
/// hyper only lends the body error back by reference, so the source error itself is kept
/// in the body's [`Progress`] and this marker only carries its message.
#[derive(Debug)]
pub(crate) struct UploadFailed(String);

impl fmt::Display for UploadFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request body source failed: {}", self.0)
    }
}

impl std::error::Error for UploadFailed {}

/// Progress of a [`RequestBody`], shared with the exchange sending it.
#[derive(Debug, Clone)]
pub(crate) struct Progress {
    done: Arc<watch::Sender<bool>>,
    failure: Arc<Mutex<Option<BoxError>>>,
}

impl Progress {
    /// Signal that the whole body reached the connection.
    pub(crate) fn complete(&self) {
        if !*self.done.borrow() {
            tracing::trace!("request body complete");
            self.done.send_replace(true);
        }
    }

    /// The error which failed the body source, if any.
    pub(crate) fn take_failure(&self) -> Option<BoxError> {
        self.failure.lock().take()
    }

    fn fail(&self, error: BoxError) -> BoxError {
        let marker = UploadFailed(error.to_string());
        *self.failure.lock() = Some(error);
        marker.into()
    }
}

enum Head {
    Empty,
    Full(Full<Bytes>),
    Stream(BoxStream),
}

/// The request body handed to hyper.
///
/// Yields the source first, then the frames written through the request handle (if the
/// request was deferred). Reports completion through its [`Progress`] once the end of the
/// body was consumed by the connection. A body which is empty from the start is never polled,
/// so the exchange completes it once the request went out.
pub(crate) struct RequestBody {
    head: Head,
    tail: Option<Receiver>,
    progress: Progress,
}

impl RequestBody {
    pub(crate) fn new(source: BodySource, tail: Option<Receiver>) -> (Self, watch::Receiver<bool>) {
        let head = match source.inner {
            InnerSource::Empty => Head::Empty,
            InnerSource::Full(data) => Head::Full(Full::new(data)),
            InnerSource::Stream(stream) => Head::Stream(stream),
        };

        let (done, rx) = watch::channel(false);
        let progress = Progress {
            done: Arc::new(done),
            failure: Arc::new(Mutex::new(None)),
        };
        (Self { head, tail, progress }, rx)
    }

    pub(crate) fn progress(&self) -> Progress {
        self.progress.clone()
    }

    fn poll_head(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let progress = &self.progress;
        let polled: Option<Result<Frame<Bytes>, BoxError>> = match &mut self.head {
            Head::Empty => return Poll::Ready(None),
            Head::Full(body) => ready!(Pin::new(body).poll_frame(cx))
                .map(|frame| frame.map_err(|never| match never {})),
            Head::Stream(stream) => ready!(stream.as_mut().poll_next(cx))
                .map(|item| item.map(Frame::data).map_err(|error| progress.fail(error))),
        };

        if polled.is_none() {
            self.head = Head::Empty;
        }
        Poll::Ready(polled)
    }

    fn poll_tail(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let Some(rx) = self.tail.as_mut() else {
            return Poll::Ready(None);
        };

        let progress = &self.progress;
        let polled: Option<Result<Frame<Bytes>, BoxError>> = ready!(rx.poll_next_unpin(cx))
            .map(|item| item.map(Frame::data).map_err(|error| progress.fail(error)));

        if polled.is_none() {
            self.tail = None;
        }
        Poll::Ready(polled)
    }
}

impl http_body::Body for RequestBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        let frame = match ready!(this.poll_head(cx)) {
            Some(frame) => Some(frame),
            None => ready!(this.poll_tail(cx)),
        };

        match &frame {
            Some(Ok(_)) if this.is_end_stream() => this.progress.complete(),
            None => this.progress.complete(),
            _ => {}
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        let head = match &self.head {
            Head::Empty => true,
            Head::Full(body) => body.is_end_stream(),
            Head::Stream(_) => false,
        };
        head && self.tail.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        if self.tail.is_some() {
            return SizeHint::default();
        }

        match &self.head {
            Head::Empty => SizeHint::with_exact(0),
            Head::Full(body) => body.size_hint(),
            Head::Stream(_) => SizeHint::default(),
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = match &self.head {
            Head::Empty => "Empty",
            Head::Full(_) => "Full",
            Head::Stream(_) => "Stream",
        };
        f.debug_struct("RequestBody")
            .field("head", &head)
            .field("writable", &self.tail.is_some())
            .finish()
    }
}
