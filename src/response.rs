//! Responses.
//!
//! A [`Response`] is available as soon as the headers arrive. Its status, status message
//! and headers are fixed at that point; the body is still on the wire and can be consumed
//! exactly once, either:
//!
//! - as raw chunks, with [`Response::chunk`], [`Response::pipe`], [`Response::into_stream`]
//!   or through [`AsyncRead`],
//! - or as one parsed value, with [`Response::json`], [`Response::text`] or
//!   [`Response::buffer`], which buffer the whole body through a
//!   [`Collector`](crate::collector::Collector).
//!
//! Consuming the body twice fails with [`Error::Consumed`]. Nothing is memoized.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf as _, Bytes};
use encoding_rs::Encoding;
use futures_core::Stream;
use http::{HeaderMap, StatusCode, Version};
use http_body::{Body as _, Frame, SizeHint};
use http_body_util::BodyExt as _;
use hyper::body::Incoming;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt as _, ReadBuf};

use crate::collector::{self, Collector};
use crate::Error;

#[derive(Debug)]
enum BodyState {
    Streaming(Incoming),
    Ended,
    Consumed,
}

/// The response to a request: status and headers, and a one-shot body.
pub struct Response {
    status: StatusCode,
    message: String,
    version: Version,
    headers: HeaderMap,
    body: BodyState,
    pending: Bytes,
}

impl Response {
    pub(crate) fn new(response: http::Response<Incoming>) -> Self {
        let (parts, body) = response.into_parts();

        let message = match parts.extensions.get::<hyper::ext::ReasonPhrase>() {
            Some(reason) => String::from_utf8_lossy(reason.as_bytes()).into_owned(),
            None => parts.status.canonical_reason().unwrap_or_default().to_owned(),
        };

        Self {
            status: parts.status,
            message,
            version: parts.version,
            headers: parts.headers,
            body: BodyState::Streaming(body),
            pending: Bytes::new(),
        }
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The numeric status code.
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// The status message sent by the server, or the standard reason for the status.
    /// Empty if neither exists.
    pub fn status_message(&self) -> &str {
        &self.message
    }

    /// The HTTP version of the response.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Response headers. Lookups ignore case; repeated headers keep their order.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// True once the body was read to the end or handed to a consumer.
    pub fn is_consumed(&self) -> bool {
        !matches!(self.body, BodyState::Streaming(_))
    }

    /// Collect the body into one buffer.
    pub async fn buffer(&mut self) -> Result<Bytes, Error> {
        self.collect(collector::buffer()).await
    }

    /// Collect the body and decode it as UTF-8, replacing invalid sequences.
    pub async fn text(&mut self) -> Result<String, Error> {
        self.collect(collector::text()).await
    }

    /// Collect the body and decode it with `encoding`.
    pub async fn text_with_encoding(
        &mut self,
        encoding: &'static Encoding,
    ) -> Result<String, Error> {
        self.collect(collector::text_with_encoding(encoding)).await
    }

    /// Collect the body and parse it as JSON.
    ///
    /// Malformed JSON fails with [`Error::Parse`]; a failure reading the body fails with
    /// [`Error::BodyRead`].
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T, Error> {
        self.collect(collector::json()).await
    }

    /// Drain the body into `collector` and await its result.
    ///
    /// If reading the body fails, the body is dropped and buffered data is discarded.
    pub async fn collect<T>(&mut self, mut collector: Collector<T>) -> Result<T, Error> {
        let body = self.take_body()?;

        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            collector.write(pending)?;
        }

        collector.drain(body).await
    }

    /// The next chunk of the body, or `None` at the end.
    ///
    /// Fails with [`Error::Consumed`] if the body was handed to a consumer.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, Error> {
        if !self.pending.is_empty() {
            return Ok(Some(std::mem::take(&mut self.pending)));
        }

        let body = match &mut self.body {
            BodyState::Streaming(body) => body,
            BodyState::Ended => return Ok(None),
            BodyState::Consumed => return Err(Error::Consumed),
        };

        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        return Ok(Some(data));
                    }
                }
                Some(Err(error)) => {
                    tracing::debug!(%error, "response body failed");
                    self.body = BodyState::Consumed;
                    return Err(Error::BodyRead(error.into()));
                }
                None => {
                    self.body = BodyState::Ended;
                    return Ok(None);
                }
            }
        }
    }

    /// Copy the rest of the body into `writer`, returning the number of bytes copied.
    ///
    /// Read failures are [`Error::BodyRead`], write failures [`Error::Write`].
    pub async fn pipe<W>(&mut self, writer: &mut W) -> Result<u64, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut body = self.take_body()?;
        let mut copied = 0u64;

        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            writer.write_all(&pending).await.map_err(Error::Write)?;
            copied += pending.len() as u64;
        }

        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(|error| Error::BodyRead(error.into()))?;
            if let Ok(data) = frame.into_data() {
                writer.write_all(&data).await.map_err(Error::Write)?;
                copied += data.len() as u64;
            }
        }

        writer.flush().await.map_err(Error::Write)?;
        tracing::trace!(copied, "piped response body");
        Ok(copied)
    }

    /// The body as a stream of chunks. It is also an [`http_body::Body`].
    ///
    /// If the body was already consumed, the stream yields [`Error::Consumed`] once.
    pub fn into_stream(mut self) -> BodyStream {
        let pending = std::mem::take(&mut self.pending);
        match self.take_body() {
            Ok(body) => BodyStream {
                pending,
                body: Some(body),
                error: None,
            },
            Err(error) => BodyStream {
                pending,
                body: None,
                error: Some(error),
            },
        }
    }

    fn take_body(&mut self) -> Result<Incoming, Error> {
        match std::mem::replace(&mut self.body, BodyState::Consumed) {
            BodyState::Streaming(body) => Ok(body),
            BodyState::Ended | BodyState::Consumed => Err(Error::Consumed),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

impl AsyncRead for Response {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        while this.pending.is_empty() {
            let body = match &mut this.body {
                BodyState::Streaming(body) => body,
                BodyState::Ended => return Poll::Ready(Ok(())),
                BodyState::Consumed => return Poll::Ready(Err(Error::Consumed.into())),
            };

            match ready!(Pin::new(body).poll_frame(cx)) {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        this.pending = data;
                    }
                }
                Some(Err(error)) => {
                    this.body = BodyState::Consumed;
                    return Poll::Ready(Err(Error::BodyRead(error.into()).into()));
                }
                None => {
                    this.body = BodyState::Ended;
                    return Poll::Ready(Ok(()));
                }
            }
        }

        let len = this.pending.len().min(buf.remaining());
        buf.put_slice(&this.pending[..len]);
        this.pending.advance(len);
        Poll::Ready(Ok(()))
    }
}

/// A response body as a stream of chunks.
///
/// Implements both [`Stream`] and [`http_body::Body`]. A read failure is yielded once, and
/// ends the stream.
#[derive(Debug)]
pub struct BodyStream {
    pending: Bytes,
    body: Option<Incoming>,
    error: Option<Error>,
}

impl BodyStream {
    fn poll_data(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, Error>>> {
        if !self.pending.is_empty() {
            return Poll::Ready(Some(Ok(std::mem::take(&mut self.pending))));
        }

        if let Some(error) = self.error.take() {
            return Poll::Ready(Some(Err(error)));
        }

        while let Some(body) = self.body.as_mut() {
            match ready!(Pin::new(body).poll_frame(cx)) {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        return Poll::Ready(Some(Ok(data)));
                    }
                }
                Some(Err(error)) => {
                    self.body = None;
                    return Poll::Ready(Some(Err(Error::BodyRead(error.into()))));
                }
                None => self.body = None,
            }
        }

        Poll::Ready(None)
    }
}

impl Stream for BodyStream {
    type Item = Result<Bytes, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_data(cx)
    }
}

impl http_body::Body for BodyStream {
    type Data = Bytes;
    type Error = Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.get_mut()
            .poll_data(cx)
            .map(|data| data.map(|data| data.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        self.pending.is_empty()
            && self.error.is_none()
            && self.body.as_ref().map_or(true, |body| body.is_end_stream())
    }

    fn size_hint(&self) -> SizeHint {
        let pending = self.pending.len() as u64;
        match &self.body {
            Some(body) => {
                let hint = body.size_hint();
                let mut sized = SizeHint::new();
                sized.set_lower(hint.lower() + pending);
                if let Some(upper) = hint.upper() {
                    sized.set_upper(upper + pending);
                }
                sized
            }
            None => SizeHint::with_exact(pending),
        }
    }
}
