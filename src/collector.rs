//! Collect a byte stream into a single parsed value.
//!
//! A [`Collector`] is a write destination and a future at the same time. Chunks written
//! into it are appended, in order, to an in-memory buffer. Nothing is parsed until the
//! stream ends: at that point the parser runs exactly once over the concatenated bytes and
//! the collector resolves with its result.
//!
//! The whole stream is held in memory before anything is produced. Collectors are meant
//! for bodies the caller knows to be small; stream larger bodies directly instead (see
//! [`Response::chunk`][crate::response::Response::chunk] and
//! [`Response::pipe`][crate::response::Response::pipe]).
//!
//! ```
//! # use tokio::io::AsyncWriteExt as _;
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mut collector = courier::collector::text();
//! collector.write_all(b"hello, ").await?;
//! collector.write_all(b"world").await?;
//! collector.shutdown().await?;
//! assert_eq!(collector.await?, "hello, world");
//! # Ok(())
//! # }
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::{pin, Pin};
use std::task::{Context, Poll, Waker};

use bytes::{Bytes, BytesMut};
use encoding_rs::Encoding;
use http_body_util::BodyExt as _;
use serde::de::DeserializeOwned;

use crate::{BoxError, Error};

type Parser<T> = Box<dyn FnOnce(Bytes) -> Result<T, BoxError> + Send>;

enum Slot<T> {
    Pending,
    Settled(Result<T, Error>),
    Taken,
}

/// Buffers a byte stream and settles once with a parsed value.
///
/// Write with [`AsyncWrite`](tokio::io::AsyncWrite), [`Sink<Bytes>`](futures_util::Sink)
/// or [`Collector::write`]; end the stream with a shutdown, a close, or
/// [`Collector::finish`]; then await the collector (by value or by `&mut`).
///
/// Errors:
/// - a parser failure resolves to [`Error::Parse`],
/// - an upstream failure passed to [`Collector::fail`] resolves to [`Error::BodyRead`]
///   without running the parser,
/// - writing after settlement, or polling after the result was taken, yields
///   [`Error::Consumed`].
pub struct Collector<T> {
    chunks: Vec<Bytes>,
    len: usize,
    parser: Option<Parser<T>>,
    slot: Slot<T>,
    waker: Option<Waker>,
}

// No field is ever pinned.
impl<T> Unpin for Collector<T> {}

impl<T> fmt::Debug for Collector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("len", &self.len)
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T> Collector<T> {
    /// Create a collector which applies `parser` to the complete stream.
    pub fn new<F, E>(parser: F) -> Self
    where
        F: FnOnce(Bytes) -> Result<T, E> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            chunks: Vec::new(),
            len: 0,
            parser: Some(Box::new(move |bytes| parser(bytes).map_err(Into::into))),
            slot: Slot::Pending,
            waker: None,
        }
    }

    /// Number of bytes buffered so far.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if nothing has been buffered.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True once the stream ended or failed.
    pub fn is_settled(&self) -> bool {
        !matches!(self.slot, Slot::Pending)
    }

    /// Append a chunk.
    pub fn write(&mut self, chunk: Bytes) -> Result<(), Error> {
        if self.is_settled() {
            return Err(Error::Consumed);
        }

        if !chunk.is_empty() {
            self.len += chunk.len();
            self.chunks.push(chunk);
        }
        Ok(())
    }

    /// End the stream, running the parser over everything written.
    ///
    /// Does nothing if the collector already settled.
    pub fn finish(&mut self) {
        let Some(parser) = self.parser.take().filter(|_| !self.is_settled()) else {
            return;
        };

        let bytes = self.concat();
        tracing::trace!(len = bytes.len(), "collected stream");
        let result = parser(bytes).map_err(Error::Parse);
        self.settle(result);
    }

    /// Fail the stream. The parser is never run and buffered bytes are discarded.
    ///
    /// Does nothing if the collector already settled.
    pub fn fail<E: Into<BoxError>>(&mut self, error: E) {
        if self.is_settled() {
            return;
        }

        self.parser = None;
        self.settle(Err(Error::BodyRead(error.into())));
    }

    /// Drain `body` into this collector and await the result.
    ///
    /// A body error fails the collector; the body is dropped before the error is returned.
    pub async fn drain<B>(mut self, body: B) -> Result<T, Error>
    where
        B: http_body::Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        {
            let mut body = pin!(body);
            while let Some(frame) = body.frame().await {
                match frame {
                    Ok(frame) => {
                        if let Ok(data) = frame.into_data() {
                            self.write(data)?;
                        }
                    }
                    Err(error) => {
                        let error: BoxError = error.into();
                        tracing::debug!(%error, "stream failed while collecting");
                        self.fail(error);
                        break;
                    }
                }
            }
        }

        self.finish();
        self.await
    }

    fn concat(&mut self) -> Bytes {
        let chunks = std::mem::take(&mut self.chunks);
        if chunks.len() == 1 {
            return chunks.into_iter().next().unwrap_or_default();
        }

        let mut buffer = BytesMut::with_capacity(self.len);
        for chunk in chunks {
            buffer.extend_from_slice(&chunk);
        }
        buffer.freeze()
    }

    fn settle(&mut self, result: Result<T, Error>) {
        self.chunks = Vec::new();
        self.slot = Slot::Settled(result);
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

impl<T> Future for Collector<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.slot, Slot::Taken) {
            Slot::Settled(result) => Poll::Ready(result),
            Slot::Taken => Poll::Ready(Err(Error::Consumed)),
            Slot::Pending => {
                this.slot = Slot::Pending;
                this.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> tokio::io::AsyncWrite for Collector<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        let result = self
            .get_mut()
            .write(Bytes::copy_from_slice(buf))
            .map(|()| buf.len())
            .map_err(io::Error::from);
        Poll::Ready(result)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        self.get_mut().finish();
        Poll::Ready(Ok(()))
    }
}

impl<T> futures_util::Sink<Bytes> for Collector<T> {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.is_settled() {
            Poll::Ready(Err(Error::Consumed))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        self.get_mut().write(item)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().finish();
        Poll::Ready(Ok(()))
    }
}

/// Collect a stream and parse it as JSON.
pub fn json<T>() -> Collector<T>
where
    T: DeserializeOwned,
{
    Collector::new(|bytes: Bytes| serde_json::from_slice::<T>(&bytes))
}

/// Collect a stream and decode it as UTF-8, replacing invalid sequences.
pub fn text() -> Collector<String> {
    Collector::new(|bytes: Bytes| Ok::<_, Infallible>(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Collect a stream and decode it with `encoding`, replacing malformed sequences.
///
/// A byte order mark, if present, takes precedence over `encoding`.
pub fn text_with_encoding(encoding: &'static Encoding) -> Collector<String> {
    Collector::new(move |bytes: Bytes| {
        let (text, _, _) = encoding.decode(&bytes);
        Ok::<_, Infallible>(text.into_owned())
    })
}

/// Collect a stream into one contiguous buffer.
pub fn buffer() -> Collector<Bytes> {
    Collector::new(Ok::<_, Infallible>)
}
