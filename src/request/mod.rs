//! The dual-mode request handle.
//!
//! [`request`] (or [`RequestHandle::create`]) starts the exchange right away, on a spawned
//! task, and hands back a [`RequestHandle`]. The handle is two things at once:
//!
//! - a sink for the request body ([`AsyncWrite`], [`Sink<Bytes>`] and
//!   [`RequestHandle::write`]), when the request was created with
//!   [`RequestOptions::deferred`],
//! - a [`Future`] which resolves with the [`Response`] once its headers arrive.
//!
//! Awaiting a handle which is still writable ends the body first, so the common case needs
//! no explicit [`finish`](RequestHandle::finish):
//!
//! ```no_run
//! # async fn demo() -> Result<(), courier::Error> {
//! use courier::{request, Method, RequestOptions};
//!
//! let mut upload = request(
//!     "http://localhost:8080/upload",
//!     RequestOptions::new().method(Method::Put).deferred(true),
//! )?;
//! upload.write("first chunk, ").await?;
//! upload.write("second chunk").await?;
//! let response = upload.await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```
//!
//! For full duplex exchanges, split the handle with [`RequestHandle::into_parts`] and keep
//! writing while the response future is polled elsewhere.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_util::Sink;
use tokio::io::AsyncWrite;
use tokio::sync::watch;
use tracing::Instrument as _;

use crate::body::RequestBody;
use crate::response::Response;
use crate::timeout::TimeoutFuture;
use crate::Error;

mod exchange;
mod future;
mod options;
mod writer;

use self::exchange::Exchange;
pub use self::future::{AbortHandle, Finalized, ResponseFuture};
pub use self::options::{Descriptor, Method, RequestOptions};
pub use self::writer::BodyWriter;

/// Start a request to `url`.
///
/// Construction errors (a malformed URL, an invalid header, an unsupported scheme, a JSON
/// body which failed to serialize) are returned here. Everything after that is reported by
/// awaiting the returned handle. Must be called from within a tokio runtime.
pub fn request(url: &str, options: RequestOptions) -> Result<RequestHandle, Error> {
    Descriptor::new(url, options).map(RequestHandle::create)
}

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, and still accepting body chunks. Nothing was written yet.
    Open,

    /// At least one chunk was written through the handle.
    Writable,

    /// The end of the body was signalled. No more chunks are accepted.
    Finalizing,

    /// The outcome was delivered.
    Settled,
}

enum State {
    Open(BodyWriter),
    Writable(BodyWriter),
    Finalizing,
    Settled,
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            State::Open(_) => Phase::Open,
            State::Writable(_) => Phase::Writable,
            State::Finalizing => Phase::Finalizing,
            State::Settled => Phase::Settled,
        }
    }
}

/// A request in flight: a body sink and a future of the [`Response`].
///
/// Dropping the handle before it settles aborts the exchange.
pub struct RequestHandle {
    state: State,
    response: ResponseFuture,
    finalized: watch::Receiver<bool>,
}

impl RequestHandle {
    /// Spawn the exchange described by `descriptor`.
    ///
    /// The connection is opened immediately. Unless the request is deferred, the body
    /// (fixed, streamed, or empty) is already complete and the handle starts out in
    /// [`Phase::Finalizing`]. The timeout starts counting here.
    pub fn create(descriptor: Descriptor) -> Self {
        let Descriptor {
            target,
            method,
            headers,
            body,
            timeout,
            agent,
            deferred,
        } = descriptor;

        let (state, tail) = if deferred {
            let (writer, rx) = writer::channel();
            (State::Open(writer), Some(rx))
        } else {
            (State::Finalizing, None)
        };
        let (body, finalized) = RequestBody::new(body, tail);

        let span = tracing::debug_span!("request", %method, uri = %target);
        let exchange = Exchange {
            target,
            method,
            headers,
            agent: agent.agent(),
        };

        let task = tokio::spawn(TimeoutFuture::new(exchange.send(body), timeout).instrument(span));

        Self {
            state,
            response: ResponseFuture::new(task),
            finalized,
        }
    }

    /// The current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Send one chunk of the request body.
    ///
    /// Fails with [`Error::BodyClosed`] once the body was finished, or if the request was
    /// not deferred.
    pub async fn write<B: Into<Bytes>>(&mut self, chunk: B) -> Result<(), Error> {
        let writer = self.writer().ok_or(Error::BodyClosed)?;
        writer.write(chunk).await?;
        self.mark_written();
        Ok(())
    }

    /// End the request body.
    ///
    /// The returned future resolves once the connection has consumed the end of the body.
    /// Calling this again returns another future observing the same completion.
    pub fn finish(&mut self) -> Finalized {
        self.finalize();
        Finalized::new(self.finalized.clone())
    }

    /// Abort the exchange. Awaiting the handle then yields [`Error::Aborted`].
    ///
    /// Has no effect once the handle has settled.
    pub fn abort(&self) {
        self.response.abort();
    }

    /// A handle which aborts the exchange from elsewhere.
    pub fn abort_handle(&self) -> AbortHandle {
        self.response.abort_handle()
    }

    /// Split into the body writer and the response future.
    ///
    /// If the body is already complete, the writer rejects every write with
    /// [`Error::BodyClosed`].
    pub fn into_parts(self) -> (BodyWriter, ResponseFuture) {
        let writer = match self.state {
            State::Open(writer) | State::Writable(writer) => writer,
            State::Finalizing | State::Settled => BodyWriter::closed(),
        };
        (writer, self.response)
    }

    fn writer(&mut self) -> Option<&mut BodyWriter> {
        match &mut self.state {
            State::Open(writer) | State::Writable(writer) => Some(writer),
            State::Finalizing | State::Settled => None,
        }
    }

    fn mark_written(&mut self) {
        if let State::Open(_) = self.state {
            if let State::Open(writer) = std::mem::replace(&mut self.state, State::Finalizing) {
                self.state = State::Writable(writer);
            }
        }
    }

    fn finalize(&mut self) {
        if let Some(writer) = self.writer() {
            writer.finish();
            self.state = State::Finalizing;
        }
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("phase", &self.phase())
            .finish()
    }
}

impl Future for RequestHandle {
    type Output = Result<Response, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let State::Settled = this.state {
            return Poll::Ready(Err(Error::Settled));
        }

        // Nobody else can write while the handle is being awaited.
        this.finalize();

        let outcome = ready!(Pin::new(&mut this.response).poll(cx));
        this.state = State::Settled;
        Poll::Ready(outcome)
    }
}

impl AsyncWrite for RequestHandle {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        let this = self.get_mut();
        let writer = this.writer().ok_or(Error::BodyClosed)?;
        let written = ready!(Pin::new(writer).poll_write(cx, buf))?;
        this.mark_written();
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        self.get_mut().finalize();
        Poll::Ready(Ok(()))
    }
}

impl Sink<Bytes> for RequestHandle {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let writer = self.get_mut().writer().ok_or(Error::BodyClosed)?;
        Pin::new(writer).poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        let this = self.get_mut();
        let writer = this.writer().ok_or(Error::BodyClosed)?;
        Pin::new(writer).start_send(item)?;
        this.mark_written();
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().finalize();
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::SinkExt as _;
    use http::Uri;
    use static_assertions::assert_impl_all;
    use tokio::io::AsyncWriteExt as _;

    use super::*;
    use crate::transport::{Agent, Stream};

    assert_impl_all!(RequestHandle: Future, AsyncWrite, Sink<Bytes>, Send, Unpin);
    assert_impl_all!(ResponseFuture: Future, Send, Unpin);
    assert_impl_all!(Finalized: Future, Send);

    /// An agent which never finishes connecting.
    fn stalled() -> Agent {
        Agent::new(tower::service_fn(|_: Uri| {
            std::future::pending::<Result<Stream, io::Error>>()
        }))
    }

    fn options() -> RequestOptions {
        RequestOptions::new().agent(stalled())
    }

    #[tokio::test]
    async fn deferred_lifecycle() {
        let mut handle = request("http://stalled.test/", options().deferred(true)).unwrap();
        assert_eq!(handle.phase(), Phase::Open);

        handle.write("one").await.unwrap();
        assert_eq!(handle.phase(), Phase::Writable);

        handle.write_all(b"two").await.unwrap();
        handle.send(Bytes::from_static(b"three")).await.unwrap();

        let _finalized = handle.finish();
        assert_eq!(handle.phase(), Phase::Finalizing);
        assert!(matches!(handle.write("late").await, Err(Error::BodyClosed)));

        handle.abort();
        let error = (&mut handle).await.unwrap_err();
        assert!(error.is_aborted());
        assert_eq!(handle.phase(), Phase::Settled);

        assert!(matches!((&mut handle).await, Err(Error::Settled)));
    }

    #[tokio::test]
    async fn immediate_mode_is_finalizing() {
        let mut handle = request("http://stalled.test/", options().body("fixed")).unwrap();
        assert_eq!(handle.phase(), Phase::Finalizing);
        assert!(matches!(handle.write("more").await, Err(Error::BodyClosed)));

        let (mut writer, response) = handle.into_parts();
        assert!(writer.is_closed());
        assert!(matches!(writer.write("more").await, Err(Error::BodyClosed)));
        response.abort();
        assert!(response.await.unwrap_err().is_aborted());
    }

    #[tokio::test]
    async fn await_finalizes_implicitly() {
        let mut handle = request(
            "http://stalled.test/",
            options().deferred(true).timeout(Duration::from_millis(20)),
        )
        .unwrap();
        handle.write("partial").await.unwrap();

        let error = (&mut handle).await.unwrap_err();
        assert!(error.is_timeout());
        assert_eq!(error.to_string(), "request timed out after 20ms");
        assert_eq!(handle.phase(), Phase::Settled);
    }

    #[tokio::test]
    async fn finalize_incomplete_when_exchange_ends() {
        let mut handle = request(
            "http://stalled.test/",
            options().deferred(true).timeout(Duration::from_millis(10)),
        )
        .unwrap();
        let finalized = handle.finish();
        assert!(matches!(finalized.await, Err(Error::Incomplete)));
        assert!(handle.await.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn empty_body_never_sent_is_incomplete() {
        let mut handle = request(
            "http://stalled.test/",
            options().timeout(Duration::from_millis(10)),
        )
        .unwrap();
        assert_eq!(handle.phase(), Phase::Finalizing);

        let finalized = handle.finish();
        assert!(handle.await.unwrap_err().is_timeout());
        assert!(matches!(finalized.await, Err(Error::Incomplete)));
    }

    #[tokio::test]
    async fn abort_handle_from_elsewhere() {
        let handle = request("http://stalled.test/", options()).unwrap();
        let abort = handle.abort_handle();
        tokio::spawn(async move { abort.abort() });
        assert!(handle.await.unwrap_err().is_aborted());
    }
}
