use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_channel::mpsc;
use futures_util::{Sink, SinkExt as _};
use tokio::io::AsyncWrite;

use crate::body::Receiver;
use crate::{BoxError, Error};

/// Chunks buffered between the writer and the connection before writes wait.
const CAPACITY: usize = 16;

pub(super) fn channel() -> (BodyWriter, Receiver) {
    let (tx, rx) = mpsc::channel(CAPACITY);
    (
        BodyWriter {
            tx: Some(tx),
            written: 0,
        },
        rx,
    )
}

/// The writable half of a request.
///
/// Chunks are handed to the connection through a bounded channel, so writes wait while
/// the connection is behind. Closing the writer (by [`finish`](BodyWriter::finish),
/// `poll_shutdown` or `poll_close`) ends the request body.
#[derive(Debug)]
pub struct BodyWriter {
    tx: Option<mpsc::Sender<Result<Bytes, BoxError>>>,
    written: u64,
}

impl BodyWriter {
    /// A writer whose body is already complete. Every write fails with
    /// [`Error::BodyClosed`].
    pub(super) fn closed() -> Self {
        Self {
            tx: None,
            written: 0,
        }
    }

    /// Send one chunk of the request body.
    pub async fn write<B: Into<Bytes>>(&mut self, chunk: B) -> Result<(), Error> {
        let chunk = chunk.into();
        let len = chunk.len() as u64;
        let tx = self.tx.as_mut().ok_or(Error::BodyClosed)?;
        tx.send(Ok(chunk)).await.map_err(|_| Error::Incomplete)?;
        self.written += len;
        Ok(())
    }

    /// End the request body. Further calls have no effect.
    pub fn finish(&mut self) {
        if let Some(mut tx) = self.tx.take() {
            tracing::trace!(written = self.written, "request body finished");
            tx.close_channel();
        }
    }

    /// Fail the request body with `error`. The exchange settles with
    /// [`Error::Upload`].
    pub async fn abort<E: Into<BoxError>>(mut self, error: E) {
        if let Some(mut tx) = self.tx.take() {
            let _ = tx.send(Err(error.into())).await;
        }
    }

    /// True once the body was finished, or the connection stopped reading it.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn poll_reserve(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        let tx = self.tx.as_mut().ok_or(Error::BodyClosed)?;
        ready!(tx.poll_ready(cx)).map_err(|_| Error::Incomplete)?;
        Poll::Ready(Ok(()))
    }

    fn send_reserved(&mut self, chunk: Bytes) -> Result<(), Error> {
        let tx = self.tx.as_mut().ok_or(Error::BodyClosed)?;
        let len = chunk.len() as u64;
        tx.start_send(Ok(chunk)).map_err(|_| Error::Incomplete)?;
        self.written += len;
        Ok(())
    }
}

impl Sink<Bytes> for BodyWriter {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().poll_reserve(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        self.get_mut().send_reserved(item)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().finish();
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for BodyWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        let this = self.get_mut();
        ready!(this.poll_reserve(cx))?;
        this.send_reserved(Bytes::copy_from_slice(buf))?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        self.get_mut().finish();
        Poll::Ready(Ok(()))
    }
}
