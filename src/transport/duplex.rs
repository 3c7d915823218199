//! In-memory connections.
//!
//! [`pair`] creates a [`DuplexConnector`], which can back an [`Agent`](super::Agent), and
//! the [`DuplexIncoming`] side which hands each new connection to a server running in the
//! same process. Every connect creates a fresh [`tokio::io::duplex`] pair.
//!
//! The incoming side must be accepting for connects to make progress beyond the
//! listener's queue:
//! ```
//! # use courier::transport::duplex;
//! # use courier::transport::Agent;
//! # async fn demo() {
//! let (connector, mut incoming) = duplex::pair(1024);
//! let agent = Agent::new(connector);
//!
//! tokio::spawn(async move {
//!     while let Some(stream) = incoming.accept().await {
//!         // serve `stream`
//! #       drop(stream);
//!     }
//! });
//! # }
//! ```

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::Uri;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use super::Stream;

const BACKLOG: usize = 32;

/// Create a connected connector / incoming pair. `max_buf_size` bounds each direction of
/// every connection.
pub fn pair(max_buf_size: usize) -> (DuplexConnector, DuplexIncoming) {
    let (tx, rx) = mpsc::channel(BACKLOG);
    (
        DuplexConnector { max_buf_size, tx },
        DuplexIncoming { rx },
    )
}

/// Client half: a connecting service for [`Agent::new`](super::Agent::new).
#[derive(Debug, Clone)]
pub struct DuplexConnector {
    max_buf_size: usize,
    tx: mpsc::Sender<DuplexStream>,
}

impl tower::Service<Uri> for DuplexConnector {
    type Response = Stream;
    type Error = io::Error;
    type Future = BoxFuture<'static, Result<Stream, io::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let tx = self.tx.clone();
        let max_buf_size = self.max_buf_size;
        Box::pin(async move {
            tracing::trace!(%uri, "duplex connect");
            let (client, server) = tokio::io::duplex(max_buf_size);
            tx.send(server).await.map_err(|_| {
                io::Error::new(io::ErrorKind::ConnectionRefused, "duplex listener closed")
            })?;
            Ok(Stream::new(client))
        })
    }
}

/// Server half: yields the server end of each new connection.
#[derive(Debug)]
pub struct DuplexIncoming {
    rx: mpsc::Receiver<DuplexStream>,
}

impl DuplexIncoming {
    /// Wait for the next connection. `None` once every connector was dropped.
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.rx.recv().await
    }
}

impl futures_core::Stream for DuplexIncoming {
    type Item = DuplexStream;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
