use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::response::Response;
use crate::Error;

/// Resolves with the response headers of a spawned exchange.
///
/// Dropping the future before it settles aborts the exchange.
#[derive(Debug)]
pub struct ResponseFuture {
    task: Option<JoinHandle<Result<Response, Error>>>,
}

impl ResponseFuture {
    pub(super) fn new(task: JoinHandle<Result<Response, Error>>) -> Self {
        Self { task: Some(task) }
    }

    /// True once the outcome was delivered.
    pub fn is_settled(&self) -> bool {
        self.task.is_none()
    }

    /// Abort the exchange. The future then resolves with [`Error::Aborted`], unless the
    /// exchange had already finished.
    pub fn abort(&self) {
        if let Some(task) = &self.task {
            tracing::debug!("aborting request");
            task.abort();
        }
    }

    /// A handle which can abort the exchange from elsewhere.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.task.as_ref().map(JoinHandle::abort_handle))
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(task) = this.task.as_mut() else {
            return Poll::Ready(Err(Error::Settled));
        };

        let joined = ready!(Pin::new(task).poll(cx));
        this.task = None;

        match joined {
            Ok(outcome) => Poll::Ready(outcome),
            Err(error) if error.is_cancelled() => Poll::Ready(Err(Error::Aborted)),
            Err(error) => std::panic::resume_unwind(error.into_panic()),
        }
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::trace!("response future dropped before settling");
            task.abort();
        }
    }
}

/// Aborts an exchange from outside of its request handle.
#[derive(Debug, Clone)]
pub struct AbortHandle(Option<tokio::task::AbortHandle>);

impl AbortHandle {
    /// Abort the exchange. Has no effect once it has settled.
    pub fn abort(&self) {
        if let Some(handle) = &self.0 {
            handle.abort();
        }
    }

    /// True once the exchange is no longer running.
    pub fn is_finished(&self) -> bool {
        self.0.as_ref().map_or(true, |handle| handle.is_finished())
    }
}

/// Resolves once the connection has consumed the end of the request body.
///
/// Resolves with [`Error::Incomplete`] if the exchange ended before that.
pub struct Finalized(BoxFuture<'static, Result<(), Error>>);

impl Finalized {
    pub(super) fn new(mut done: watch::Receiver<bool>) -> Self {
        Finalized(Box::pin(async move {
            loop {
                if *done.borrow_and_update() {
                    tracing::trace!("request body finalized");
                    return Ok(());
                }
                if done.changed().await.is_err() {
                    return Err(Error::Incomplete);
                }
            }
        }))
    }
}

impl Future for Finalized {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.as_mut().poll(cx)
    }
}

impl fmt::Debug for Finalized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finalized").finish()
    }
}
