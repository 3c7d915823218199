//! Races an exchange against a deadline.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project::pin_project;

use crate::Error;

/// Default time allowed for a response to arrive.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves with the inner future's output, or [`Error::Timeout`] once the deadline passes.
///
/// The inner future is polled first, so an exchange which completes in the same wakeup as
/// the timer still wins. Whichever settles first is final.
#[derive(Debug)]
#[pin_project]
pub(crate) struct TimeoutFuture<F> {
    #[pin]
    inner: F,
    duration: Duration,

    #[pin]
    timeout: tokio::time::Sleep,
}

impl<F> TimeoutFuture<F> {
    /// The deadline starts counting now, not when the future is first polled.
    pub(crate) fn new(inner: F, duration: Duration) -> Self {
        Self {
            inner,
            duration,
            timeout: tokio::time::sleep(duration),
        }
    }
}

impl<F, R> Future for TimeoutFuture<F>
where
    F: Future<Output = Result<R, Error>>,
{
    type Output = Result<R, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let Poll::Ready(outcome) = this.inner.poll(cx) {
            return Poll::Ready(outcome);
        }

        match this.timeout.poll(cx) {
            Poll::Ready(()) => {
                tracing::debug!(timeout = ?this.duration, "request timed out");
                Poll::Ready(Err(Error::Timeout(*this.duration)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
