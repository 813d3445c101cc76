use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures_util::ready;
use tokio::task::JoinHandle;

use super::Error;

/// Final state of an async api call
#[derive(Debug)]
pub enum CallOutcome<T> {
    /// server answered with success status
    Success(T),
    /// call failed, see error for status and message
    Failure(Error),
    /// call cancelled before it completed, limiter state untouched by it
    Cancelled,
}

impl<T> CallOutcome<T> {
    /// Convert to result, cancellation becomes `None`
    pub fn into_result(self) -> Option<Result<T, Error>> {
        match self {
            Self::Success(value) => Some(Ok(value)),
            Self::Failure(err) => Some(Err(err)),
            Self::Cancelled => None,
        }
    }

    /// Check if call was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Handle of an api call running on a background worker.
///
/// Awaiting it gives the [`CallOutcome`]. Dropping it does not cancel the call,
/// use [`PendingCall::cancel`] for that.
#[derive(Debug)]
pub struct PendingCall<T> {
    pub(crate) handle: JoinHandle<Result<T, Error>>,
}

impl<T> PendingCall<T> {
    /// Abort the call, if it is still running
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Check if the worker has finished
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for PendingCall<T> {
    type Output = CallOutcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match ready!(Pin::new(&mut self.handle).poll(cx)) {
            Ok(Ok(value)) => CallOutcome::Success(value),
            Ok(Err(err)) => CallOutcome::Failure(err),
            Err(err) if err.is_cancelled() => CallOutcome::Cancelled,
            Err(err) => CallOutcome::Failure(Error::TaskFailed { source: err }),
        };

        Poll::Ready(outcome)
    }
}
