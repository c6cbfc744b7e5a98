//! Completion handles for tile requests

use crate::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::debug;

/// The eventual result of a tile request
///
/// Local requests come back already resolved; remote ones resolve when
/// the owning worker answers. Dropping the future abandons the request
/// and the answer is discarded when it arrives.
#[must_use = "a TileFuture does nothing unless waited on"]
pub struct TileFuture<T> {
    state: State<T>,
}

enum State<T> {
    Ready(Option<Result<T>>),
    Pending(oneshot::Receiver<Result<T>>),
}

/// The sending half of a pending [`TileFuture`]
pub struct Completer<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> TileFuture<T> {
    pub fn ready(result: Result<T>) -> Self {
        TileFuture {
            state: State::Ready(Some(result)),
        }
    }

    pub fn failed(err: Error) -> Self {
        Self::ready(Err(err))
    }

    /// A future together with the handle that resolves it
    pub fn pending() -> (Completer<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            Completer { tx },
            TileFuture {
                state: State::Pending(rx),
            },
        )
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// Block the current thread until the result is available
    ///
    /// Must not be called from inside an async runtime; `.await` the
    /// future there instead.
    pub fn wait(self) -> Result<T> {
        match self.state {
            State::Ready(result) => result.unwrap_or_else(|| Err(taken())),
            State::Pending(rx) => rx.blocking_recv().unwrap_or_else(|_| Err(abandoned())),
        }
    }

    /// Take the result if it has arrived
    ///
    /// Returns `None` while the request is in flight. Once a result has
    /// been taken, later calls report an error.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        let result = match &mut self.state {
            State::Ready(result) => return Some(result.take().unwrap_or_else(|| Err(taken()))),
            State::Pending(rx) => match rx.try_recv() {
                Ok(result) => result,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => Err(abandoned()),
            },
        };
        self.state = State::Ready(None);
        Some(result)
    }
}

// No field is structurally pinned.
impl<T> Unpin for TileFuture<T> {}

impl<T> Future for TileFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| Err(taken()))),
            State::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(received) => {
                    this.state = State::Ready(None);
                    Poll::Ready(received.unwrap_or_else(|_| Err(abandoned())))
                }
            },
        }
    }
}

impl<T> Completer<T> {
    /// Resolve the future. A result for an abandoned future is dropped.
    pub fn complete(self, result: Result<T>) {
        if self.tx.send(result).is_err() {
            debug!("discarding completion of an abandoned request");
        }
    }

    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

fn abandoned() -> Error {
    Error::Rpc("request dropped before completion".to_string())
}

fn taken() -> Error {
    Error::Rpc("result already taken".to_string())
}
