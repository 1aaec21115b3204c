//! Completion handles.
//!
//! A completion is created pending and settles exactly once; later attempts to
//! settle it are ignored. Settling only wakes the tasks waiting on it, so the
//! consumer observes the outcome on its own task and never through a
//! separately scheduled unit of work.

use super::{StreamResult, error::StreamError};
use crate::platform::SharedPtr;
use futures::channel::oneshot;
use std::{
    cell::RefCell,
    future::Future,
    mem,
    pin::Pin,
    task::{Context, Poll, Waker},
};

// ----------- WakerSet -----------
#[derive(Default, Debug)]
pub(crate) struct WakerSet(Vec<Waker>);

impl WakerSet {
    pub(crate) fn register(&mut self, waker: &Waker) {
        if !self.0.iter().any(|w| w.will_wake(waker)) {
            self.0.push(waker.clone());
        }
    }

    pub(crate) fn wake_all(self) {
        for waker in self.0 {
            waker.wake();
        }
    }
}

enum Settlement<T> {
    Pending(WakerSet),
    Fulfilled(T),
    Rejected(StreamError),
}

/// The settling side of a shared completion. If the last clone is dropped
/// while the completion is pending, waiters see [`StreamError::TaskDropped`].
pub(crate) struct Deferred<T> {
    settler: SharedPtr<Settler<T>>,
}

struct Settler<T> {
    state: SharedPtr<RefCell<Settlement<T>>>,
}

impl<T> Drop for Settler<T> {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        if !matches!(*state, Settlement::Pending(_)) {
            return;
        }
        let previous = mem::replace(&mut *state, Settlement::Rejected(StreamError::TaskDropped));
        drop(state);
        if let Settlement::Pending(wakers) = previous {
            wakers.wake_all();
        }
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            settler: SharedPtr::clone(&self.settler),
        }
    }
}

impl<T: Clone> Deferred<T> {
    pub(crate) fn new() -> Self {
        Self::with(Settlement::Pending(WakerSet::default()))
    }

    pub(crate) fn resolved(value: T) -> Self {
        Self::with(Settlement::Fulfilled(value))
    }

    pub(crate) fn rejected(error: StreamError) -> Self {
        Self::with(Settlement::Rejected(error))
    }

    fn with(settlement: Settlement<T>) -> Self {
        Self {
            settler: SharedPtr::new(Settler {
                state: SharedPtr::new(RefCell::new(settlement)),
            }),
        }
    }

    /// Returns `false` if the completion had already settled.
    pub(crate) fn resolve(&self, value: T) -> bool {
        self.settle(Settlement::Fulfilled(value))
    }

    /// Returns `false` if the completion had already settled.
    pub(crate) fn reject(&self, error: StreamError) -> bool {
        self.settle(Settlement::Rejected(error))
    }

    fn settle(&self, outcome: Settlement<T>) -> bool {
        let mut state = self.settler.state.borrow_mut();
        if !matches!(*state, Settlement::Pending(_)) {
            return false;
        }
        let previous = mem::replace(&mut *state, outcome);
        drop(state);
        if let Settlement::Pending(wakers) = previous {
            wakers.wake_all();
        }
        true
    }

    pub(crate) fn completion(&self) -> Completion<T> {
        Completion {
            state: SharedPtr::clone(&self.settler.state),
        }
    }
}

/// A handle on an outcome that settles once. Every clone and every poll after
/// settlement observes the same outcome.
#[must_use = "completions do nothing unless awaited"]
pub struct Completion<T> {
    state: SharedPtr<RefCell<Settlement<T>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            state: SharedPtr::clone(&self.state),
        }
    }
}

impl<T> Completion<T> {
    pub fn is_settled(&self) -> bool {
        !matches!(*self.state.borrow(), Settlement::Pending(_))
    }

    /// True when both handles observe the same underlying completion.
    pub fn same_as(&self, other: &Completion<T>) -> bool {
        SharedPtr::ptr_eq(&self.state, &other.state)
    }
}

impl<T: Clone> Future for Completion<T> {
    type Output = StreamResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut *self.state.borrow_mut() {
            Settlement::Pending(wakers) => {
                wakers.register(cx.waker());
                Poll::Pending
            }
            Settlement::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            Settlement::Rejected(error) => Poll::Ready(Err(error.clone())),
        }
    }
}

// ----------- Read requests -----------

/// A parked read. Exactly one of the three steps consumes it.
pub(crate) struct ReadRequest<T> {
    completion: oneshot::Sender<StreamResult<Option<T>>>,
}

impl<T> ReadRequest<T> {
    pub(crate) fn new() -> (Self, Read<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { completion: tx }, Read { rx })
    }

    pub(crate) fn chunk_steps(self, chunk: T) {
        let _ = self.completion.send(Ok(Some(chunk)));
    }

    pub(crate) fn close_steps(self) {
        let _ = self.completion.send(Ok(None));
    }

    pub(crate) fn error_steps(self, error: StreamError) {
        let _ = self.completion.send(Err(error));
    }
}

/// Outcome of [`read`](super::ReadableStreamDefaultReader::read):
/// `Ok(Some(chunk))` for data, `Ok(None)` once the stream has ended, `Err` if
/// it failed.
///
/// The read is registered with the stream when it is issued, so reads are
/// served in the order they were made regardless of when they are awaited.
#[must_use = "a read request is served in order even if its result is never awaited"]
pub struct Read<T> {
    rx: oneshot::Receiver<StreamResult<Option<T>>>,
}

impl<T> Read<T> {
    pub(crate) fn failed(error: StreamError) -> Self {
        let (request, read) = ReadRequest::new();
        request.error_steps(error);
        read
    }
}

impl<T> Future for Read<T> {
    type Output = StreamResult<Option<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(StreamError::TaskDropped)))
    }
}
