use super::{
    StreamResult,
    completion::{Completion, Deferred, Read, ReadRequest},
    error::StreamError,
    readable::{ReadableStream, StreamState},
};
use futures::Stream;
use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tracing::trace;

/// Reader bookkeeping held by the stream while it is locked.
pub(crate) struct ReaderState<T> {
    pub(crate) read_requests: VecDeque<ReadRequest<T>>,
    pub(crate) closed: Deferred<()>,
}

// ----------- Default Reader -----------

/// Exclusive reader of a [`ReadableStream`]. Dropping the reader releases
/// the lock.
pub struct ReadableStreamDefaultReader<T> {
    stream: RefCell<Option<ReadableStream<T>>>,
    closed: RefCell<Deferred<()>>,
    next: Option<Read<T>>,
    exhausted: bool,
}

impl<T> fmt::Debug for ReadableStreamDefaultReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadableStreamDefaultReader")
            .field("attached", &self.stream.borrow().is_some())
            .finish()
    }
}

impl<T: 'static> ReadableStreamDefaultReader<T> {
    /// Locks `stream`. Fails with a `TypeError` if another reader holds it.
    pub fn new(stream: &ReadableStream<T>) -> StreamResult<Self> {
        let mut inner = stream.inner.borrow_mut();
        if inner.reader.is_some() {
            return Err(StreamError::type_error(
                "stream is already locked to a reader",
            ));
        }
        let closed = match inner.state {
            StreamState::Readable => Deferred::new(),
            StreamState::Closed => Deferred::resolved(()),
            StreamState::Errored => Deferred::rejected(inner.stored_error()),
        };
        inner.reader = Some(ReaderState {
            read_requests: VecDeque::new(),
            closed: closed.clone(),
        });
        trace!(state = ?inner.state, "reader acquired lock");
        drop(inner);

        Ok(Self {
            stream: RefCell::new(Some(stream.clone())),
            closed: RefCell::new(closed),
            next: None,
            exhausted: false,
        })
    }

    /// Requests the next chunk. The request joins the stream's queue of
    /// pending reads immediately, before the returned future is polled.
    ///
    /// Not cancel-safe: a chunk delivered to a [`Read`] that was dropped
    /// first, for example by an expired `timeout`, is lost. Polling the
    /// reader as a [`Stream`] keeps its outstanding read across polls and
    /// loses nothing.
    pub fn read(&self) -> Read<T> {
        match &*self.stream.borrow() {
            Some(stream) => {
                let (read_request, read) = ReadRequest::new();
                stream.inner.borrow_mut().read(read_request);
                read
            }
            None => Read::failed(StreamError::type_error(
                "cannot read from a reader that has released its lock",
            )),
        }
    }

    pub fn cancel(&self, reason: Option<String>) -> Completion<()> {
        match &*self.stream.borrow() {
            Some(stream) => stream.inner.borrow_mut().cancel(reason),
            None => Deferred::rejected(StreamError::type_error(
                "cannot cancel through a reader that has released its lock",
            ))
            .completion(),
        }
    }

    /// Settles when the stream closes, or fails when it errors or the lock
    /// is released.
    pub fn closed(&self) -> Completion<()> {
        self.closed.borrow().completion()
    }
}

impl<T> ReadableStreamDefaultReader<T> {
    /// Detaches from the stream. Every pending read fails with
    /// [`StreamError::Released`]. Releasing twice is a no-op.
    pub fn release_lock(&self) {
        let Some(stream) = self.stream.borrow_mut().take() else {
            return;
        };
        let state = stream.inner.borrow_mut().reader.take();
        if let Some(state) = state {
            trace!(
                pending = state.read_requests.len(),
                "reader releasing lock"
            );
            for read_request in state.read_requests {
                read_request.error_steps(StreamError::Released);
            }
        }

        let mut closed = self.closed.borrow_mut();
        if !closed.reject(StreamError::Released) {
            *closed = Deferred::rejected(StreamError::Released);
        }
    }
}

impl<T> Drop for ReadableStreamDefaultReader<T> {
    fn drop(&mut self) {
        self.release_lock();
    }
}

/// Yields chunks until the stream ends. An error is yielded once and ends the
/// sequence.
impl<T: 'static> Stream for ReadableStreamDefaultReader<T> {
    type Item = StreamResult<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.exhausted {
            return Poll::Ready(None);
        }
        let mut read = match self.next.take() {
            Some(read) => read,
            None => self.read(),
        };
        match Pin::new(&mut read).poll(cx) {
            Poll::Pending => {
                self.next = Some(read);
                Poll::Pending
            }
            Poll::Ready(Ok(Some(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Ok(None)) => {
                self.exhausted = true;
                Poll::Ready(None)
            }
            Poll::Ready(Err(error)) => {
                self.exhausted = true;
                Poll::Ready(Some(Err(error)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{
        ReadableStreamDefaultController, UnderlyingSource, error::ErrorKind, test_support::Harness,
    };
    use futures::FutureExt;

    fn idle_stream(harness: &mut Harness) -> ReadableStream<u32> {
        harness.spawn(ReadableStream::builder(UnderlyingSource::new()))
    }

    #[test]
    fn second_lock_fails_with_type_error() {
        let mut harness = Harness::new();
        let stream = idle_stream(&mut harness);
        let _reader = stream.get_reader().unwrap();

        assert!(stream.locked());
        let err = stream.get_reader().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    fn release_rejects_every_pending_read_and_unlocks() {
        let mut harness = Harness::new();
        let stream = idle_stream(&mut harness);
        let reader = stream.get_reader().unwrap();
        let reads: Vec<_> = (0..3).map(|_| reader.read()).collect();
        harness.run_until_stalled();

        reader.release_lock();
        assert!(!stream.locked());
        for read in reads {
            assert_eq!(read.now_or_never().unwrap(), Err(StreamError::Released));
        }
        assert_eq!(
            reader.closed().now_or_never().unwrap(),
            Err(StreamError::Released)
        );

        // A new reader can take the lock.
        stream.get_reader().unwrap();
    }

    #[test]
    fn release_is_idempotent() {
        let mut harness = Harness::new();
        let stream = idle_stream(&mut harness);
        let reader = stream.get_reader().unwrap();
        reader.release_lock();
        let replacement = stream.get_reader().unwrap();
        reader.release_lock();
        assert!(stream.locked());
        drop(replacement);
        assert!(!stream.locked());
    }

    #[test]
    fn released_reader_rejects_reads_and_cancel() {
        let mut harness = Harness::new();
        let stream = idle_stream(&mut harness);
        let reader = stream.get_reader().unwrap();
        reader.release_lock();

        let err = reader.read().now_or_never().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        let err = reader.cancel(None).now_or_never().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        assert!(!stream.is_disturbed());
    }

    #[test]
    fn release_after_close_replaces_the_closed_signal() {
        let mut harness = Harness::new();
        let stream = harness.spawn(ReadableStream::from_vec(Vec::<u32>::new()));
        harness.run_until_stalled();

        let reader = stream.get_reader().unwrap();
        let before = reader.closed();
        assert_eq!(before.clone().now_or_never(), Some(Ok(())));

        reader.release_lock();
        assert_eq!(before.now_or_never(), Some(Ok(())));
        assert_eq!(
            reader.closed().now_or_never(),
            Some(Err(StreamError::Released))
        );
    }

    #[test]
    fn lock_on_errored_stream_starts_rejected() {
        let mut harness = Harness::new();
        let source = UnderlyingSource::<u32>::new()
            .with_start(|controller: ReadableStreamDefaultController<u32>| async move {
                controller.error(StreamError::from("boom"));
                Ok(())
            });
        let stream = harness.spawn(ReadableStream::builder(source));
        harness.run_until_stalled();

        let reader = stream.get_reader().unwrap();
        let stored = stream.stored_error().unwrap();
        assert_eq!(reader.closed().now_or_never(), Some(Err(stored.clone())));
        assert_eq!(reader.read().now_or_never(), Some(Err(stored)));
    }

    #[test]
    fn dropping_reader_releases_lock() {
        let mut harness = Harness::new();
        let stream = idle_stream(&mut harness);
        let reader = stream.get_reader().unwrap();
        let pending = reader.read();
        drop(reader);

        assert!(!stream.locked());
        assert_eq!(pending.now_or_never(), Some(Err(StreamError::Released)));
    }

    #[test]
    fn stream_adapter_stops_after_error() {
        use futures::StreamExt;

        let mut harness = Harness::new();
        let source = UnderlyingSource::<u32>::new().with_start(|controller| async move {
            controller.enqueue(1)?;
            controller.error(StreamError::type_error("late failure"));
            Ok(())
        });
        let stream = harness.spawn(ReadableStream::builder(source));
        let reader = stream.get_reader().unwrap();

        let items: Vec<_> = harness.block_on(reader.collect());
        assert_eq!(items, vec![Err(StreamError::type_error("late failure"))]);
    }
}
