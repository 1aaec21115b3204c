use super::{
    StreamResult,
    completion::{Completion, Deferred, ReadRequest},
    controller::ControllerState,
    error::StreamError,
    reader::{ReadableStreamDefaultReader, ReaderState},
    source::{AsyncStreamSource, IteratorSource, ReadableSource},
    strategy::{
        ByteLengthQueuingStrategy, CountQueuingStrategy, QueuingStrategy, QueuingStrategyInit,
        SourceType, StreamConfig, byte_length, extract_high_water_mark,
    },
    task::readable_stream_task,
};
use crate::platform::{BoxedStrategy, PlatformFuture, SharedPtr};
use futures::Stream;
use std::{cell::RefCell, fmt, future::Future};
use tracing::trace;

pub(crate) type SharedInner<T> = SharedPtr<RefCell<StreamInner<T>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Readable,
    Closed,
    Errored,
}

// ----------- Stream State Machine -----------
pub(crate) struct StreamInner<T> {
    pub(crate) state: StreamState,
    pub(crate) stored_error: Option<StreamError>,
    pub(crate) disturbed: bool,
    pub(crate) reader: Option<ReaderState<T>>,
    pub(crate) controller: ControllerState<T>,
}

impl<T> StreamInner<T> {
    fn new(strategy: BoxedStrategy<T>) -> Self {
        Self {
            state: StreamState::Readable,
            stored_error: None,
            disturbed: false,
            reader: None,
            controller: ControllerState::new(strategy),
        }
    }

    pub(crate) fn stored_error(&self) -> StreamError {
        self.stored_error
            .clone()
            .unwrap_or_else(|| StreamError::assertion("errored stream has no stored error"))
    }

    pub(crate) fn num_read_requests(&self) -> usize {
        self.reader
            .as_ref()
            .map_or(0, |reader| reader.read_requests.len())
    }

    pub(crate) fn add_read_request(&mut self, read_request: ReadRequest<T>) {
        match self.reader.as_mut() {
            Some(reader) => reader.read_requests.push_back(read_request),
            None => read_request.error_steps(StreamError::assertion("read without a reader")),
        }
    }

    pub(crate) fn fulfill_read_request(&mut self, chunk: T) {
        if let Some(read_request) = self
            .reader
            .as_mut()
            .and_then(|reader| reader.read_requests.pop_front())
        {
            read_request.chunk_steps(chunk);
        }
    }

    pub(crate) fn close(&mut self) {
        if self.state != StreamState::Readable {
            return;
        }
        trace!("stream closed");
        self.state = StreamState::Closed;
        if let Some(reader) = self.reader.as_mut() {
            reader.closed.resolve(());
            for read_request in reader.read_requests.drain(..) {
                read_request.close_steps();
            }
        }
        self.controller.wake_task();
    }

    pub(crate) fn error(&mut self, error: StreamError) {
        if self.state != StreamState::Readable {
            return;
        }
        trace!(%error, "stream errored");
        self.state = StreamState::Errored;
        self.stored_error = Some(error.clone());
        if let Some(reader) = self.reader.as_mut() {
            reader.closed.reject(error.clone());
            for read_request in reader.read_requests.drain(..) {
                read_request.error_steps(error.clone());
            }
        }
        self.controller.wake_task();
    }

    pub(crate) fn read(&mut self, read_request: ReadRequest<T>) {
        self.disturbed = true;
        match self.state {
            StreamState::Closed => read_request.close_steps(),
            StreamState::Errored => read_request.error_steps(self.stored_error()),
            StreamState::Readable => self.pull_steps(read_request),
        }
    }

    pub(crate) fn cancel(&mut self, reason: Option<String>) -> Completion<()> {
        self.disturbed = true;
        match self.state {
            StreamState::Closed => Deferred::resolved(()).completion(),
            StreamState::Errored => Deferred::rejected(self.stored_error()).completion(),
            StreamState::Readable => {
                trace!(?reason, "stream canceled");
                self.close();
                let completion = Deferred::new();
                self.cancel_steps(reason, completion.clone());
                completion.completion()
            }
        }
    }
}

impl<T> Drop for StreamInner<T> {
    fn drop(&mut self) {
        // Let the stream task observe that its stream is gone.
        self.controller.wake_task();
    }
}

// ----------- ReadableStream -----------

/// A readable stream handle. Clones refer to the same stream.
pub struct ReadableStream<T> {
    pub(crate) inner: SharedInner<T>,
}

impl<T> Clone for ReadableStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: SharedPtr::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ReadableStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ReadableStream")
            .field("state", &inner.state)
            .field("locked", &inner.reader.is_some())
            .field("disturbed", &inner.disturbed)
            .finish()
    }
}

impl<T: 'static> ReadableStream<T> {
    /// Returns a builder for a value stream backed by `source`.
    pub fn builder<Source: ReadableSource<T>>(source: Source) -> ReadableStreamBuilder<T, Source> {
        ReadableStreamBuilder::new(source)
    }

    pub fn locked(&self) -> bool {
        self.inner.borrow().reader.is_some()
    }

    pub fn state(&self) -> StreamState {
        self.inner.borrow().state
    }

    /// True once any read or cancel has been attempted.
    pub fn is_disturbed(&self) -> bool {
        self.inner.borrow().disturbed
    }

    pub fn stored_error(&self) -> Option<StreamError> {
        self.inner.borrow().stored_error.clone()
    }

    /// Locks the stream to a new reader.
    pub fn get_reader(&self) -> StreamResult<ReadableStreamDefaultReader<T>> {
        ReadableStreamDefaultReader::new(self)
    }

    /// Cancels an unlocked stream. A locked stream is canceled through its reader.
    pub fn cancel(&self, reason: Option<String>) -> Completion<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.reader.is_some() {
            return Deferred::rejected(StreamError::type_error(
                "cannot cancel a stream that is locked to a reader",
            ))
            .completion();
        }
        inner.cancel(reason)
    }
}

impl<T: AsRef<[u8]> + 'static> ReadableStream<T> {
    /// Returns a builder for a byte stream: chunks are sized by their byte
    /// length and the high water mark defaults to zero.
    pub fn builder_bytes<Source: ReadableSource<T>>(
        source: Source,
    ) -> ReadableStreamBuilder<T, Source> {
        ReadableStreamBuilder {
            source,
            source_type: SourceType::Bytes,
            strategy: SharedPtr::new(ByteLengthQueuingStrategy::new(0.0)),
            byte_length: Some(byte_length::<T>),
        }
    }
}

impl<T: 'static> ReadableStream<T> {
    /// Create from Vec - shortcut for ReadableStreamBuilder::from_vec()
    pub fn from_vec(vec: Vec<T>) -> ReadableStreamBuilder<T, IteratorSource<std::vec::IntoIter<T>>> {
        ReadableStreamBuilder::from_vec(vec)
    }

    /// Create from Iterator - shortcut for ReadableStreamBuilder::from_iterator()
    pub fn from_iterator<I>(iter: I) -> ReadableStreamBuilder<T, IteratorSource<I>>
    where
        I: Iterator<Item = T> + 'static,
    {
        ReadableStreamBuilder::from_iterator(iter)
    }

    /// Create from Stream - shortcut for ReadableStreamBuilder::from_stream()
    pub fn from_stream<S>(stream: S) -> ReadableStreamBuilder<T, AsyncStreamSource<S>>
    where
        S: Stream<Item = T> + Unpin + 'static,
    {
        ReadableStreamBuilder::from_stream(stream)
    }
}

// ----------- Builder Pattern Implementation -----------

/// Configures a stream before its task is created.
///
/// Strategy validation happens as each setter is applied: the high water mark
/// is checked before any conflict with the stream type.
pub struct ReadableStreamBuilder<T, Source> {
    source: Source,
    source_type: SourceType,
    strategy: BoxedStrategy<T>,
    byte_length: Option<fn(&T) -> f64>,
}

impl<T: 'static, Source: ReadableSource<T>> ReadableStreamBuilder<T, Source> {
    fn new(source: Source) -> Self {
        Self {
            source,
            source_type: SourceType::Default,
            strategy: SharedPtr::new(CountQueuingStrategy::new(1.0)),
            byte_length: None,
        }
    }

    /// Use a typed queuing strategy. Byte streams size their own chunks and
    /// reject any other strategy.
    pub fn strategy<S: QueuingStrategy<T> + 'static>(mut self, strategy: S) -> StreamResult<Self> {
        extract_high_water_mark(Some(strategy.high_water_mark()), 1.0)?;
        if self.source_type == SourceType::Bytes {
            return Err(StreamError::range_error(
                "size function must not be set for byte streams",
            ));
        }
        self.strategy = SharedPtr::new(strategy);
        Ok(self)
    }

    /// Use a host-supplied strategy dictionary. Absent members take the
    /// defaults of this builder's stream type.
    pub fn strategy_init(mut self, init: QueuingStrategyInit<T>) -> StreamResult<Self> {
        self.strategy = init.resolve(self.source_type, self.byte_length)?;
        Ok(self)
    }

    /// Apply a host configuration such as `{"type": "bytes", "highWaterMark": 1024}`.
    pub fn config(mut self, config: StreamConfig) -> StreamResult<Self> {
        let (source_type, init) = config.into_parts();
        self.strategy = init.resolve(source_type, self.byte_length)?;
        self.source_type = source_type;
        Ok(self)
    }

    /// Return stream + future without spawning
    pub fn prepare(self) -> (ReadableStream<T>, impl Future<Output = ()> + 'static) {
        trace!(
            source_type = ?self.source_type,
            high_water_mark = self.strategy.high_water_mark(),
            "creating stream"
        );
        let inner = SharedPtr::new(RefCell::new(StreamInner::new(self.strategy)));
        let jobs = SharedPtr::clone(&inner.borrow().controller.jobs);
        let task = readable_stream_task(SharedPtr::downgrade(&inner), jobs, self.source);
        (ReadableStream { inner }, task)
    }

    /// Hand the stream task to `spawn_fn`, for example `tokio::task::spawn_local`.
    pub fn spawn<F, R>(self, spawn_fn: F) -> ReadableStream<T>
    where
        F: FnOnce(PlatformFuture<'static, ()>) -> R,
    {
        let (stream, task) = self.prepare();
        spawn_fn(Box::pin(task));
        stream
    }
}

// Convenience constructors as static methods on the builder
impl<T: 'static> ReadableStreamBuilder<T, IteratorSource<std::vec::IntoIter<T>>> {
    /// Create a builder from a Vec
    pub fn from_vec(vec: Vec<T>) -> Self {
        Self::new(IteratorSource::new(vec.into_iter()))
    }
}

impl<T: 'static, I> ReadableStreamBuilder<T, IteratorSource<I>>
where
    I: Iterator<Item = T> + 'static,
{
    /// Create a builder from an Iterator
    pub fn from_iterator(iter: I) -> Self {
        Self::new(IteratorSource::new(iter))
    }
}

impl<T: 'static, S> ReadableStreamBuilder<T, AsyncStreamSource<S>>
where
    S: Stream<Item = T> + Unpin + 'static,
{
    /// Create a builder from a Stream
    pub fn from_stream(stream: S) -> Self {
        Self::new(AsyncStreamSource::new(stream))
    }
}
