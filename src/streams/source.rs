use super::{StreamResult, controller::ReadableStreamDefaultController};
use crate::platform::PlatformFuture;
use futures::{FutureExt, Stream, StreamExt};
use std::future::Future;

// ----------- Source Traits -----------

/// Producer side of a readable stream. Every callback is optional: the
/// default implementations succeed without doing anything.
///
/// The stream task invokes at most one callback at a time, so `&mut self`
/// is never shared between a pull and a cancel.
pub trait ReadableSource<T: 'static>: 'static {
    /// Runs once, before any pull.
    fn start(
        &mut self,
        _controller: &mut ReadableStreamDefaultController<T>,
    ) -> impl Future<Output = StreamResult<()>> {
        async { Ok(()) }
    }

    /// Runs whenever the queue is below its high water mark or a read is
    /// waiting, and no other pull is in flight.
    fn pull(
        &mut self,
        _controller: &mut ReadableStreamDefaultController<T>,
    ) -> impl Future<Output = StreamResult<()>> {
        async { Ok(()) }
    }

    /// Runs when a consumer abandons the stream. The stream is already closed
    /// when this is called.
    fn cancel(&mut self, _reason: Option<String>) -> impl Future<Output = StreamResult<()>> {
        async { Ok(()) }
    }
}

type StartFn<T> =
    Box<dyn FnOnce(ReadableStreamDefaultController<T>) -> PlatformFuture<'static, StreamResult<()>>>;
type PullFn<T> =
    Box<dyn FnMut(ReadableStreamDefaultController<T>) -> PlatformFuture<'static, StreamResult<()>>>;
type CancelFn = Box<dyn FnOnce(Option<String>) -> PlatformFuture<'static, StreamResult<()>>>;

/// A source assembled from optional callbacks, for hosts that describe a
/// producer as a record of functions rather than a type.
///
/// ```rust
/// use readable_streams::{ReadableStream, UnderlyingSource};
///
/// let source = UnderlyingSource::new()
///     .with_start(|controller| async move {
///         controller.enqueue("hello")?;
///         controller.close()
///     });
/// let (stream, _task) = ReadableStream::builder(source).prepare();
/// assert!(!stream.locked());
/// ```
pub struct UnderlyingSource<T> {
    start: Option<StartFn<T>>,
    pull: Option<PullFn<T>>,
    cancel: Option<CancelFn>,
}

impl<T> Default for UnderlyingSource<T> {
    fn default() -> Self {
        Self {
            start: None,
            pull: None,
            cancel: None,
        }
    }
}

impl<T: 'static> UnderlyingSource<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start<F, Fut>(mut self, start: F) -> Self
    where
        F: FnOnce(ReadableStreamDefaultController<T>) -> Fut + 'static,
        Fut: Future<Output = StreamResult<()>> + 'static,
    {
        self.start = Some(Box::new(move |controller| start(controller).boxed_local()));
        self
    }

    pub fn with_pull<F, Fut>(mut self, mut pull: F) -> Self
    where
        F: FnMut(ReadableStreamDefaultController<T>) -> Fut + 'static,
        Fut: Future<Output = StreamResult<()>> + 'static,
    {
        self.pull = Some(Box::new(move |controller| pull(controller).boxed_local()));
        self
    }

    pub fn with_cancel<F, Fut>(mut self, cancel: F) -> Self
    where
        F: FnOnce(Option<String>) -> Fut + 'static,
        Fut: Future<Output = StreamResult<()>> + 'static,
    {
        self.cancel = Some(Box::new(move |reason| cancel(reason).boxed_local()));
        self
    }
}

impl<T: 'static> ReadableSource<T> for UnderlyingSource<T> {
    async fn start(&mut self, controller: &mut ReadableStreamDefaultController<T>) -> StreamResult<()> {
        match self.start.take() {
            Some(start) => start(controller.clone()).await,
            None => Ok(()),
        }
    }

    async fn pull(&mut self, controller: &mut ReadableStreamDefaultController<T>) -> StreamResult<()> {
        match self.pull.as_mut() {
            Some(pull) => pull(controller.clone()).await,
            None => Ok(()),
        }
    }

    async fn cancel(&mut self, reason: Option<String>) -> StreamResult<()> {
        match self.cancel.take() {
            Some(cancel) => cancel(reason).await,
            None => Ok(()),
        }
    }
}

// ----------- Adapter Sources -----------
pub struct IteratorSource<I> {
    iter: I,
}

impl<I> IteratorSource<I> {
    pub fn new(iter: I) -> Self {
        Self { iter }
    }
}

impl<I, T: 'static> ReadableSource<T> for IteratorSource<I>
where
    I: Iterator<Item = T> + 'static,
{
    async fn pull(&mut self, controller: &mut ReadableStreamDefaultController<T>) -> StreamResult<()> {
        match self.iter.next() {
            Some(item) => controller.enqueue(item),
            None => controller.close(),
        }
    }
}

pub struct AsyncStreamSource<S> {
    stream: S,
}

impl<S> AsyncStreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S, T: 'static> ReadableSource<T> for AsyncStreamSource<S>
where
    S: Stream<Item = T> + Unpin + 'static,
{
    async fn pull(&mut self, controller: &mut ReadableStreamDefaultController<T>) -> StreamResult<()> {
        match self.stream.next().await {
            Some(item) => controller.enqueue(item),
            None => controller.close(),
        }
    }
}
