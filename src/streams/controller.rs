use super::{
    StreamResult,
    completion::{Deferred, ReadRequest},
    error::StreamError,
    queue::ChunkQueue,
    readable::{SharedInner, StreamInner, StreamState},
    task::{JobQueue, StreamJob},
};
use crate::platform::{BoxedStrategy, SharedPtr, WeakPtr};
use std::{cell::RefCell, collections::VecDeque, task::Waker};
use tracing::trace;

const ENQUEUE_REFUSED: &str = "cannot enqueue into a stream that is closed or closing";

/// Pull reentrancy guard. A pull requested while one is in flight is folded
/// into a single follow-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PullState {
    Idle,
    Pulling,
    PullingThenRepeat,
}

pub(crate) struct ControllerState<T> {
    pub(crate) queue: ChunkQueue<T>,
    pub(crate) strategy: BoxedStrategy<T>,
    pub(crate) started: bool,
    pub(crate) close_requested: bool,
    pub(crate) pull_state: PullState,
    /// Producer callbacks waiting for the stream task, in invocation order.
    /// The task holds the queue too, so a scheduled cancel survives the stream.
    pub(crate) jobs: JobQueue,
    pub(crate) task_waker: Option<Waker>,
}

impl<T> ControllerState<T> {
    pub(crate) fn new(strategy: BoxedStrategy<T>) -> Self {
        Self {
            queue: ChunkQueue::new(),
            strategy,
            started: false,
            close_requested: false,
            pull_state: PullState::Idle,
            jobs: SharedPtr::new(RefCell::new(VecDeque::from([StreamJob::Start]))),
            task_waker: None,
        }
    }

    pub(crate) fn schedule(&mut self, job: StreamJob) {
        self.jobs.borrow_mut().push_back(job);
        self.wake_task();
    }

    pub(crate) fn wake_task(&mut self) {
        if let Some(waker) = self.task_waker.take() {
            waker.wake();
        }
    }
}

impl<T> StreamInner<T> {
    fn can_close_or_enqueue(&self) -> bool {
        !self.controller.close_requested && self.state == StreamState::Readable
    }

    /// An errored stream re-reports its stored error; otherwise the stream is
    /// closed or closing and the caller gets a `TypeError`.
    fn refused(&self, message: &'static str) -> StreamError {
        match &self.stored_error {
            Some(error) => error.clone(),
            None => StreamError::type_error(message),
        }
    }

    pub(crate) fn desired_size(&self) -> Option<f64> {
        match self.state {
            StreamState::Errored => None,
            StreamState::Closed => Some(0.0),
            StreamState::Readable => Some(
                self.controller.strategy.high_water_mark() - self.controller.queue.total_size(),
            ),
        }
    }

    fn should_call_pull(&self) -> bool {
        if !self.can_close_or_enqueue() || !self.controller.started {
            return false;
        }
        if self.num_read_requests() > 0 {
            return true;
        }
        self.desired_size().is_some_and(|size| size > 0.0)
    }

    pub(crate) fn call_pull_if_needed(&mut self) {
        if !self.should_call_pull() {
            return;
        }
        match self.controller.pull_state {
            PullState::Idle => {
                trace!(desired_size = ?self.desired_size(), "scheduling pull");
                self.controller.pull_state = PullState::Pulling;
                self.controller.schedule(StreamJob::Pull);
            }
            PullState::Pulling | PullState::PullingThenRepeat => {
                trace!("pull in flight, coalescing request");
                self.controller.pull_state = PullState::PullingThenRepeat;
            }
        }
    }

    /// Called by the stream task just before it invokes a scheduled pull.
    /// Returns `false` if the pull is no longer wanted, which includes a close
    /// requested after the pull was scheduled.
    pub(crate) fn begin_pull(&mut self) -> bool {
        if !self.can_close_or_enqueue() || !self.controller.started {
            self.controller.pull_state = PullState::Idle;
            return false;
        }
        true
    }

    pub(crate) fn start_finished(&mut self, result: StreamResult<()>) {
        match result {
            Ok(()) => {
                trace!("start settled");
                self.controller.started = true;
                self.call_pull_if_needed();
            }
            Err(error) => {
                tracing::warn!(%error, "start failed, erroring stream");
                self.controller_error(error);
            }
        }
    }

    pub(crate) fn pull_finished(&mut self, result: StreamResult<()>) {
        match result {
            Ok(()) => {
                let repeat = self.controller.pull_state == PullState::PullingThenRepeat;
                self.controller.pull_state = PullState::Idle;
                if repeat {
                    self.call_pull_if_needed();
                }
            }
            Err(error) => {
                tracing::warn!(%error, "pull failed, erroring stream");
                self.controller_error(error);
            }
        }
    }

    /// Drops any scheduled pull. Producer callbacks are not invoked for a
    /// stream that can no longer be read, except for an already scheduled cancel.
    fn clear_algorithms(&mut self) {
        self.controller
            .jobs
            .borrow_mut()
            .retain(|job| !matches!(job, StreamJob::Pull));
        self.controller.pull_state = PullState::Idle;
    }

    pub(crate) fn controller_close(&mut self) {
        self.controller.close_requested = true;
        if self.controller.queue.is_empty() {
            self.clear_algorithms();
            self.close();
        } else {
            trace!(
                queued = self.controller.queue.len(),
                "close requested, draining queue first"
            );
        }
    }

    pub(crate) fn controller_error(&mut self, error: StreamError) {
        if self.state != StreamState::Readable {
            return;
        }
        self.controller.queue.reset();
        self.clear_algorithms();
        self.error(error);
    }

    pub(crate) fn pull_steps(&mut self, read_request: ReadRequest<T>) {
        match self.controller.queue.dequeue_value() {
            Some(chunk) => {
                if self.controller.close_requested && self.controller.queue.is_empty() {
                    self.clear_algorithms();
                    self.close();
                } else {
                    self.call_pull_if_needed();
                }
                read_request.chunk_steps(chunk);
            }
            None => {
                self.add_read_request(read_request);
                self.call_pull_if_needed();
            }
        }
    }

    pub(crate) fn cancel_steps(&mut self, reason: Option<String>, completion: Deferred<()>) {
        self.controller.queue.reset();
        self.clear_algorithms();
        self.controller.schedule(StreamJob::Cancel { reason, completion });
    }
}

/// Handle through which a producer feeds its stream.
pub struct ReadableStreamDefaultController<T> {
    inner: WeakPtr<RefCell<StreamInner<T>>>,
}

impl<T> Clone for ReadableStreamDefaultController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: WeakPtr::clone(&self.inner),
        }
    }
}

impl<T: 'static> ReadableStreamDefaultController<T> {
    pub(crate) fn new(inner: WeakPtr<RefCell<StreamInner<T>>>) -> Self {
        Self { inner }
    }

    fn stream(&self) -> StreamResult<SharedInner<T>> {
        self.inner
            .upgrade()
            .ok_or_else(|| StreamError::type_error("stream has been dropped"))
    }

    /// `highWaterMark - queued size`; `None` once the stream has errored and
    /// `0` once it has closed.
    pub fn desired_size(&self) -> Option<f64> {
        let shared = self.inner.upgrade()?;
        let inner = shared.borrow();
        inner.desired_size()
    }

    /// Queues `chunk`, or hands it straight to the oldest pending read.
    ///
    /// A chunk the size algorithm rejects errors the stream, and the same
    /// error is returned here.
    pub fn enqueue(&self, chunk: T) -> StreamResult<()> {
        let shared = self.stream()?;
        let strategy = {
            let mut inner = shared.borrow_mut();
            if !inner.can_close_or_enqueue() {
                return Err(inner.refused(ENQUEUE_REFUSED));
            }
            if inner.num_read_requests() > 0 {
                inner.fulfill_read_request(chunk);
                inner.call_pull_if_needed();
                return Ok(());
            }
            inner.controller.strategy.clone()
        };

        // The size algorithm is producer code and may call back into this controller.
        let size = strategy.size(&chunk);

        let mut inner = shared.borrow_mut();
        let enqueued = size.and_then(|size| {
            if !inner.can_close_or_enqueue() {
                return Err(inner.refused(ENQUEUE_REFUSED));
            }
            inner.controller.queue.enqueue_value_with_size(chunk, size)
        });
        if let Err(error) = enqueued {
            if inner.state == StreamState::Readable {
                tracing::warn!(%error, "chunk size rejected, erroring stream");
                inner.controller_error(error.clone());
            }
            return Err(error);
        }
        trace!(
            queued = inner.controller.queue.len(),
            total_size = inner.controller.queue.total_size(),
            "chunk enqueued"
        );
        inner.call_pull_if_needed();
        Ok(())
    }

    /// Requests close. Queued chunks are still delivered first.
    pub fn close(&self) -> StreamResult<()> {
        let shared = self.stream()?;
        let mut inner = shared.borrow_mut();
        if !inner.can_close_or_enqueue() {
            return Err(inner.refused("cannot close a stream that is closed or closing"));
        }
        inner.controller_close();
        Ok(())
    }

    /// Errors the stream. A no-op once the stream is closed or errored.
    pub fn error(&self, error: StreamError) {
        if let Some(shared) = self.inner.upgrade() {
            shared.borrow_mut().controller_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{
        CountQueuingStrategy, QueuingStrategyInit, ReadableStream, UnderlyingSource,
        error::ErrorKind, test_support::Harness,
    };
    use futures::{FutureExt, channel::oneshot};
    use std::{cell::Cell, rc::Rc};

    type Slot = Rc<RefCell<Option<ReadableStreamDefaultController<u32>>>>;

    fn capturing(slot: &Slot) -> UnderlyingSource<u32> {
        let captured = slot.clone();
        UnderlyingSource::new().with_start(move |controller| {
            *captured.borrow_mut() = Some(controller);
            async { Ok(()) }
        })
    }

    #[test]
    fn pull_requests_during_a_pull_coalesce() {
        let mut harness = Harness::new();
        let (open_gate, gate) = oneshot::channel::<()>();
        let gate = Rc::new(RefCell::new(Some(gate)));
        let pulls = Rc::new(Cell::new(0));
        let counted = pulls.clone();
        let source = UnderlyingSource::<u32>::new().with_pull(move |controller| {
            counted.set(counted.get() + 1);
            let gate = gate.borrow_mut().take();
            async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                controller.enqueue(1)
            }
        });
        let stream = harness.spawn(
            ReadableStream::builder(source)
                .strategy(CountQueuingStrategy::new(0.0))
                .unwrap(),
        );
        let reader = stream.get_reader().unwrap();
        let first = reader.read();
        harness.run_until_stalled();
        assert_eq!(pulls.get(), 1);

        let second = reader.read();
        {
            let inner = stream.inner.borrow();
            assert_eq!(inner.controller.pull_state, PullState::PullingThenRepeat);
            assert!(inner.controller.jobs.borrow().is_empty());
        }

        open_gate.send(()).unwrap();
        harness.run_until_stalled();
        assert_eq!(pulls.get(), 2);
        assert_eq!(first.now_or_never(), Some(Ok(Some(1))));
        assert_eq!(second.now_or_never(), Some(Ok(Some(1))));
        assert_eq!(stream.inner.borrow().controller.pull_state, PullState::Idle);
    }

    #[test]
    fn no_pull_before_start_settles() {
        let mut harness = Harness::new();
        let pulls = Rc::new(Cell::new(0));
        let counted = pulls.clone();
        let (finish_start, started) = oneshot::channel::<()>();
        let source = UnderlyingSource::<u32>::new()
            .with_start(|_| async move {
                let _ = started.await;
                Ok(())
            })
            .with_pull(move |_| {
                counted.set(counted.get() + 1);
                async { Ok(()) }
            });
        let stream = harness.spawn(ReadableStream::builder(source));
        let reader = stream.get_reader().unwrap();
        let _pending = reader.read();
        harness.run_until_stalled();
        assert_eq!(pulls.get(), 0);

        finish_start.send(()).unwrap();
        harness.run_until_stalled();
        assert_eq!(pulls.get(), 1);
    }

    #[test]
    fn scheduled_pull_is_skipped_once_close_is_requested() {
        let mut harness = Harness::new();
        let slot: Slot = Rc::new(RefCell::new(None));
        let pulls = Rc::new(Cell::new(0));
        let counted = pulls.clone();
        let source = capturing(&slot).with_pull(move |_| {
            counted.set(counted.get() + 1);
            async { Ok(()) }
        });
        let stream = harness.spawn(
            ReadableStream::builder(source)
                .strategy(CountQueuingStrategy::new(0.0))
                .unwrap(),
        );
        harness.run_until_stalled();
        let controller = slot.borrow().clone().unwrap();

        let reader = stream.get_reader().unwrap();
        let first = reader.read();
        assert_eq!(stream.inner.borrow().controller.jobs.borrow().len(), 1);

        controller.enqueue(1).unwrap();
        controller.enqueue(2).unwrap();
        controller.close().unwrap();
        harness.run_until_stalled();

        assert_eq!(pulls.get(), 0);
        assert_eq!(stream.inner.borrow().controller.pull_state, PullState::Idle);
        assert_eq!(first.now_or_never(), Some(Ok(Some(1))));
        assert_eq!(reader.read().now_or_never(), Some(Ok(Some(2))));
        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(reader.read().now_or_never(), Some(Ok(None)));
    }

    #[test]
    fn size_algorithm_may_close_the_stream() {
        let mut harness = Harness::new();
        let slot: Slot = Rc::new(RefCell::new(None));
        let closer = slot.clone();
        let stream = harness.spawn(
            ReadableStream::builder(capturing(&slot))
                .strategy_init(QueuingStrategyInit::new().size(move |_: &u32| {
                    if let Some(controller) = closer.borrow().as_ref() {
                        controller.close()?;
                    }
                    Ok(1.0)
                }))
                .unwrap(),
        );
        harness.run_until_stalled();

        let controller = slot.borrow().clone().unwrap();
        let err = controller.enqueue(5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn controller_outliving_its_stream() {
        let mut harness = Harness::new();
        let slot: Slot = Rc::new(RefCell::new(None));
        let stream = harness.spawn(ReadableStream::builder(capturing(&slot)));
        harness.run_until_stalled();
        drop(stream);
        harness.run_until_stalled();

        let controller = slot.borrow().clone().unwrap();
        assert_eq!(controller.enqueue(1).unwrap_err().kind(), ErrorKind::Type);
        assert_eq!(controller.close().unwrap_err().kind(), ErrorKind::Type);
        assert_eq!(controller.desired_size(), None);
        controller.error(StreamError::from("ignored"));
    }
}
