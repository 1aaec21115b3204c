use super::{
    StreamResult,
    completion::Deferred,
    controller::ReadableStreamDefaultController,
    readable::{SharedInner, StreamInner, StreamState},
    source::ReadableSource,
};
use crate::platform::{PlatformFuture, SharedPtr, WeakPtr};
use futures::{FutureExt, future::poll_fn};
use std::{cell::RefCell, collections::VecDeque, task::Poll};
use tracing::{debug, trace, warn};

/// Producer callbacks waiting to run on the stream task.
pub(crate) enum StreamJob {
    Start,
    Pull,
    Cancel {
        reason: Option<String>,
        completion: Deferred<()>,
    },
}

/// Job queue shared by a stream and its task.
pub(crate) type JobQueue = SharedPtr<RefCell<VecDeque<StreamJob>>>;

enum Invoked {
    Start,
    Pull,
    Cancel(Deferred<()>),
}

struct Producer<T, Source> {
    source: Source,
    controller: ReadableStreamDefaultController<T>,
}

type Callback<T, Source> = PlatformFuture<'static, (Producer<T, Source>, StreamResult<()>)>;

// ----------- Stream Task Implementation -----------

/// Runs the producer's callbacks one at a time, in the order the controller
/// scheduled them. The source moves into each callback future and comes back
/// with its outcome, so a pull and a cancel can never overlap.
///
/// The task holds only a weak reference to the stream. It finishes once the
/// stream is closed or errored with nothing left to run, or once every handle
/// is gone and no cancel is outstanding. A cancel scheduled before the last
/// handle was dropped still reaches the source and settles its completion.
pub(crate) async fn readable_stream_task<T, Source>(
    inner: WeakPtr<RefCell<StreamInner<T>>>,
    jobs: JobQueue,
    source: Source,
) where
    T: 'static,
    Source: ReadableSource<T>,
{
    let mut producer = Some(Producer {
        source,
        controller: ReadableStreamDefaultController::new(WeakPtr::clone(&inner)),
    });
    let mut in_flight: Option<(Invoked, Callback<T, Source>)> = None;
    debug!("stream task started");

    poll_fn(|cx| {
        loop {
            let shared = inner.upgrade();
            if shared.is_none() && !cancel_outstanding(&jobs, &in_flight) {
                return Poll::Ready(());
            }

            if let Some((invoked, mut callback)) = in_flight.take() {
                match callback.as_mut().poll(cx) {
                    Poll::Pending => {
                        in_flight = Some((invoked, callback));
                        return Poll::Pending;
                    }
                    Poll::Ready((returned, result)) => {
                        producer = Some(returned);
                        settle(shared.as_ref(), invoked, result);
                        continue;
                    }
                }
            }

            let next = jobs.borrow_mut().pop_front();
            let Some(job) = next else {
                let Some(shared) = shared else {
                    return Poll::Ready(());
                };
                let mut stream = shared.borrow_mut();
                if stream.state != StreamState::Readable {
                    return Poll::Ready(());
                }
                stream.controller.task_waker = Some(cx.waker().clone());
                return Poll::Pending;
            };

            let wanted = match (&job, &shared) {
                (StreamJob::Cancel { .. }, _) => true,
                (StreamJob::Pull, Some(shared)) => shared.borrow_mut().begin_pull(),
                (StreamJob::Start, Some(_)) => true,
                (_, None) => false,
            };
            if !wanted {
                continue;
            }
            let Some(Producer {
                mut source,
                mut controller,
            }) = producer.take()
            else {
                return Poll::Ready(());
            };

            in_flight = Some(match job {
                StreamJob::Start => {
                    trace!("invoking start");
                    let callback = async move {
                        let result = source.start(&mut controller).await;
                        (Producer { source, controller }, result)
                    };
                    (Invoked::Start, callback.boxed_local())
                }
                StreamJob::Pull => {
                    trace!("invoking pull");
                    let callback = async move {
                        let result = source.pull(&mut controller).await;
                        (Producer { source, controller }, result)
                    };
                    (Invoked::Pull, callback.boxed_local())
                }
                StreamJob::Cancel { reason, completion } => {
                    trace!(?reason, "invoking cancel");
                    let callback = async move {
                        let result = source.cancel(reason).await;
                        (Producer { source, controller }, result)
                    };
                    (Invoked::Cancel(completion), callback.boxed_local())
                }
            });
        }
    })
    .await;

    debug!("stream task finished");
}

fn cancel_outstanding<C>(jobs: &JobQueue, in_flight: &Option<(Invoked, C)>) -> bool {
    matches!(in_flight, Some((Invoked::Cancel(_), _)))
        || jobs
            .borrow()
            .iter()
            .any(|job| matches!(job, StreamJob::Cancel { .. }))
}

/// Start and pull outcomes are dropped once the stream is gone.
fn settle<T>(shared: Option<&SharedInner<T>>, invoked: Invoked, result: StreamResult<()>) {
    match (invoked, shared) {
        (Invoked::Start, Some(shared)) => shared.borrow_mut().start_finished(result),
        (Invoked::Pull, Some(shared)) => shared.borrow_mut().pull_finished(result),
        (Invoked::Start | Invoked::Pull, None) => {}
        (Invoked::Cancel(completion), _) => match result {
            Ok(()) => {
                trace!("cancel settled");
                completion.resolve(());
            }
            Err(error) => {
                warn!(%error, "source cancel failed");
                completion.reject(error);
            }
        },
    }
}
