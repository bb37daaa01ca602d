use super::{dispatcher::Dispatcher, stream::UnorderedExtended, worker::Job};
use crate::{
    Error, Handlers, Result, Task, TaskFailure, TaskRef, TaskResponse,
    event::{Completion, CompletionEvent, CompletionSlot},
};
use futures::FutureExt;
use portable_atomic::{AtomicU64, Ordering};
use std::{panic::AssertUnwindSafe, sync::Arc};
use tokio::{
    runtime::Handle,
    sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, mpsc},
};
use tokio_util::sync::CancellationToken;

/// Sending half of the channel a run's driver yields responses on.
pub(crate) type ResponseTx<O> = mpsc::UnboundedSender<Result<TaskResponse<O>>>;

/// Pool-owned resources a run borrows.
pub(crate) struct RunContext<'a> {
    pub(crate) runtime: &'a Handle,
    pub(crate) dispatcher: &'a Arc<Mutex<Dispatcher>>,
    pub(crate) shutdown: &'a CancellationToken,
    pub(crate) handler_panics: &'a Arc<AtomicU64>,
}

/// Enumerates `inputs`, spawns the run's driver and returns the stream its
/// responses arrive on.
///
/// `reservation` is what makes runs on one pool exclusive; the stream holds
/// it until it ends or is dropped. A run without inputs releases it
/// immediately and spawns nothing.
pub(crate) fn start<T: Task>(
    ctx: RunContext<'_>,
    _run_id: u64,
    reservation: OwnedSemaphorePermit,
    task: TaskRef<T>,
    inputs: impl IntoIterator<Item = T::Input>,
    handlers: Handlers<T::Input, T::Output>,
) -> UnorderedExtended<T::Output> {
    let (completion_tx, completions) = mpsc::unbounded_channel();
    let jobs: Vec<Job> = inputs
        .into_iter()
        .enumerate()
        .map(|(index, input)| {
            let slot = CompletionSlot::new(index, completion_tx.clone());
            job(Arc::clone(&task), index, input, slot)
        })
        .collect();
    drop(completion_tx);

    let total = jobs.len();
    if total == 0 {
        return UnorderedExtended::empty();
    }

    let (responses, rx) = mpsc::unbounded_channel();
    let abandoned = CancellationToken::new();
    let pending: PendingRun<T> = PendingRun {
        jobs,
        completions,
        handlers,
        responses,
        shutdown: ctx.shutdown.clone(),
        abandoned: abandoned.clone(),
        handler_panics: Arc::clone(ctx.handler_panics),
    };

    let drive = pending.drive(Arc::clone(ctx.dispatcher));
    #[cfg(feature = "tracing")]
    let drive = tracing::Instrument::instrument(
        drive,
        tracing::debug_span!("run", run_id = _run_id, task = task.name(), tasks = total),
    );
    ctx.runtime.spawn(drive);

    UnorderedExtended::new(rx, total, reservation, abandoned.drop_guard())
}

/// A run whose jobs are built but which does not own the dispatcher yet.
struct PendingRun<T: Task> {
    jobs: Vec<Job>,
    completions: mpsc::UnboundedReceiver<Completion<T::Input, T::Output>>,
    handlers: Handlers<T::Input, T::Output>,
    responses: ResponseTx<T::Output>,
    shutdown: CancellationToken,
    abandoned: CancellationToken,
    handler_panics: Arc<AtomicU64>,
}

impl<T: Task> PendingRun<T> {
    /// Waits for the dispatcher (the previous run may still be draining its
    /// in-flight tasks), then drives the run to its end.
    async fn drive(self, dispatcher: Arc<Mutex<Dispatcher>>) {
        let dispatcher = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => {
                let _ = self.responses.send(Err(Error::PoolClosed));
                return;
            }
            () = self.abandoned.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Run abandoned before it was dispatched");
                return;
            }
            guard = dispatcher.lock_owned() => guard,
        };

        RunDriver::new(self, dispatcher).run().await;
    }
}

/// State of one run while it owns the dispatcher.
///
/// The driver dispatches whenever a worker turns idle and invokes the
/// handlers as each task completes, independently of how fast the consumer
/// reads the responses.
struct RunDriver<T: Task> {
    // Dropped before `responses`, so the pool is free again by the time the
    // consumer sees the end of the stream.
    dispatcher: OwnedMutexGuard<Dispatcher>,
    completions: mpsc::UnboundedReceiver<Completion<T::Input, T::Output>>,
    handlers: Handlers<T::Input, T::Output>,
    shutdown: CancellationToken,
    abandoned: CancellationToken,
    handler_panics: Arc<AtomicU64>,
    total: usize,
    received: usize,
    /// Set once the consumer dropped its stream: nothing more is dispatched,
    /// tasks already running are still drained through the handlers.
    draining: bool,
    responses: ResponseTx<T::Output>,
}

impl<T: Task> RunDriver<T> {
    fn new(pending: PendingRun<T>, mut dispatcher: OwnedMutexGuard<Dispatcher>) -> Self {
        let total = pending.jobs.len();
        for job in pending.jobs {
            dispatcher.enqueue(job);
        }

        Self {
            dispatcher,
            completions: pending.completions,
            handlers: pending.handlers,
            shutdown: pending.shutdown,
            abandoned: pending.abandoned,
            handler_panics: pending.handler_panics,
            total,
            received: 0,
            draining: false,
            responses: pending.responses,
        }
    }

    async fn run(mut self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("Run started");

        match self.drain().await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(completed = self.received, "Run finished");
            }
            Err(e) => {
                self.dispatcher.discard_queued();
                #[cfg(feature = "tracing")]
                tracing::warn!("Run failed: {e}");
                let _ = self.responses.send(Err(e));
            }
        }
    }

    /// Dispatches and drains until every task has reported.
    async fn drain(&mut self) -> Result<()> {
        while self.received < self.total {
            self.dispatcher.dispatch()?;

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Err(Error::PoolClosed),
                () = self.abandoned.cancelled(), if !self.draining => self.abandon(),
                Some(worker_id) = self.dispatcher.next_idle() => self.dispatcher.release(worker_id),
                completion = self.completions.recv() => match completion {
                    Some(Completion::Finished(event)) => self.complete(event),
                    // Discarded by `abandon`.
                    Some(Completion::Lost { .. }) if self.draining => self.received += 1,
                    Some(Completion::Lost { index }) => return Err(Error::WorkerLost { index }),
                    None => {
                        return Err(Error::ChannelError {
                            context: format!(
                                "completion channel closed with {} tasks outstanding",
                                self.total - self.received
                            ),
                        });
                    }
                },
            }
        }
        Ok(())
    }

    fn complete(&mut self, event: CompletionEvent<T::Input, T::Output>) {
        self.received += 1;
        #[cfg(feature = "tracing")]
        tracing::trace!(index = event.index, ok = event.outcome.is_ok(), "Task completed");

        if self
            .handlers
            .notify(&event.outcome, &event.input, event.index)
        {
            self.handler_panics.fetch_add(1, Ordering::Relaxed);
        }
        // Fails only once the consumer is gone.
        let _ = self.responses.send(Ok(event.into()));
    }

    fn abandon(&mut self) {
        self.draining = true;
        let _discarded = self.dispatcher.discard_queued();
        #[cfg(feature = "tracing")]
        tracing::debug!(
            completed = self.received,
            discarded = _discarded,
            "Run abandoned; draining tasks in flight"
        );
    }
}

impl<T: Task> Drop for RunDriver<T> {
    fn drop(&mut self) {
        // Only non-empty if the driver itself was dropped mid-run.
        self.dispatcher.discard_queued();
    }
}

/// Builds the job that evaluates `task` on `input` and reports through
/// `slot`. A panic inside the task is reported as a [`TaskFailure`].
fn job<T: Task>(
    task: TaskRef<T>,
    _index: usize,
    input: T::Input,
    slot: CompletionSlot<T::Input, T::Output>,
) -> Job {
    Box::pin(async move {
        #[cfg(feature = "tracing")]
        tracing::trace!(index = _index, "Task dispatched");

        let outcome = AssertUnwindSafe(async { task.run(&input).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(TaskFailure::from_panic(payload)));

        slot.complete(input, outcome);
    })
}
