//! The worker pool and its consumption disciplines.
//!
//! A [`Pool`] owns a fixed set of workers for its whole lifetime. Each call
//! to one of its mapping methods is a *run*: the inputs are enumerated and
//! indexed, queued, handed to idle workers in index order, and their
//! completions are drained back into one of four shapes:
//!
//! - [`Pool::map`] - eager, input order.
//! - [`Pool::imap`] - lazy, input order.
//! - [`Pool::imap_unordered`] - lazy, completion order.
//! - [`Pool::imap_unordered_extended`] - lazy, completion order, with index
//!   and error detail.
//!
//! Only one run may be active on a pool at a time. A run is driven by its
//! own task, so dispatch and handlers make progress whether or not the
//! consumer is reading the stream.
//!
//! ## Structure
//!
//! - `dispatcher` - job queue and idle-worker set.
//! - `worker` - the worker task loop.
//! - `run` - the per-run driver task.
//! - `stream` - the lazy result streams.

mod dispatcher;
mod run;
mod stream;
mod worker;


pub use stream::{Imap, ImapUnordered, UnorderedExtended};

use crate::{Error, Handlers, PoolConfig, Result, Task, TaskResponse};
use dispatcher::Dispatcher;
use futures::TryStreamExt;
use portable_atomic::{AtomicBool, AtomicU64, Ordering};
use run::RunContext;
use std::sync::Arc;
use tokio::{
    runtime::Handle,
    sync::{Mutex, Semaphore, mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use worker::{WorkRequest, worker_loop};

/// Lifecycle state of a [`Pool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolState {
    /// Ready to start a run.
    Idle,
    /// A run currently owns the pool: its stream has not ended nor been
    /// dropped.
    Running,
    /// Closed or shutting down; no further runs are accepted.
    Closed,
}

/// A fixed-size pool of asynchronous workers.
///
/// Workers are spawned on the current Tokio runtime when the pool is built
/// and run until the pool is closed, shut down, or dropped. At most
/// `pool_size` tasks execute at once; the remaining inputs of a run wait in a
/// FIFO queue.
///
/// # Example
///
/// ```
/// use ferropool::{Handlers, Pool, from_fn};
///
/// # #[tokio::main(flavor = "multi_thread")]
/// # async fn main() -> ferropool::Result<()> {
/// let pool = Pool::new(2)?;
/// let square = from_fn("square", |x: &u64| Ok::<_, String>(x * x));
///
/// let squares = pool.map([1, 2, 3, 4], square, Handlers::default()).await?;
/// assert_eq!(squares, vec![Some(1), Some(4), Some(9), Some(16)]);
///
/// pool.close();
/// # Ok(())
/// # }
/// ```
pub struct Pool {
    config: PoolConfig,
    runtime: Handle,
    workers: Vec<mpsc::Sender<WorkRequest>>,
    dispatcher: Arc<Mutex<Dispatcher>>,
    /// One permit, held by the stream of the active run.
    run_gate: Arc<Semaphore>,
    shutdown_token: CancellationToken,
    accepting: AtomicBool,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    handler_panics: Arc<AtomicU64>,
    next_run_id: AtomicU64,
}

impl Pool {
    /// Builds a pool of `pool_size` workers.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfiguration`] if `pool_size` is 0.
    /// - [`Error::RuntimeUnavailable`] if called outside a Tokio runtime.
    pub fn new(pool_size: usize) -> Result<Self> {
        Self::with_config(PoolConfig::new(pool_size))
    }

    /// Builds a pool from a full [`PoolConfig`].
    ///
    /// # Errors
    ///
    /// Same as [`Pool::new`].
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|_| Error::RuntimeUnavailable)?;

        let shutdown_token = CancellationToken::new();
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let mut workers = Vec::with_capacity(config.pool_size);
        let mut worker_handles = Vec::with_capacity(config.pool_size);

        for worker_id in 0..config.pool_size {
            // Capacity 1: the dispatcher only hands a job to an idle worker,
            // so at most one request is ever waiting in the channel.
            let (tx, rx) = mpsc::channel(1);
            workers.push(tx);
            worker_handles.push(handle.spawn(worker_loop(
                worker_id,
                rx,
                idle_tx.clone(),
                shutdown_token.clone(),
            )));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Started worker pool with {} workers", config.pool_size);

        Ok(Self {
            dispatcher: Arc::new(Mutex::new(Dispatcher::new(workers.clone(), idle_rx))),
            run_gate: Arc::new(Semaphore::new(1)),
            runtime: handle,
            workers,
            config,
            shutdown_token,
            accepting: AtomicBool::new(true),
            worker_handles: Mutex::new(worker_handles),
            handler_panics: Arc::new(AtomicU64::new(0)),
            next_run_id: AtomicU64::new(0),
        })
    }

    /// Number of workers in the pool.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn state(&self) -> PoolState {
        if self.is_closed() {
            PoolState::Closed
        } else if self.run_gate.available_permits() == 0 {
            PoolState::Running
        } else {
            PoolState::Idle
        }
    }

    pub fn is_closed(&self) -> bool {
        !self.accepting.load(Ordering::Acquire) || self.shutdown_token.is_cancelled()
    }

    /// Number of `on_success` / `on_error` calls that panicked over the
    /// lifetime of the pool. Such panics never abort a run.
    pub fn handler_panics(&self) -> u64 {
        self.handler_panics.load(Ordering::Relaxed)
    }

    /// Runs `task` on every input and returns the results in input order.
    ///
    /// The returned vector has one entry per input; a failed task leaves
    /// `None` at its position and is reported to `handlers`.
    ///
    /// # Errors
    ///
    /// - [`Error::RunInProgress`] if another run owns the pool.
    /// - [`Error::PoolClosed`] if the pool is closed before or during the run.
    /// - [`Error::WorkerLost`] / [`Error::ChannelError`] if a worker vanished.
    pub async fn map<T, It>(
        &self,
        inputs: It,
        task: T,
        handlers: Handlers<T::Input, T::Output>,
    ) -> Result<Vec<Option<T::Output>>>
    where
        T: Task,
        It: IntoIterator<Item = T::Input>,
    {
        let mut responses: Vec<TaskResponse<T::Output>> = self
            .imap_unordered_extended(inputs, task, handlers)?
            .try_collect()
            .await?;

        responses.sort_unstable_by_key(|response| response.index);
        Ok(responses
            .into_iter()
            .map(TaskResponse::into_result)
            .collect())
    }

    /// Runs `task` on every input and streams the results in input order.
    ///
    /// Inputs are enumerated eagerly and dispatch starts right away on a
    /// task of its own; results are buffered until the stream is read.
    /// Dropping the stream stops dispatch of the tasks not yet started.
    ///
    /// # Errors
    ///
    /// [`Error::RunInProgress`] or [`Error::PoolClosed`]. Errors raised later
    /// in the run are yielded by the stream.
    pub fn imap<T, It>(
        &self,
        inputs: It,
        task: T,
        handlers: Handlers<T::Input, T::Output>,
    ) -> Result<Imap<T::Output>>
    where
        T: Task,
        It: IntoIterator<Item = T::Input>,
    {
        Ok(Imap::new(self.imap_unordered_extended(inputs, task, handlers)?))
    }

    /// Runs `task` on every input and streams the results as tasks complete.
    ///
    /// # Errors
    ///
    /// Same as [`Pool::imap`].
    pub fn imap_unordered<T, It>(
        &self,
        inputs: It,
        task: T,
        handlers: Handlers<T::Input, T::Output>,
    ) -> Result<ImapUnordered<T::Output>>
    where
        T: Task,
        It: IntoIterator<Item = T::Input>,
    {
        Ok(ImapUnordered::new(self.imap_unordered_extended(
            inputs, task, handlers,
        )?))
    }

    /// Runs `task` on every input and streams a [`TaskResponse`] per task as
    /// tasks complete.
    ///
    /// # Errors
    ///
    /// Same as [`Pool::imap`].
    pub fn imap_unordered_extended<T, It>(
        &self,
        inputs: It,
        task: T,
        handlers: Handlers<T::Input, T::Output>,
    ) -> Result<UnorderedExtended<T::Output>>
    where
        T: Task,
        It: IntoIterator<Item = T::Input>,
    {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }
        let reservation = Arc::clone(&self.run_gate)
            .try_acquire_owned()
            .map_err(|_| Error::RunInProgress)?;
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);

        let ctx = RunContext {
            runtime: &self.runtime,
            dispatcher: &self.dispatcher,
            shutdown: &self.shutdown_token,
            handler_panics: &self.handler_panics,
        };
        Ok(run::start(
            ctx,
            run_id,
            reservation,
            Arc::new(task),
            inputs,
            handlers,
        ))
    }

    /// Terminates every worker immediately.
    ///
    /// Tasks in flight are abandoned and their results are never delivered.
    /// An active run yields [`Error::PoolClosed`]. Calling `close` again has no
    /// effect.
    pub fn close(&self) {
        self.accepting.store(false, Ordering::Release);
        if self.shutdown_token.is_cancelled() {
            return;
        }

        self.shutdown_token.cancel();

        #[cfg(feature = "tracing")]
        tracing::debug!("Worker pool closed");
    }

    /// Gracefully shuts down all workers in the pool.
    ///
    /// - Refuses new runs.
    /// - Waits (up to `shutdown_timeout`) for the active run, if any, to end.
    /// - Sends a shutdown request to each worker and waits (up to
    ///   `shutdown_timeout` per worker) for acknowledgements.
    /// - Closes the pool and waits for the worker tasks to exit.
    ///
    /// On a pool that is already closed only the last step runs.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.shutdown_token.is_cancelled() {
            self.notify_workers().await;
        }

        // === Phase 3: Cancel anything left and wait for the workers ===
        self.close();
        let shutdown_timeout = self.config.shutdown_timeout;
        let handles = core::mem::take(&mut *self.worker_handles.lock().await);
        for (_i, handle) in handles.into_iter().enumerate() {
            match timeout(shutdown_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Worker {_i} task failed: {_e}");
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Worker {_i} still running after shutdown");
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool shutdown complete");

        Ok(())
    }

    /// Phases 0 to 2 of [`Pool::shutdown`].
    async fn notify_workers(&self) {
        let shutdown_timeout = self.config.shutdown_timeout;

        // === Phase 0: Stop accepting new runs ===
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new runs");
        self.accepting.store(false, Ordering::Release);

        // === Phase 1: Wait for the active run to finish ===
        match timeout(shutdown_timeout, self.dispatcher.lock()).await {
            Ok(_idle) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("No run in progress");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Active run still in progress after {shutdown_timeout:?}");
            }
        }

        // === Phase 2: Notify workers to shut down ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Notifying all workers to shut down");
        let acks = self
            .workers
            .iter()
            .enumerate()
            .map(|(_i, worker)| async move {
                let (tx, rx) = oneshot::channel();
                let request = WorkRequest::Shutdown { response: tx };
                match timeout(shutdown_timeout, worker.send(request)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!("Worker {_i} already stopped");
                        return;
                    }
                    Err(_) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Worker {_i} did not accept shutdown");
                        return;
                    }
                }

                match timeout(shutdown_timeout, rx).await {
                    Ok(Ok(())) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!("Worker {_i} shutdown acknowledged");
                    }
                    Ok(Err(_e)) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!("Worker {_i} dropped its acknowledgement: {_e}");
                    }
                    Err(_) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Worker {_i} shutdown timed out");
                    }
                }
            });
        futures::future::join_all(acks).await;
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.close();
    }
}

impl core::fmt::Debug for Pool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
