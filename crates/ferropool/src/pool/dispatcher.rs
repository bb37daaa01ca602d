//! FIFO assignment of queued jobs to idle workers.
//!
//! The [`Dispatcher`] owns the job queue and the idle-worker set. It is the
//! only place work is handed to workers: every call to
//! [`Dispatcher::dispatch`] pairs the queue head with the longest-idle worker
//! until one side runs out. Workers announce that they became idle on an
//! unbounded channel; the consumer of a run feeds those ids back through
//! [`Dispatcher::release`], which is what re-triggers dispatching.
//!
//! A dispatcher lives as long as its pool and is lent to one run at a time.

use super::worker::{Job, WorkRequest};
use crate::{Error, Result};
use std::collections::VecDeque;
use tokio::sync::mpsc::{self, error::TrySendError};

pub(crate) struct Dispatcher {
    workers: Vec<mpsc::Sender<WorkRequest>>,
    /// Idle workers, longest-idle first.
    idle: VecDeque<usize>,
    /// Jobs not yet handed to a worker, in index order.
    queue: VecDeque<Job>,
    idle_rx: mpsc::UnboundedReceiver<usize>,
}

impl Dispatcher {
    /// Builds a dispatcher over freshly spawned workers, all of them idle.
    pub(crate) fn new(
        workers: Vec<mpsc::Sender<WorkRequest>>,
        idle_rx: mpsc::UnboundedReceiver<usize>,
    ) -> Self {
        Self {
            idle: (0..workers.len()).collect(),
            queue: VecDeque::new(),
            workers,
            idle_rx,
        }
    }

    pub(crate) fn enqueue(&mut self, job: Job) {
        self.queue.push_back(job);
    }

    /// Drops every job that was never handed to a worker.
    pub(crate) fn discard_queued(&mut self) -> usize {
        let discarded = self.queue.len();
        self.queue.clear();
        discarded
    }

    /// Marks `worker_id` idle again.
    pub(crate) fn release(&mut self, worker_id: usize) {
        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {worker_id} is idle");
        self.idle.push_back(worker_id);
    }

    /// Waits until some worker reports that it became idle.
    ///
    /// Resolves to `None` once every worker has stopped.
    pub(crate) async fn next_idle(&mut self) -> Option<usize> {
        self.idle_rx.recv().await
    }

    /// Hands queued jobs to idle workers, in queue order, until either the
    /// queue or the idle set is empty. Returns the number of jobs handed out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelError`] if a worker's request channel is
    /// closed. The job that could not be delivered is dropped.
    pub(crate) fn dispatch(&mut self) -> Result<usize> {
        let mut dispatched = 0;

        while let Some(job) = self.queue.pop_front() {
            let Some(worker_id) = self.idle.pop_front() else {
                self.queue.push_front(job);
                break;
            };

            match self.workers[worker_id].try_send(WorkRequest::Run { job }) {
                Ok(()) => dispatched += 1,
                Err(TrySendError::Full(request)) => {
                    // Still draining an earlier request; it reports idle again
                    // once that one finishes.
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Worker {worker_id} was not idle; requeueing job");
                    if let WorkRequest::Run { job } = request {
                        self.queue.push_front(job);
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    return Err(Error::ChannelError {
                        context: format!("Worker {worker_id} channel closed"),
                    });
                }
            }
        }

        #[cfg(feature = "tracing")]
        if dispatched > 0 {
            tracing::trace!(
                dispatched,
                queued = self.queue.len(),
                idle = self.idle.len(),
                "Dispatched jobs"
            );
        }

        Ok(dispatched)
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.idle.len()
    }
}
