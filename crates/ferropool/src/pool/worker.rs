use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// A unit of work prepared by a run: the task evaluation plus the delivery of
/// its completion event. Opaque to the worker.
pub(crate) type Job = BoxFuture<'static, ()>;

/// Messages a worker accepts on its request channel.
pub(crate) enum WorkRequest {
    /// Execute one job.
    Run { job: Job },
    /// Stop after acknowledging on `response`.
    Shutdown { response: oneshot::Sender<()> },
}

/// Worker task that executes [`Job`]s one at a time.
///
/// The worker listens on its own request channel (capacity 1, so at most one
/// job is ever handed to it ahead of time) and, after each job, reports its
/// id on `idle_tx` so the dispatcher can hand it the next one.
///
/// # Termination
///
/// - [`WorkRequest::Shutdown`]: acknowledges and stops.
/// - `shutdown` cancelled: stops immediately, dropping any in-flight job
///   without delivering its result.
/// - Request channel closed: stops.
pub(crate) async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<WorkRequest>,
    idle_tx: mpsc::UnboundedSender<usize>,
    shutdown: CancellationToken,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");

    loop {
        let work = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            work = rx.recv() => work,
        };

        match work {
            Some(WorkRequest::Run { job }) => {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Worker {worker_id} terminated with a job in flight");
                        break;
                    }
                    () = job => {}
                }

                if idle_tx.send(worker_id).is_err() {
                    // The pool is gone; nobody will dispatch to us again.
                    break;
                }
            }
            Some(WorkRequest::Shutdown { response }) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
            None => break,
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped");
}
