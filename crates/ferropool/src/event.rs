use crate::TaskFailure;
use tokio::sync::mpsc;

/// The outcome of one task as reported by a worker.
///
/// Produced exactly once per task. The input travels back with the outcome so
/// that the run's handlers can see what was evaluated.
#[derive(Debug)]
pub(crate) struct CompletionEvent<I, O> {
    pub(crate) index: usize,
    pub(crate) input: I,
    pub(crate) outcome: Result<O, TaskFailure>,
}

/// A message on a run's completion channel.
#[derive(Debug)]
pub(crate) enum Completion<I, O> {
    /// The task finished, successfully or not.
    Finished(CompletionEvent<I, O>),
    /// The job was dropped before its task finished.
    Lost { index: usize },
}

/// Sending half of a run's completion channel, bound to a single task.
///
/// A slot reports at most once. If it is dropped without reporting (the job
/// was discarded or its worker went away), it reports
/// [`Completion::Lost`] instead so the run never waits on a task that can no
/// longer finish.
pub(crate) struct CompletionSlot<I, O> {
    index: usize,
    tx: Option<mpsc::UnboundedSender<Completion<I, O>>>,
}

impl<I, O> CompletionSlot<I, O> {
    pub(crate) const fn new(index: usize, tx: mpsc::UnboundedSender<Completion<I, O>>) -> Self {
        Self {
            index,
            tx: Some(tx),
        }
    }

    pub(crate) fn complete(mut self, input: I, outcome: Result<O, TaskFailure>) {
        if let Some(tx) = self.tx.take() {
            let event = CompletionEvent {
                index: self.index,
                input,
                outcome,
            };
            // The receiver is gone when the run was abandoned.
            if tx.send(Completion::Finished(event)).is_err() {
                #[cfg(feature = "tracing")]
                tracing::debug!(index = self.index, "Discarding result of abandoned run");
            }
        }
    }
}

impl<I, O> Drop for CompletionSlot<I, O> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Completion::Lost { index: self.index });
        }
    }
}

/// Full per-task detail yielded by
/// [`Pool::imap_unordered_extended`](crate::Pool::imap_unordered_extended).
///
/// Exactly one of [`result`](Self::result) and [`error`](Self::error) is
/// present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskResponse<O> {
    /// Position of the task's input in enumeration order (0-based).
    pub index: usize,
    pub outcome: Result<O, TaskFailure>,
}

impl<O> TaskResponse<O> {
    pub fn result(&self) -> Option<&O> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&str> {
        self.outcome.as_ref().err().map(TaskFailure::message)
    }

    pub const fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Drops the error detail, keeping only the result.
    pub fn into_result(self) -> Option<O> {
        self.outcome.ok()
    }
}

impl<I, O> From<CompletionEvent<I, O>> for TaskResponse<O> {
    fn from(event: CompletionEvent<I, O>) -> Self {
        Self {
            index: event.index,
            outcome: event.outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_reports_exactly_once() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Completion<u8, u8>>();

        CompletionSlot::new(3, tx.clone()).complete(9, Ok(81));
        drop(CompletionSlot::new(4, tx));

        match rx.try_recv() {
            Ok(Completion::Finished(event)) => {
                assert_eq!(event.index, 3);
                assert_eq!(event.input, 9);
                assert_eq!(event.outcome, Ok(81));
            }
            other => panic!("unexpected completion: {other:?}"),
        }
        assert!(matches!(rx.try_recv(), Ok(Completion::Lost { index: 4 })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn response_exposes_one_side() {
        let ok = TaskResponse::<u8> {
            index: 0,
            outcome: Ok(1),
        };
        assert_eq!(ok.result(), Some(&1));
        assert_eq!(ok.error(), None);

        let failed = TaskResponse::<u8> {
            index: 1,
            outcome: Err(TaskFailure::new("boom")),
        };
        assert_eq!(failed.result(), None);
        assert_eq!(failed.error(), Some("boom"));
        assert_eq!(failed.into_result(), None);
    }
}
