//! Lazy result streams returned by the pool.
//!
//! [`UnorderedExtended`] is the primitive: it drains a run's completion
//! channel and yields every task's [`TaskResponse`] in completion order.
//! [`ImapUnordered`] narrows it to the result, and [`Imap`] additionally
//! restores input order through an ordering buffer.
//!
//! The streams only read what the run's driver task produces: dispatching and
//! handler calls go on whether or not the consumer is polling.
//!
//! Every stream yields each task exactly once. A fatal run error (see
//! [`Error`]) is yielded as a single `Err` item, after which the stream ends.
//! The pool stays reserved for the run until the stream has ended or is
//! dropped.

use crate::{Error, Result, TaskResponse, ordering::OrderingBuffer};
use core::{
    pin::Pin,
    task::{Context, Poll, ready},
};
use futures::{Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::sync::{OwnedSemaphorePermit, mpsc};
use tokio_util::sync::DropGuard;

/// Completion-order stream of full task responses.
///
/// Dropping the stream before it ends abandons the run: inputs that were not
/// yet dispatched are discarded, and tasks already running finish and are
/// still reported to the run's handlers.
#[must_use = "streams do nothing unless polled"]
pub struct UnorderedExtended<O> {
    responses: Option<mpsc::UnboundedReceiver<Result<TaskResponse<O>>>>,
    /// Responses not yet yielded.
    remaining: usize,
    reservation: Option<OwnedSemaphorePermit>,
    _abandon: Option<DropGuard>,
}

impl<O> UnorderedExtended<O> {
    pub(crate) fn new(
        responses: mpsc::UnboundedReceiver<Result<TaskResponse<O>>>,
        total: usize,
        reservation: OwnedSemaphorePermit,
        abandon: DropGuard,
    ) -> Self {
        Self {
            responses: Some(responses),
            remaining: total,
            reservation: Some(reservation),
            _abandon: Some(abandon),
        }
    }

    /// A stream for a run without inputs.
    pub(crate) const fn empty() -> Self {
        Self {
            responses: None,
            remaining: 0,
            reservation: None,
            _abandon: None,
        }
    }

    /// Ends the stream and hands the pool back.
    fn finish(&mut self) {
        self.responses = None;
        self.reservation = None;
    }
}

impl<O> Stream for UnorderedExtended<O> {
    type Item = Result<TaskResponse<O>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(responses) = this.responses.as_mut() else {
            return Poll::Ready(None);
        };

        match ready!(responses.poll_recv(cx)) {
            Some(Ok(response)) => {
                this.remaining = this.remaining.saturating_sub(1);
                Poll::Ready(Some(Ok(response)))
            }
            Some(Err(e)) => {
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
            None if this.remaining == 0 => {
                this.finish();
                Poll::Ready(None)
            }
            None => {
                // The driver went away without reporting, e.g. its runtime
                // shut down.
                let remaining = this.remaining;
                this.finish();
                Poll::Ready(Some(Err(Error::ChannelError {
                    context: format!("run stopped with {remaining} results outstanding"),
                })))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.responses {
            Some(_) => (0, Some(self.remaining + 1)),
            None => (0, Some(0)),
        }
    }
}

/// Completion-order stream of task results; `None` marks a failed task.
#[must_use = "streams do nothing unless polled"]
pub struct ImapUnordered<O> {
    inner: UnorderedExtended<O>,
}

impl<O> ImapUnordered<O> {
    pub(crate) const fn new(inner: UnorderedExtended<O>) -> Self {
        Self { inner }
    }
}

impl<O> Stream for ImapUnordered<O> {
    type Item = Result<Option<O>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner
            .poll_next_unpin(cx)
            .map(|item| item.map(|response| response.map(TaskResponse::into_result)))
    }
}

pin_project! {
    /// Input-order stream of task results; `None` marks a failed task.
    ///
    /// A result is yielded as soon as every result before it has been
    /// yielded, so a slow task holds back the results queued behind it but
    /// not the ones ahead of it.
    #[must_use = "streams do nothing unless polled"]
    pub struct Imap<O> {
        #[pin]
        inner: UnorderedExtended<O>,
        buffer: OrderingBuffer<Option<O>>,
    }
}

impl<O> Imap<O> {
    pub(crate) const fn new(inner: UnorderedExtended<O>) -> Self {
        Self {
            inner,
            buffer: OrderingBuffer::new(),
        }
    }
}

impl<O> Stream for Imap<O> {
    type Item = Result<Option<O>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(value) = this.buffer.pop_ready() {
                return Poll::Ready(Some(Ok(value)));
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(response)) => {
                    let _index = response.index;
                    if !this.buffer.push(response.index, response.into_result()) {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(index = _index, "Dropping duplicate completion");
                    }
                }
                Some(Err(e)) => {
                    // The gap in front of them will never be filled.
                    let _discarded = this.buffer.clear();
                    #[cfg(feature = "tracing")]
                    if _discarded > 0 {
                        tracing::debug!(discarded = _discarded, "Dropping out-of-order results");
                    }
                    return Poll::Ready(Some(Err(e)));
                }
                None => return Poll::Ready(None),
            }
        }
    }
}
