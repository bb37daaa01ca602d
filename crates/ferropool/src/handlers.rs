use std::panic::{AssertUnwindSafe, catch_unwind};

type SuccessHandler<I, O> = Box<dyn FnMut(&O, &I, usize) + Send>;
type ErrorHandler<I> = Box<dyn FnMut(&str, &I, usize) + Send>;

/// Per-run observers notified as each task completes.
///
/// Each task triggers exactly one of the two handlers, on the consuming side
/// of the run, before its value is yielded. Handlers belong to the run they
/// were passed to and are dropped when it ends.
///
/// A panicking handler is contained: the run carries on, the panic is counted
/// in [`Pool::handler_panics`](crate::Pool::handler_panics) and, with the
/// `tracing` feature, logged at `error` level.
///
/// ```
/// use ferropool::Handlers;
///
/// let handlers = Handlers::<u32, u32>::default()
///     .on_success(|result, input, index| println!("#{index}: {input} -> {result}"))
///     .on_error(|error, input, index| eprintln!("#{index}: {input} failed: {error}"));
/// ```
pub struct Handlers<I, O> {
    on_success: Option<SuccessHandler<I, O>>,
    on_error: Option<ErrorHandler<I>>,
}

impl<I, O> Default for Handlers<I, O> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
        }
    }
}

impl<I, O> Handlers<I, O> {
    /// Sets the handler called with `(result, input, index)` when a task
    /// succeeds.
    #[must_use]
    pub fn on_success(mut self, handler: impl FnMut(&O, &I, usize) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(handler));
        self
    }

    /// Sets the handler called with `(error, input, index)` when a task fails.
    #[must_use]
    pub fn on_error(mut self, handler: impl FnMut(&str, &I, usize) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// Invokes the handler matching `outcome`. Returns `true` if it panicked.
    pub(crate) fn notify(
        &mut self,
        outcome: &Result<O, crate::TaskFailure>,
        input: &I,
        index: usize,
    ) -> bool {
        let caught = match outcome {
            Ok(result) => match self.on_success.as_mut() {
                Some(handler) => catch_unwind(AssertUnwindSafe(|| handler(result, input, index))),
                None => Ok(()),
            },
            Err(failure) => match self.on_error.as_mut() {
                Some(handler) => {
                    catch_unwind(AssertUnwindSafe(|| handler(failure.message(), input, index)))
                }
                None => Ok(()),
            },
        };

        let Err(_payload) = caught else {
            return false;
        };
        #[cfg(feature = "tracing")]
        tracing::error!(
            index,
            panic = %crate::TaskFailure::from_panic(_payload),
            "Task handler panicked; continuing run"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskFailure;

    #[test]
    fn panics_are_contained_and_reported() {
        let mut handlers = Handlers::<u8, u8>::default()
            .on_success(|_, _, index| assert!(index != 1, "success handler failure"))
            .on_error(|_, _, _| panic!("error handler failure"));

        assert!(!handlers.notify(&Ok(1), &1, 0));
        assert!(handlers.notify(&Ok(2), &2, 1));
        assert!(handlers.notify(&Err(TaskFailure::new("nope")), &3, 2));
    }

    #[test]
    fn missing_handlers_are_a_no_op() {
        let mut handlers = Handlers::<u8, u8>::default();
        assert!(!handlers.notify(&Ok(1), &1, 0));
        assert!(!handlers.notify(&Err(TaskFailure::new("nope")), &1, 1));
    }
}
