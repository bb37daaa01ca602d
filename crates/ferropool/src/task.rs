//! Task definitions executed by the pool's workers.
//!
//! A task definition is any type implementing [`Task`]. The compiled type is
//! the identifier shared by the orchestrator and every worker, so nothing but
//! plain input values ever travels to a worker. A run keeps its definition
//! behind a [`TaskRef`] and hands each job a clone of it.

use core::{any::Any, fmt, future::Future, marker::PhantomData};
use std::sync::Arc;

/// Shared, cheaply clonable reference to a task definition.
pub type TaskRef<T> = Arc<T>;

/// The outcome of a task that did not produce a result.
///
/// A task that returns an error and a task that panics are reported the same
/// way: as a human-readable message. A failure is local to its task; it never
/// aborts the run or disables the worker that executed it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[error("{message}")]
pub struct TaskFailure {
    message: String,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Builds a failure from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked".to_string()
        };
        Self { message }
    }
}

impl From<String> for TaskFailure {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for TaskFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// A computation the pool can run against each input of a run.
///
/// # Example
///
/// ```
/// use ferropool::{Task, TaskFailure};
///
/// struct Square;
///
/// impl Task for Square {
///     type Input = u64;
///     type Output = u64;
///
///     async fn run(&self, input: &u64) -> Result<u64, TaskFailure> {
///         Ok(input * input)
///     }
/// }
/// ```
pub trait Task: Send + Sync + 'static {
    type Input: Send + Sync + 'static;
    type Output: Send + 'static;

    /// Name used in logs. Defaults to the implementing type's name.
    fn name(&self) -> &str {
        core::any::type_name::<Self>()
    }

    /// Evaluates the task against one input.
    ///
    /// # Errors
    ///
    /// Returns a [`TaskFailure`] describing why no result was produced.
    fn run(
        &self,
        input: &Self::Input,
    ) -> impl Future<Output = Result<Self::Output, TaskFailure>> + Send;
}

impl<T: Task> Task for Arc<T> {
    type Input = T::Input;
    type Output = T::Output;

    fn name(&self) -> &str {
        (**self).name()
    }

    fn run(
        &self,
        input: &Self::Input,
    ) -> impl Future<Output = Result<Self::Output, TaskFailure>> + Send {
        (**self).run(input)
    }
}

/// A [`Task`] backed by a synchronous closure, executed directly on the
/// worker. Created by [`from_fn`].
pub struct FnTask<F, I, O, E> {
    name: &'static str,
    f: F,
    _marker: PhantomData<fn(&I) -> Result<O, E>>,
}

/// Wraps `f` into a [`Task`] named `name`.
///
/// Any `Err` returned by `f` becomes a [`TaskFailure`] carrying its
/// [`Display`](fmt::Display) output.
pub fn from_fn<F, I, O, E>(name: &'static str, f: F) -> FnTask<F, I, O, E>
where
    F: Fn(&I) -> Result<O, E> + Send + Sync + 'static,
    I: Send + Sync + 'static,
    O: Send + 'static,
    E: fmt::Display + 'static,
{
    FnTask {
        name,
        f,
        _marker: PhantomData,
    }
}

impl<F, I, O, E> Task for FnTask<F, I, O, E>
where
    F: Fn(&I) -> Result<O, E> + Send + Sync + 'static,
    I: Send + Sync + 'static,
    O: Send + 'static,
    E: fmt::Display + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        self.name
    }

    fn run(&self, input: &I) -> impl Future<Output = Result<O, TaskFailure>> + Send {
        async move { (self.f)(input).map_err(|e| TaskFailure::new(e.to_string())) }
    }
}

/// A [`Task`] backed by a synchronous closure, executed on Tokio's blocking
/// thread pool. Created by [`blocking_fn`].
///
/// Use this for CPU-bound work so that a long computation does not stall the
/// runtime threads the pool's workers are scheduled on. The input is cloned
/// into the blocking thread.
pub struct BlockingTask<F, I, O, E> {
    name: &'static str,
    f: Arc<F>,
    _marker: PhantomData<fn(&I) -> Result<O, E>>,
}

/// Wraps `f` into a [`Task`] named `name` that runs via
/// [`tokio::task::spawn_blocking`].
pub fn blocking_fn<F, I, O, E>(name: &'static str, f: F) -> BlockingTask<F, I, O, E>
where
    F: Fn(&I) -> Result<O, E> + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    BlockingTask {
        name,
        f: Arc::new(f),
        _marker: PhantomData,
    }
}

impl<F, I, O, E> Task for BlockingTask<F, I, O, E>
where
    F: Fn(&I) -> Result<O, E> + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        self.name
    }

    fn run(&self, input: &I) -> impl Future<Output = Result<O, TaskFailure>> + Send {
        let f = Arc::clone(&self.f);
        let input = input.clone();
        async move {
            match tokio::task::spawn_blocking(move || f(&input)).await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(TaskFailure::new(e.to_string())),
                Err(join) if join.is_panic() => Err(TaskFailure::from_panic(join.into_panic())),
                Err(join) => Err(TaskFailure::new(join.to_string())),
            }
        }
    }
}
