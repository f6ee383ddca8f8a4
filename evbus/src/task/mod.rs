//! One-shot deferred computations.
//!
//! A [`Task<T>`] describes work that will eventually produce either a `T` or a
//! [`Failure`]. Nothing happens until the task is [run](Task::run) (or awaited
//! from a [`coroutine`](crate::coroutine::coroutine)), and a task can be run at
//! most once: `run` consumes it. Dropping a task without running it is the only
//! form of cancellation.
//!
//! Continuations are always invoked on the thread that owns the reactor, either
//! synchronously from within `run` or later from a reactor turn.
use crate::error::Failure;
use anyhow::Result;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

mod combinators;
pub use combinators::{foreach, race};
pub(crate) use combinators::sequence;

mod future;
pub use future::TaskFuture;

pub type PassFn<T> = Box<dyn FnOnce(T)>;
pub type FailFn = Box<dyn FnOnce(Failure)>;

/// The pair of callbacks a running task resolves into, exactly once.
pub(crate) struct Continuation<T> {
    pass: PassFn<T>,
    fail: FailFn,
}

impl<T> Continuation<T> {
    pub(crate) fn new(pass: PassFn<T>, fail: FailFn) -> Self {
        Self { pass, fail }
    }

    pub(crate) fn succeed(self, value: T) {
        (self.pass)(value)
    }

    pub(crate) fn fail(self, failure: Failure) {
        (self.fail)(failure)
    }

    pub(crate) fn deliver(self, result: Result<T>) {
        match result {
            Ok(value) => self.succeed(value),
            Err(failure) => self.fail(failure),
        }
    }
}

/// A continuation reachable from both the success and failure path of an inner
/// task. Whichever path fires first takes it.
pub(crate) struct SharedContinuation<T>(Rc<Cell<Option<Continuation<T>>>>);

impl<T> SharedContinuation<T> {
    pub(crate) fn new(k: Continuation<T>) -> Self {
        Self(Rc::new(Cell::new(Some(k))))
    }

    pub(crate) fn take(&self) -> Option<Continuation<T>> {
        self.0.take()
    }
}

impl<T> Clone for SharedContinuation<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

#[must_use = "tasks do nothing unless run or awaited"]
pub struct Task<T> {
    core: Box<dyn FnOnce(PassFn<T>, FailFn)>,
}

impl<T: 'static> Task<T> {
    /// Builds a task from the closure that starts the work.
    ///
    /// The closure receives the success and failure callbacks and must arrange
    /// for exactly one of them to be called exactly once.
    pub fn new<F>(core: F) -> Self
    where
        F: FnOnce(PassFn<T>, FailFn) + 'static,
    {
        Self {
            core: Box::new(core),
        }
    }

    /// A task that immediately resolves with `value`.
    pub fn lift(value: T) -> Self {
        Task::new(move |pass, _| pass(value))
    }

    /// A task that immediately fails with `failure`.
    pub fn fail(failure: impl Into<Failure>) -> Self {
        let failure = failure.into();
        Task::new(move |_, fail| fail(failure))
    }

    pub fn from_result(result: Result<T>) -> Self {
        Task::new(move |pass, fail| Continuation::new(pass, fail).deliver(result))
    }

    /// Starts the task. Exactly one of `on_success` and `on_failure` will be
    /// invoked, exactly once.
    pub fn run<S, F>(self, on_success: S, on_failure: F)
    where
        S: FnOnce(T) + 'static,
        F: FnOnce(Failure) + 'static,
    {
        (self.core)(Box::new(on_success), Box::new(on_failure))
    }

    pub(crate) fn run_with(self, k: Continuation<T>) {
        (self.core)(k.pass, k.fail)
    }

    /// Sequential composition: on success feed the value into `f` and continue
    /// with the task it returns. Failures skip `f` and propagate unchanged.
    pub fn then<U, F>(self, f: F) -> Task<U>
    where
        U: 'static,
        F: FnOnce(T) -> Task<U> + 'static,
    {
        Task::new(move |pass, fail| {
            let on_pass = SharedContinuation::new(Continuation::new(pass, fail));
            let on_fail = on_pass.clone();

            self.run(
                move |value| {
                    if let Some(k) = on_pass.take() {
                        f(value).run_with(k);
                    }
                },
                move |failure| {
                    if let Some(k) = on_fail.take() {
                        k.fail(failure);
                    }
                },
            );
        })
    }

    pub fn map<U, F>(self, f: F) -> Task<U>
    where
        U: 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.then(move |value| Task::lift(f(value)))
    }

    pub fn try_map<U, F>(self, f: F) -> Task<U>
    where
        U: 'static,
        F: FnOnce(T) -> Result<U> + 'static,
    {
        self.then(move |value| Task::from_result(f(value)))
    }

    /// Intercepts failures whose concrete type is `E` and recovers with the task
    /// returned by `handler`. Any other failure propagates unchanged.
    pub fn catch<E, F>(self, handler: F) -> Task<T>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
        F: FnOnce(E) -> Task<T> + 'static,
    {
        self.catch_all(move |failure| match failure.downcast::<E>() {
            Ok(err) => handler(err),
            Err(failure) => Task::fail(failure),
        })
    }

    pub fn catch_all<F>(self, handler: F) -> Task<T>
    where
        F: FnOnce(Failure) -> Task<T> + 'static,
    {
        Task::new(move |pass, fail| {
            let on_pass = SharedContinuation::new(Continuation::new(pass, fail));
            let on_fail = on_pass.clone();

            self.run(
                move |value| {
                    if let Some(k) = on_pass.take() {
                        k.succeed(value);
                    }
                },
                move |failure| {
                    if let Some(k) = on_fail.take() {
                        handler(failure).run_with(k);
                    }
                },
            );
        })
    }
}

impl Task<()> {
    pub fn done() -> Self {
        Task::lift(())
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}
