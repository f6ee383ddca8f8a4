use crate::error::Failure;
use crate::runtime::{Builder, Reactor};
use crate::task::{Continuation, FailFn, PassFn, Task};
use anyhow::Result;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

mod mocks;
pub(crate) use mocks::mock_waker;

pub(crate) fn init_reactor(builder: Option<Builder>) -> Result<Reactor> {
    builder.unwrap_or_default().try_build()
}

/// Outcome of a task run outside of any reactor.
pub(crate) struct Captured<T>(Rc<RefCell<Option<Result<T>>>>);

impl<T> Captured<T> {
    pub(crate) fn is_pending(&self) -> bool {
        self.0.borrow().is_none()
    }

    #[track_caller]
    pub(crate) fn expect_value(&self) -> T {
        match self.0.borrow_mut().take() {
            Some(Ok(v)) => v,
            Some(Err(e)) => panic!("expected a value, got failure: {:?}", e),
            None => panic!("task has not resolved"),
        }
    }

    #[track_caller]
    pub(crate) fn expect_failure(&self) -> Failure {
        match self.0.borrow_mut().take() {
            Some(Err(e)) => e,
            Some(Ok(_)) => panic!("expected a failure, got a value"),
            None => panic!("task has not resolved"),
        }
    }
}

/// Runs `task` and records whichever callback fires. Panics if both fire or
/// one fires twice.
pub(crate) fn run_capturing<T: 'static>(task: Task<T>) -> Captured<T> {
    let slot = Rc::new(RefCell::new(None));
    let resolved = Rc::new(Cell::new(false));

    let (on_pass, on_fail) = (Rc::clone(&slot), Rc::clone(&slot));
    let (pass_once, fail_once) = (Rc::clone(&resolved), Rc::clone(&resolved));

    task.run(
        move |v| {
            assert!(!pass_once.replace(true), "task resolved twice");
            *on_pass.borrow_mut() = Some(Ok(v));
        },
        move |e| {
            assert!(!fail_once.replace(true), "task resolved twice");
            *on_fail.borrow_mut() = Some(Err(e));
        },
    );

    Captured(slot)
}

/// Resolves a task returned by [`parked_task`] from the test body.
pub(crate) struct Parked<T>(Rc<Cell<Option<Continuation<T>>>>);

impl<T> Parked<T> {
    #[track_caller]
    pub(crate) fn succeed(&self, value: T) {
        self.take().succeed(value)
    }

    #[track_caller]
    pub(crate) fn fail(&self, failure: Failure) {
        self.take().fail(failure)
    }

    pub(crate) fn is_started(&self) -> bool {
        let k = self.0.take();
        let started = k.is_some();
        self.0.set(k);
        started
    }

    #[track_caller]
    fn take(&self) -> Continuation<T> {
        match self.0.take() {
            Some(k) => k,
            None => panic!("parked task was never run"),
        }
    }
}

/// A task that parks its continuation until the test resolves it by hand.
pub(crate) fn parked_task<T: 'static>() -> (Task<T>, Parked<T>) {
    let cell = Rc::new(Cell::new(None));
    let handle = Rc::clone(&cell);

    let task = Task::new(move |pass: PassFn<T>, fail: FailFn| {
        handle.set(Some(Continuation::new(pass, fail)));
    });

    (task, Parked(cell))
}

/// Records the order in which things happen.
#[derive(Clone, Default)]
pub(crate) struct Recorder(Rc<RefCell<Vec<&'static str>>>);

impl Recorder {
    pub(crate) fn push(&self, what: &'static str) {
        self.0.borrow_mut().push(what);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub(crate) fn snapshot(&self) -> Vec<&'static str> {
        self.0.borrow().clone()
    }

    pub(crate) fn take(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}
