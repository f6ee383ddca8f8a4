use crate::task::Task;
use anyhow::Result;
use std::cell::RefCell;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct Slot<T> {
    result: Option<Result<T>>,
    waker: Option<Waker>,
}

/// Future returned by `Task::into_future`. The wrapped task is run on first
/// poll and its outcome is handed back on the poll that follows the wake.
#[must_use = "futures do nothing unless polled"]
pub struct TaskFuture<T> {
    task: Option<Task<T>>,
    slot: Rc<RefCell<Slot<T>>>,
}

fn complete<T>(slot: &RefCell<Slot<T>>, result: Result<T>) {
    let waker = {
        let mut slot = slot.borrow_mut();
        slot.result = Some(result);
        slot.waker.take()
    };

    if let Some(waker) = waker {
        waker.wake();
    }
}

impl<T: 'static> Future for TaskFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(task) = self.task.take() {
            let on_pass = Rc::clone(&self.slot);
            let on_fail = Rc::clone(&self.slot);

            task.run(
                move |value| complete(&on_pass, Ok(value)),
                move |failure| complete(&on_fail, Err(failure)),
            );
        }

        let mut slot = self.slot.borrow_mut();
        match slot.result.take() {
            Some(result) => Poll::Ready(result),
            None => {
                // Registered after `run` so a synchronous completion never
                // wakes the poller it is returning to.
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T: 'static> IntoFuture for Task<T> {
    type Output = Result<T>;
    type IntoFuture = TaskFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        TaskFuture {
            task: Some(self),
            slot: Rc::new(RefCell::new(Slot {
                result: None,
                waker: None,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Continuation, FailFn, PassFn};
    use crate::test_utils::mock_waker;
    use std::cell::Cell;

    fn pollable<T: 'static>(task: Task<T>) -> TaskFuture<T> {
        task.into_future()
    }

    #[test]
    fn test_sync_completion_is_ready_on_first_poll() {
        let (waker, data) = mock_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = pollable(Task::lift(7));

        match Pin::new(&mut fut).poll(&mut cx) {
            Poll::Ready(Ok(v)) => assert_eq!(v, 7),
            _ => panic!("expected value on first poll"),
        }
        assert_eq!(data.get_count(), 0);
    }

    #[test]
    fn test_deferred_completion_wakes_once() {
        let (waker, data) = mock_waker();
        let mut cx = Context::from_waker(&waker);

        let parked: Rc<Cell<Option<Continuation<u32>>>> = Rc::new(Cell::new(None));
        let handle = Rc::clone(&parked);
        let task = Task::new(move |pass: PassFn<u32>, fail: FailFn| {
            handle.set(Some(Continuation::new(pass, fail)));
        });

        let mut fut = pollable(task);
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        assert_eq!(data.get_count(), 0);

        parked.take().expect("task must have started").succeed(11);
        assert_eq!(data.get_count(), 1);

        match Pin::new(&mut fut).poll(&mut cx) {
            Poll::Ready(Ok(v)) => assert_eq!(v, 11),
            _ => panic!("expected value after wake"),
        }
    }

    #[test]
    fn test_failure_surfaces_as_err() {
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = pollable(Task::<()>::fail(anyhow::anyhow!("nope")));

        match Pin::new(&mut fut).poll(&mut cx) {
            Poll::Ready(Err(e)) => assert_eq!(e.to_string(), "nope"),
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn test_unpolled_future_never_runs_task() {
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let fut = pollable(Task::new(move |pass: PassFn<()>, _: FailFn| {
            flag.set(true);
            pass(());
        }));

        drop::<TaskFuture<()>>(fut);
        assert!(!ran.get());
    }
}
