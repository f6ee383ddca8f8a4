use super::*;
use crate as evbus;
use crate::coroutine::tracker::{self, Counts};
use crate::error::EvError;
use crate::task::race;
use crate::test_utils::*;
use crate::time::{yield_n, yield_now};
use anyhow::anyhow;
use std::cell::{Cell, RefCell};
use std::future::poll_fn;
use std::rc::Rc;
use std::task::{Poll, Waker};

fn counts(scheduled: usize, destroyed: usize) -> Counts {
    Counts {
        scheduled,
        destroyed,
    }
}

#[test]
fn test_attached_before_finalize() -> anyhow::Result<()> {
    let reactor = init_reactor(None)?;
    tracker::take();

    let task = coroutine(async {
        yield_now().await?;
        Ok(0)
    });

    assert_eq!(reactor.start(task), 0);
    do_cleaning_as_scheduled();

    assert_eq!(tracker::take(), counts(1, 1));
    Ok(())
}

#[test]
fn test_finalized_before_attach_keeps_result() -> anyhow::Result<()> {
    let reactor = init_reactor(None)?;
    tracker::take();

    let task = coroutine(async { Ok(0) });

    // Finished, but neither attached nor gone: not eligible yet.
    do_cleaning_as_scheduled();
    assert_eq!(tracker::peek(), counts(0, 0));

    assert_eq!(reactor.start(task), 0);
    do_cleaning_as_scheduled();

    assert_eq!(tracker::take(), counts(1, 1));
    Ok(())
}

#[test]
fn test_io_gone_before_finalize() -> anyhow::Result<()> {
    let reactor = init_reactor(None)?;
    tracker::take();

    drop(coroutine(async {
        yield_now().await?;
        Ok(0)
    }));
    assert_eq!(tracker::peek(), counts(0, 0));

    assert_eq!(reactor.start(yield_n(2).then(|()| Task::lift(0))), 0);
    do_cleaning_as_scheduled();

    assert_eq!(tracker::take(), counts(1, 1));
    Ok(())
}

#[test]
fn test_finished_unattached_without_reactor() {
    tracker::take();

    drop(coroutine(async { Ok(0) }));
    assert_eq!(tracker::peek(), counts(1, 0));

    do_cleaning_as_scheduled();
    assert_eq!(tracker::take(), counts(1, 1));
}

#[test]
fn test_empty_drain_is_noop() {
    tracker::take();

    do_cleaning_as_scheduled();
    do_cleaning_as_scheduled();

    assert_eq!(tracker::take(), counts(0, 0));
    assert!(is_cleaning_list_empty());
}

#[test]
fn test_double_drain_destroys_once() {
    tracker::take();

    let out = run_capturing(coroutine(async { Ok("done") }));
    assert_eq!(out.expect_value(), "done");

    do_cleaning_as_scheduled();
    do_cleaning_as_scheduled();

    assert_eq!(tracker::take(), counts(1, 1));
}

#[test]
fn test_body_runs_until_first_suspension_on_call() {
    let order = Recorder::default();
    let rec = order.clone();
    let (inner, parked) = parked_task::<()>();

    let task = coroutine(async move {
        rec.push("before await");
        inner.await?;
        rec.push("after await");
        Ok(())
    });

    assert_eq!(order.snapshot(), vec!["before await"]);
    assert!(parked.is_started());

    let out = run_capturing(task);
    assert!(out.is_pending());

    parked.succeed(());
    out.expect_value();
    assert_eq!(order.take(), vec!["before await", "after await"]);

    do_cleaning_as_scheduled();
}

#[test]
fn test_failure_at_suspension_propagates() {
    let (inner, parked) = parked_task::<u32>();
    let reached = Rc::new(Cell::new(false));
    let flag = Rc::clone(&reached);

    let out = run_capturing(coroutine(async move {
        let v = inner.await?;
        flag.set(true);
        Ok(v)
    }));

    parked.fail(anyhow!("rpc timed out"));
    assert_eq!(out.expect_failure().to_string(), "rpc timed out");
    assert!(!reached.get());

    do_cleaning_as_scheduled();
}

#[test]
fn test_catch_around_await_recovers() {
    #[derive(Debug, thiserror::Error)]
    #[error("known race")]
    struct KnownRace;

    let out = run_capturing(coroutine(async {
        let v = Task::<u32>::fail(KnownRace)
            .catch(|_: KnownRace| Task::lift(0))
            .await?;
        Ok(v + 1)
    }));

    assert_eq!(out.expect_value(), 1);
    do_cleaning_as_scheduled();
}

#[test]
fn test_panic_in_body_becomes_failure() {
    tracker::take();

    let out = run_capturing(coroutine(async {
        if true {
            panic!("bad invariant");
        }
        Ok(())
    }));

    let failure = out.expect_failure();
    match failure.downcast_ref::<EvError>() {
        Some(EvError::Panicked(msg)) => assert_eq!(msg, "bad invariant"),
        other => panic!("unexpected failure: {:?}", other),
    }

    do_cleaning_as_scheduled();
    assert_eq!(tracker::take(), counts(1, 1));
}

#[test]
fn test_wake_while_polling_repolls() {
    let mut polls = 0;

    let out = run_capturing(coroutine(async move {
        poll_fn(|cx| {
            polls += 1;
            if polls == 1 {
                cx.waker().wake_by_ref();
                Poll::Pending
            } else {
                Poll::Ready(())
            }
        })
        .await;
        Ok(polls)
    }));

    assert_eq!(out.expect_value(), 2);
    do_cleaning_as_scheduled();
}

#[test]
fn test_stale_waker_is_inert() {
    tracker::take();
    let stash: Rc<RefCell<Option<Waker>>> = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&stash);

    let out = run_capturing(coroutine(async move {
        poll_fn(|cx| {
            *sink.borrow_mut() = Some(cx.waker().clone());
            Poll::Ready(())
        })
        .await;
        Ok(())
    }));
    out.expect_value();

    do_cleaning_as_scheduled();
    assert_eq!(tracker::take(), counts(1, 1));

    let waker = stash.borrow_mut().take().expect("waker was stashed");
    waker.wake_by_ref();
    waker.wake();
}

#[test]
fn test_continuation_may_drain_its_own_frame() {
    tracker::take();

    // Buffered result delivered on attach.
    let task = coroutine(async { Ok(1) });
    task.run(
        |v| {
            assert_eq!(v, 1);
            do_cleaning_as_scheduled();
        },
        |e| panic!("unexpected failure: {:?}", e),
    );
    assert_eq!(tracker::take(), counts(1, 1));

    // Result delivered on finalize to a waiting continuation.
    let (inner, parked) = parked_task::<u8>();
    let task = coroutine(async move { Ok(inner.await? * 2) });
    task.run(
        |v| {
            assert_eq!(v, 4);
            do_cleaning_as_scheduled();
        },
        |e| panic!("unexpected failure: {:?}", e),
    );

    parked.succeed(2);
    assert_eq!(tracker::take(), counts(1, 1));
}

#[test]
fn test_nested_coroutines_are_all_cleaned() -> anyhow::Result<()> {
    let reactor = init_reactor(None)?;
    tracker::take();

    fn child(v: i32) -> Task<i32> {
        coroutine(async move {
            yield_now().await?;
            Ok(v * 2)
        })
    }

    let parent = coroutine(async {
        let a = child(1).await?;
        let b = child(2).await?;
        Ok(a + b)
    });

    assert_eq!(reactor.start(parent), 6);
    do_cleaning_as_scheduled();

    assert_eq!(tracker::take(), counts(3, 3));
    Ok(())
}

#[test]
fn test_race_loser_frame_is_released() -> anyhow::Result<()> {
    let reactor = init_reactor(None)?;
    tracker::take();

    let fast = coroutine(async { Ok(1) });
    let slow = coroutine(async {
        yield_n(3).await?;
        Ok("slow")
    });

    let task = race(fast, slow).then(|winner| {
        assert!(winner.is_left());
        // Let the loser finish so its frame becomes eligible.
        yield_n(5).then(|()| Task::lift(0))
    });

    assert_eq!(reactor.start(task), 0);
    drop(reactor);

    assert_eq!(tracker::take(), counts(2, 2));
    Ok(())
}

// Owner-thread violations abort the process, so they are checked from a child
// process re-running the same test.
#[cfg(debug_assertions)]
mod off_thread {
    use super::*;
    use std::process::Command;
    use std::thread;

    // Set in the child process re-running a test that is expected to abort.
    const ABORT_CHILD_ENV: &str = "EVBUS_EXPECT_ABORT";

    /// Re-runs the test `name` in a child process and returns its stderr,
    /// asserting the child did not exit cleanly.
    fn run_expecting_abort(name: &str) -> String {
        let exe = std::env::current_exe().expect("test binary path");
        let out = Command::new(exe)
            .args([name, "--exact", "--nocapture", "--test-threads=1"])
            .env(ABORT_CHILD_ENV, "1")
            .output()
            .expect("spawn child test process");

        assert!(!out.status.success(), "child exited cleanly: {:?}", out);
        String::from_utf8_lossy(&out.stderr).into_owned()
    }

    #[test]
    fn test_waker_clone_aborts() {
        if std::env::var_os(ABORT_CHILD_ENV).is_none() {
            let stderr = run_expecting_abort("coroutine::tests::off_thread::test_waker_clone_aborts");
            assert!(
                stderr.contains("coroutine waker cloned off its owner thread"),
                "unexpected stderr: {}",
                stderr
            );
            return;
        }

        let stash: Rc<RefCell<Option<Waker>>> = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&stash);
        let (inner, _parked) = parked_task::<()>();

        let out = run_capturing(coroutine(async move {
            poll_fn(|cx| {
                *sink.borrow_mut() = Some(cx.waker().clone());
                Poll::Ready(())
            })
            .await;
            inner.await
        }));
        assert!(out.is_pending());

        let waker = stash.borrow_mut().take().expect("waker was stashed");
        let handle = thread::spawn(move || {
            let copy = waker.clone();
            drop(copy);
            drop(waker);
        });
        let _ = handle.join();

        // Only reached if the clone above did not abort.
        std::process::exit(0);
    }
}

#[evbus::test]
async fn test_coroutine_inside_block_on() -> anyhow::Result<()> {
    let v = coroutine(async {
        yield_now().await?;
        Ok(21)
    })
    .await?;

    assert_eq!(v * 2, 42);
    Ok(())
}
