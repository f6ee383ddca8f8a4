//! Timers and suspension points driven by the reactor.
use crate::context;
use crate::task::{Task, sequence};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Resolves on a later turn of the reactor, letting everything already queued
/// run first.
pub fn yield_now() -> Task<()> {
    Task::new(|pass, fail| match context::current() {
        Ok(core) => core.defer(Box::new(move || pass(()))),
        Err(e) => fail(e.into()),
    })
}

/// Yields `n` turns in a row. `yield_n(0)` resolves immediately.
pub fn yield_n(n: usize) -> Task<()> {
    let mut left = n;
    sequence(move || {
        if left == 0 {
            return None;
        }
        left -= 1;
        Some(yield_now())
    })
}

/// Resolves once `duration` has elapsed. Timers with the same deadline fire in
/// the order they were started.
pub fn sleep(duration: Duration) -> Task<()> {
    Task::new(move |pass, fail| match context::current() {
        Ok(core) => core.add_timer(Instant::now() + duration, Box::new(move || pass(()))),
        Err(e) => fail(e.into()),
    })
}

/// Wall-clock time, in seconds since the Unix epoch.
pub fn now() -> Task<f64> {
    Task::new(|pass, fail| match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => pass(elapsed.as_secs_f64()),
        Err(e) => fail(e.into()),
    })
}
