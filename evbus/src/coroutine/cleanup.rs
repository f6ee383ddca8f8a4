//! Deferred destruction of finished coroutine frames.
//!
//! A frame can become eligible for destruction from deep inside its own
//! execution (e.g. while delivering its result to the continuation), so it is
//! never freed inline. Instead it is pushed onto a thread-owned intrusive list
//! and freed from the reactor's idle callback, or by an explicit call to
//! [`do_cleaning_as_scheduled`].
//!
//! Scheduling must not allocate: it can run while the process is failing to
//! allocate memory. The `next` link lives inside the frame header.
use crate::context;
use crate::coroutine::promise::Header;
use crate::error::panic_payload_as_str;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
#[cfg(debug_assertions)]
use std::thread::ThreadId;

thread_local! {
    static CLEANING_LIST: Cell<Option<NonNull<Header>>> = const { Cell::new(None) };
}

/// Pushes a finished frame onto this thread's cleaning list and arms the
/// reactor's idle callback if the list was empty.
#[track_caller]
pub(super) fn schedule_for_cleaning(frame: NonNull<Header>) {
    // Safety: only live frames are scheduled, and each exactly once.
    let header = unsafe { frame.as_ref() };

    #[cfg(debug_assertions)]
    assert_owner_thread(header.owner_id, "schedule_for_cleaning");

    let was_empty = CLEANING_LIST.with(|list| {
        let head = list.get();
        header.next.set(head);
        list.set(Some(frame));
        head.is_none()
    });

    #[cfg(test)]
    tracker::scheduled();

    if was_empty {
        context::arm_idle();
    }
}

/// Destroys every frame currently scheduled for cleaning.
///
/// Frames scheduled while draining (e.g. a child coroutine released by its
/// parent's destruction) are destroyed by the same call. A panic raised while
/// destroying a frame is logged and discarded. Calling this with nothing
/// scheduled is a no-op.
pub fn do_cleaning_as_scheduled() {
    while let Some(frame) = pop() {
        // Safety: frames on the list are live and owned by the list.
        let destroy = unsafe { frame.as_ref().vtable.destroy };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| unsafe { destroy(frame) })) {
            tracing::warn!(
                panic = %panic_payload_as_str(&payload),
                "discarding panic raised while destroying a coroutine frame"
            );
        }

        #[cfg(test)]
        tracker::destroyed();
    }
}

fn pop() -> Option<NonNull<Header>> {
    CLEANING_LIST.with(|list| {
        let head = list.get()?;
        let next = unsafe { head.as_ref().next.replace(None) };
        list.set(next);
        Some(head)
    })
}

pub(crate) fn is_empty() -> bool {
    CLEANING_LIST.with(|list| list.get().is_none())
}

/// Aborts the process when a coroutine frame is touched from a thread other
/// than the one that created it.
#[cfg(debug_assertions)]
#[track_caller]
pub(crate) fn assert_owner_thread(owner: ThreadId, what: &str) {
    let current = std::thread::current();
    if current.id() == owner {
        return;
    }

    let caller = panic::Location::caller();
    eprintln!(
        "{} off its owner thread ({}:{}): owner {:?}, current {:?} ({})",
        what,
        caller.file(),
        caller.line(),
        owner,
        current.id(),
        current.name().unwrap_or("<unnamed>"),
    );
    std::process::abort();
}
