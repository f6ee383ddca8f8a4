use crate::coroutine::promise::Header;
use std::cell::Cell;
use std::ptr::NonNull;
use std::rc::Rc;
use std::thread::{self, ThreadId};

/// Shared between a promise, its wakers and the lifetime token of the task it
/// returned. Outlives the promise: once the frame is destroyed `promise` is
/// cleared and every stale handle becomes inert.
pub(crate) struct Link {
    promise: Cell<Option<NonNull<Header>>>,
    io_gone: Cell<bool>,

    /// The link is refcounted with `Rc`, so its wakers must stay on this
    /// thread.
    pub(crate) owner_id: ThreadId,
}

impl Link {
    pub(crate) fn new() -> Self {
        Self {
            promise: Cell::new(None),
            io_gone: Cell::new(false),
            owner_id: thread::current().id(),
        }
    }

    pub(crate) fn promise(&self) -> Option<NonNull<Header>> {
        self.promise.get()
    }

    pub(super) fn bind(&self, header: NonNull<Header>) {
        self.promise.set(Some(header));
    }

    pub(super) fn unbind(&self) {
        self.promise.set(None);
    }

    /// The task returned by `coroutine` was dropped without ever running.
    pub(crate) fn is_io_gone(&self) -> bool {
        self.io_gone.get()
    }
}

/// Owned by the closure inside the task a coroutine returns. Dropping it while
/// still armed means the task was discarded without ever running, so nobody
/// will consume the coroutine's result.
pub(crate) struct IoLifetimeToken {
    link: Rc<Link>,
    armed: bool,
}

impl IoLifetimeToken {
    pub(crate) fn new(link: Rc<Link>) -> Self {
        Self { link, armed: true }
    }

    /// Releases the token once the task has run. `io_gone` stays unset: the
    /// frame is owned through `attached` from here on.
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for IoLifetimeToken {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        self.link.io_gone.set(true);

        if let Some(header) = self.link.promise() {
            // Safety: `promise` is cleared when the frame is destroyed, so a
            // bound pointer is always live.
            unsafe { header.as_ref().note_io_gone() };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropped_token_marks_io_gone() {
        let link = Rc::new(Link::new());
        drop(IoLifetimeToken::new(Rc::clone(&link)));

        assert!(link.is_io_gone());
    }

    #[test]
    fn test_disarmed_token_leaves_io_gone_unset() {
        let link = Rc::new(Link::new());
        IoLifetimeToken::new(Rc::clone(&link)).disarm();

        assert!(!link.is_io_gone());
        assert_eq!(Rc::strong_count(&link), 1);
    }
}
