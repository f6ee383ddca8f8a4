use crate::coroutine::cleanup;
use crate::coroutine::token::Link;
use crate::coroutine::waker::waker_ref;
use crate::error::{EvError, panic_payload_as_str};
use crate::task::Continuation;
use crate::utils::ScopeGuard;
use anyhow::Result;
use bitflags::bitflags;
use std::cell::{Cell, UnsafeCell};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::ptr::NonNull;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct State: u8 {
        /// The body returned, failed or panicked. Never polled again.
        const FINALIZED = 1;

        /// The task returned by `coroutine` has been run.
        const ATTACHED = 1 << 1;

        /// Latch: the frame sits on (or went through) the cleaning list.
        const CLEANUP_SCHEDULED = 1 << 2;

        /// The future is inside `poll`.
        const POLLING = 1 << 3;

        /// A wake arrived while polling; poll again before suspending.
        const NOTIFIED = 1 << 4;
    }
}

pub(crate) struct Vtable {
    pub(crate) resume: unsafe fn(NonNull<Header>),
    pub(crate) destroy: unsafe fn(NonNull<Header>),
}

/// Untyped part of a coroutine frame.
///
/// It is critical for `Header` to be the first field of `Promise` so that a
/// `NonNull<Header>` can be cast back to the typed frame by the vtable.
#[repr(C)]
pub(crate) struct Header {
    /// Intrusive link of the cleaning list.
    pub(super) next: Cell<Option<NonNull<Header>>>,

    state: Cell<State>,

    pub(super) link: Rc<Link>,

    pub(crate) owner_id: ThreadId,

    pub(super) vtable: &'static Vtable,
}

impl Header {
    fn new(link: Rc<Link>, vtable: &'static Vtable) -> Self {
        Self {
            next: Cell::new(None),
            state: Cell::new(State::empty()),
            link,
            owner_id: thread::current().id(),
            vtable,
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state.get()
    }

    fn set(&self, flags: State) {
        self.state.set(self.state.get() | flags);
    }

    fn unset(&self, flags: State) {
        self.state.set(self.state.get() - flags);
    }

    fn is_eligible_for_cleanup(&self) -> bool {
        let state = self.state.get();
        state.contains(State::FINALIZED)
            && (state.contains(State::ATTACHED) || self.link.is_io_gone())
    }

    /// Schedules the frame for destruction the first time it becomes
    /// eligible. Re-evaluated after every change to `finalized`, `attached`
    /// or `io_gone`.
    pub(super) fn try_schedule_cleanup(&self) {
        if self.state.get().contains(State::CLEANUP_SCHEDULED) || !self.is_eligible_for_cleanup()
        {
            return;
        }

        self.set(State::CLEANUP_SCHEDULED);

        // The link holds the pointer handed out by `allocate`, which covers the
        // whole frame and not only this header.
        if let Some(frame) = self.link.promise() {
            cleanup::schedule_for_cleaning(frame);
        }
    }

    pub(super) fn note_io_gone(&self) {
        self.try_schedule_cleanup();
    }
}

impl Drop for Header {
    fn drop(&mut self) {
        self.link.unbind();
    }
}

enum Slot<T> {
    Empty,
    /// Finalized before anyone attached.
    Buffered(Result<T>),
    /// Attached before the body finalized.
    Waiting(Continuation<T>),
    Consumed,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot::Empty
    }
}

#[repr(C)]
pub(crate) struct Promise<T, F> {
    header: Header,
    future: UnsafeCell<F>,
    slot: Cell<Slot<T>>,
}

/// Allocates a frame for `future` and returns its untyped handle. The frame is
/// owned by the cleaning machinery from here on: only `destroy` frees it.
pub(crate) fn allocate<T, F>(future: F) -> NonNull<Header>
where
    T: 'static,
    F: Future<Output = Result<T>> + 'static,
{
    let link = Rc::new(Link::new());
    let promise = Box::new(Promise {
        header: Header::new(Rc::clone(&link), vtable::<T, F>()),
        future: UnsafeCell::new(future),
        slot: Cell::new(Slot::<T>::Empty),
    });

    let header = NonNull::from(Box::leak(promise)).cast::<Header>();
    link.bind(header);
    header
}

fn vtable<T, F>() -> &'static Vtable
where
    T: 'static,
    F: Future<Output = Result<T>> + 'static,
{
    &Vtable {
        resume: resume::<T, F>,
        destroy: destroy::<T, F>,
    }
}

/// Polls the body until it suspends or finalizes.
///
/// # Safety
///
/// `ptr` must point to a live `Promise<T, F>`.
pub(crate) unsafe fn resume<T, F>(ptr: NonNull<Header>)
where
    F: Future<Output = Result<T>>,
{
    let promise = unsafe { ptr.cast::<Promise<T, F>>().as_ref() };
    let header = &promise.header;

    #[cfg(debug_assertions)]
    cleanup::assert_owner_thread(header.owner_id, "coroutine resumed");

    let state = header.state();
    if state.contains(State::FINALIZED) {
        return;
    }

    if state.contains(State::POLLING) {
        header.set(State::NOTIFIED);
        return;
    }

    // Keeps the waker's backing `Link` alive even if the frame is destroyed
    // by the continuation we deliver to.
    let link = Rc::clone(&header.link);
    let waker = waker_ref(&link);
    let mut cx = Context::from_waker(&waker);

    let output = loop {
        header.unset(State::NOTIFIED);
        header.set(State::POLLING);

        let polled = {
            let _polling = ScopeGuard::new(|| header.unset(State::POLLING));

            // Safety: POLLING guarantees no other `&mut F` exists, and the
            // frame is never moved once allocated.
            let future = unsafe { Pin::new_unchecked(&mut *promise.future.get()) };
            panic::catch_unwind(AssertUnwindSafe(|| future.poll(&mut cx)))
        };

        match polled {
            Ok(Poll::Ready(output)) => break output,
            Ok(Poll::Pending) if header.state().contains(State::NOTIFIED) => continue,
            Ok(Poll::Pending) => return,
            Err(payload) => {
                break Err(EvError::Panicked(panic_payload_as_str(&payload)).into());
            }
        }
    };

    unsafe { finalize::<T, F>(ptr, output) };
}

/// Marks the body finished and hands the output to a waiting continuation,
/// or buffers it until the task is attached.
///
/// Delivery is the very last thing this function does: the continuation may
/// drain the cleaning list and free the frame.
unsafe fn finalize<T, F>(ptr: NonNull<Header>, output: Result<T>) {
    let promise = unsafe { ptr.cast::<Promise<T, F>>().as_ref() };
    promise.header.set(State::FINALIZED);

    match promise.slot.take() {
        Slot::Waiting(k) => {
            promise.slot.set(Slot::Consumed);
            promise.header.try_schedule_cleanup();
            k.deliver(output);
        }
        Slot::Empty => {
            promise.slot.set(Slot::Buffered(output));
            promise.header.try_schedule_cleanup();
        }
        Slot::Buffered(_) | Slot::Consumed => unreachable!("coroutine finalized twice"),
    }
}

/// Runs when the task returned by `coroutine` is run.
///
/// # Safety
///
/// `ptr` must point to a live `Promise<T, F>`. This holds while the task's
/// lifetime token exists, since neither `attached` nor `io_gone` is set yet.
pub(crate) unsafe fn attach<T, F>(ptr: NonNull<Header>, k: Continuation<T>) {
    let promise = unsafe { ptr.cast::<Promise<T, F>>().as_ref() };
    promise.header.set(State::ATTACHED);

    match promise.slot.take() {
        Slot::Buffered(output) => {
            promise.slot.set(Slot::Consumed);
            promise.header.try_schedule_cleanup();
            k.deliver(output);
        }
        Slot::Empty => {
            promise.slot.set(Slot::Waiting(k));
            promise.header.try_schedule_cleanup();
        }
        Slot::Waiting(_) | Slot::Consumed => unreachable!("coroutine task attached twice"),
    }
}

unsafe fn destroy<T, F>(ptr: NonNull<Header>) {
    drop(unsafe { Box::from_raw(ptr.cast::<Promise<T, F>>().as_ptr()) });
}
