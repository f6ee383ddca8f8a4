#[cfg(debug_assertions)]
use crate::coroutine::cleanup;
use crate::coroutine::token::Link;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops;
use std::rc::Rc;
use std::task::{RawWaker, RawWakerVTable, Waker};

// Wakers point at the `Link`, never at the frame. A waker that outlives its
// coroutine (e.g. the losing side of a `race`) finds the link unbound and does
// nothing.
//
// `Waker` is `Send + Sync` by contract, while `Link` is refcounted with `Rc`.
// Cloning, dropping or waking from another thread is a programming error,
// caught in debug builds before the refcount or the link is touched.

pub(super) struct WakerRef<'a> {
    waker: ManuallyDrop<Waker>,
    _p: PhantomData<&'a Link>,
}

/// Returns a `WakerRef` which avoids having to preemptively increase the
/// refcount if there is no need to do so.
pub(super) fn waker_ref(link: &Rc<Link>) -> WakerRef<'_> {
    // Never dropped: it does not own the reference it points at.
    let waker = unsafe { ManuallyDrop::new(Waker::from_raw(raw_waker(Rc::as_ptr(link)))) };

    WakerRef {
        waker,
        _p: PhantomData,
    }
}

impl ops::Deref for WakerRef<'_> {
    type Target = Waker;

    fn deref(&self) -> &Waker {
        &self.waker
    }
}

unsafe fn clone_waker(ptr: *const ()) -> RawWaker {
    #[cfg(debug_assertions)]
    check_owner(ptr, "coroutine waker cloned");

    unsafe { Rc::increment_strong_count(ptr as *const Link) };
    raw_waker(ptr as *const Link)
}

unsafe fn drop_waker(ptr: *const ()) {
    #[cfg(debug_assertions)]
    check_owner(ptr, "coroutine waker dropped");

    drop(unsafe { Rc::from_raw(ptr as *const Link) });
}

// Wake by consuming the waker.
unsafe fn wake_by_val(ptr: *const ()) {
    unsafe {
        wake_by_ref(ptr);
        drop_waker(ptr);
    }
}

// Wake without consuming the waker
unsafe fn wake_by_ref(ptr: *const ()) {
    #[cfg(debug_assertions)]
    check_owner(ptr, "coroutine woken");

    let link = unsafe { &*(ptr as *const Link) };

    if let Some(header) = link.promise() {
        unsafe {
            let resume = header.as_ref().vtable.resume;
            resume(header);
        }
    }
}

// `owner_id` is written once before the link is shared, so reading it from
// another thread is fine.
#[cfg(debug_assertions)]
fn check_owner(ptr: *const (), what: &str) {
    let link = unsafe { &*(ptr as *const Link) };
    cleanup::assert_owner_thread(link.owner_id, what);
}

static WAKER_VTABLE: RawWakerVTable =
    RawWakerVTable::new(clone_waker, wake_by_val, wake_by_ref, drop_waker);

fn raw_waker(link: *const Link) -> RawWaker {
    RawWaker::new(link as *const (), &WAKER_VTABLE)
}
