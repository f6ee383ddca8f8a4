use crate::error::EvError;
use crate::runtime::reactor::Core;
use std::cell::RefCell;
use std::rc::Rc;

// Thread-local reactor context. Installed by `Builder::try_build` and cleared
// when the `Reactor` shuts down.
thread_local! {
    static CONTEXT: RefCell<Option<Rc<Core>>> = const { RefCell::new(None) };
}

pub(crate) fn install(core: Rc<Core>) -> Result<(), EvError> {
    CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        if ctx.is_some() {
            return Err(EvError::ReactorAlreadyActive);
        }

        *ctx = Some(core);
        Ok(())
    })
}

pub(crate) fn uninstall() -> Option<Rc<Core>> {
    CONTEXT
        .try_with(|ctx| ctx.borrow_mut().take())
        .ok()
        .flatten()
}

pub(crate) fn is_active() -> bool {
    CONTEXT
        .try_with(|ctx| ctx.borrow().is_some())
        .unwrap_or(false)
}

/// Returns the reactor installed on this thread.
pub(crate) fn current() -> Result<Rc<Core>, EvError> {
    CONTEXT
        .try_with(|ctx| ctx.borrow().clone())
        .ok()
        .flatten()
        .ok_or(EvError::NoReactor)
}

/// Runs `f` against the reactor installed on this thread.
///
/// The core is cloned out of the thread-local first, so `f` is free to call
/// back into the context.
#[inline(always)]
pub(crate) fn try_with_core<F, R>(f: F) -> Result<R, EvError>
where
    F: FnOnce(&Rc<Core>) -> R,
{
    let core = current()?;
    Ok(f(&core))
}

#[track_caller]
#[inline(always)]
pub(crate) fn with_core<F, R>(f: F) -> R
where
    F: FnOnce(&Rc<Core>) -> R,
{
    match try_with_core(f) {
        Ok(r) => r,
        Err(e) => panic!("Context not initialized: {}", e),
    }
}

/// Arms the reactor's idle callback. Without a reactor on this thread the
/// cleaning list is only drained by explicit calls.
///
/// Must not allocate: it runs when a coroutine frame is scheduled for cleaning.
pub(crate) fn arm_idle() {
    let _ = CONTEXT.try_with(|ctx| {
        if let Ok(ctx) = ctx.try_borrow() {
            if let Some(core) = ctx.as_ref() {
                core.arm_idle();
            }
        }
    });
}
