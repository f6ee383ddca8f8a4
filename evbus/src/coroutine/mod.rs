//! Straight-line asynchronous code on top of [`Task`].
//!
//! [`coroutine`] turns a future into a `Task`. The body starts executing
//! immediately, up to its first suspension point, and suspends by awaiting
//! other tasks:
//!
//! ```ignore
//! fn set_fee(rpc: Rpc, channel: String, fee: u64) -> Task<()> {
//!     coroutine(async move {
//!         rpc.command("setchannel", params(channel, fee))
//!             .catch(|_: RpcError| Task::lift(json::Value::Null))
//!             .await?;
//!         Ok(())
//!     })
//! }
//! ```
//!
//! The coroutine's frame lives until its body has finished *and* the returned
//! task has either been run or dropped. It is then destroyed by the cleanup
//! pass rather than inline, see [`do_cleaning_as_scheduled`].
use crate::task::{Continuation, Task};
use anyhow::Result;

mod cleanup;
pub use cleanup::do_cleaning_as_scheduled;
pub(crate) use cleanup::is_empty as is_cleaning_list_empty;

#[cfg(test)]
pub(crate) use cleanup::tracker;

mod promise;

mod token;
use token::IoLifetimeToken;

mod waker;

/// Starts `future` as a coroutine and returns the task that delivers its output.
///
/// Running the returned task after the body already finished delivers the
/// buffered output synchronously. Dropping it without running discards the
/// output once the body finishes. A panic in the body is delivered as an
/// [`EvError::Panicked`](crate::EvError::Panicked) failure.
pub fn coroutine<T, F>(future: F) -> Task<T>
where
    T: 'static,
    F: Future<Output = Result<T>> + 'static,
{
    let frame = promise::allocate::<T, F>(future);

    // Safety: nothing can schedule the frame for cleaning before the token
    // below is dropped or the task is run.
    let token = IoLifetimeToken::new(unsafe { frame.as_ref().link.clone() });
    unsafe { promise::resume::<T, F>(frame) };

    Task::new(move |pass, fail| {
        unsafe { promise::attach::<T, F>(frame, Continuation::new(pass, fail)) };
        token.disarm();
    })
}

#[cfg(test)]
mod tests;
