// Public API
#[allow(clippy::module_inception)]
pub mod runtime;
pub use runtime::{Builder, FAILURE_EXIT_CODE, Reactor, start};

mod bridge;
pub use bridge::blocking;

pub mod spawn;
pub use spawn::{detach, spawn};

// Exports
pub(crate) mod reactor;
pub(crate) use reactor::Interest;

mod notify;
