//! Single-threaded asynchronous execution engine for event-driven agents.
//!
//! * [`Task`]: one-shot deferred computation with sequential combinators.
//! * [`coroutine`]: write a task as an `async` block awaiting other tasks.
//! * [`Reactor`]: epoll event loop driving timers, fd readiness and a worker
//!   pool for blocking calls.
//! * [`Bus`]: typed publish/subscribe dispatcher composing handlers into tasks.
//!
//! ```ignore
//! #[evbus::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bus = Bus::new();
//!     TracingLogger::install(&bus);
//!
//!     let sink = bus.clone();
//!     bus.subscribe(move |block: &Block| {
//!         log(&sink, LogLevel::Info, format!("new block {}", block.height))
//!     });
//!
//!     bus.raise(Block { height: 1 }).await
//! }
//! ```

#[doc(inline)]
pub use evbus_macros::main;

#[doc(inline)]
pub use evbus_macros::test;

pub mod bus;
pub use bus::{Bus, log::log};

mod context;

pub mod coroutine;
pub use coroutine::{coroutine, do_cleaning_as_scheduled};

mod error;
pub use error::{EvError, Failure};

pub mod io;

pub mod runtime;
pub use runtime::{Builder, Reactor, blocking, detach, spawn, start};

pub mod task;
pub use task::{Task, foreach, race};

pub mod time;

mod utils;

#[cfg(test)]
mod test_utils;
