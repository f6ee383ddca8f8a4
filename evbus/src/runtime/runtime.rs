use crate::context;
use crate::coroutine::coroutine;
use crate::error::EvError;
use crate::runtime::reactor::Core;
use crate::task::Task;
use anyhow::Result;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Exit status returned by [`Reactor::start`] when the top-level task fails.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Default number of epoll events handled per wakeup.
const MAX_EVENTS: usize = 64;

#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn() -> String + Send + Sync + 'static>);

fn default_thread_name_fn() -> ThreadNameFn {
    let worker_count = Arc::new(AtomicUsize::new(0));

    ThreadNameFn(Arc::new(move || {
        let id = worker_count.fetch_add(1, Ordering::Relaxed);
        format!("evbus-worker-{}", id)
    }))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

#[derive(Debug)]
pub struct Builder {
    /// Size of the worker pool running blocking calls. Defaults to 1 worker
    /// per CPU core. Workers are only spawned once the first blocking call is
    /// submitted.
    worker_threads: Option<usize>,

    /// Name fn used for worker threads.
    thread_name: ThreadNameFn,

    /// Stack size used for worker threads.
    thread_stack_size: Option<usize>,

    /// Maximum number of OS events handled per reactor wakeup.
    max_events: usize,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Returns a new builder with default settings.
    ///
    /// Configuration methods can be chained on the return value.
    pub fn new() -> Builder {
        Builder {
            worker_threads: None,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            max_events: MAX_EVENTS,
        }
    }

    /// The number of threads running blocking calls handed to
    /// [`blocking`](crate::runtime::blocking).
    #[track_caller]
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "worker_threads must be greater than 0");
        self.worker_threads = Some(val);
        self
    }

    /// Sets name of worker threads.
    ///
    /// The default name is "evbus-worker-{id}", where id is monotonically
    /// increasing.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move || val.clone()));
        self
    }

    /// Sets a function used to generate the name of worker threads.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// Sets the stack size (in bytes) for worker threads.
    ///
    /// The actual stack size may be greater than this value if the platform
    /// specifies minimal stack size.
    #[track_caller]
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        assert!(
            val.is_power_of_two(),
            "thread_stack_size must be a power of two"
        );
        self.thread_stack_size = Some(val);
        self
    }

    #[track_caller]
    pub fn max_events(mut self, val: usize) -> Self {
        assert!(val > 0, "max_events must be greater than 0");
        self.max_events = val;
        self
    }

    /// Creates the configured `Reactor` and installs it on the current thread.
    ///
    /// Fails if a reactor is already active on this thread.
    pub fn try_build(self) -> Result<Reactor> {
        if context::is_active() {
            return Err(EvError::ReactorAlreadyActive.into());
        }

        let cfg: RuntimeConfig = self.try_into()?;
        tracing::debug!(?cfg, "building reactor");

        let core = Rc::new(Core::try_new(cfg)?);
        context::install(Rc::clone(&core))?;

        Ok(Reactor { core })
    }
}

/// The event loop of the current thread.
///
/// Owns the thread-local reactor context: tasks, timers and blocking calls
/// created on this thread are driven by it. Dropping the reactor drops
/// everything still pending and destroys finished coroutine frames.
#[derive(Debug)]
pub struct Reactor {
    core: Rc<Core>,
}

impl Reactor {
    /// Runs the loop until `task` completes and returns its exit status.
    ///
    /// A failure of `task` is logged and mapped to [`FAILURE_EXIT_CODE`].
    pub fn start(&self, task: Task<i32>) -> i32 {
        exit_code(self.try_start(task))
    }

    /// Like [`start`](Self::start), but hands back the failure.
    pub fn try_start(&self, task: Task<i32>) -> Result<i32> {
        self.core.run_to_completion(task)
    }

    /// Drives `future` to completion on the reactor.
    ///
    /// # Panics
    ///
    /// If the reactor is already running or can no longer make progress.
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let task = coroutine(async move { Ok(future.await) });

        match self.core.run_to_completion(task) {
            Ok(output) => output,
            Err(e) => panic!("Failed to drive future to completion: {:?}", e),
        }
    }

    /// Shuts the reactor down.
    ///
    /// Pending callbacks, timers and fd watchers are dropped without running.
    /// The thread blocks until blocking calls already running on the worker
    /// pool return. The `Drop` implementation does the same.
    pub fn shutdown(self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&self) {
        self.core.shutdown();

        if let Some(installed) = context::uninstall() {
            debug_assert!(Rc::ptr_eq(&installed, &self.core));
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("owner_id", &self.owner_id)
            .field("ticks", &self.ticks())
            .finish_non_exhaustive()
    }
}

/// Runs `task` to completion on this thread's reactor, building a default one
/// if none is installed, and returns its exit status.
pub fn start(task: Task<i32>) -> i32 {
    if context::is_active() {
        return exit_code(context::with_core(|core| core.run_to_completion(task)));
    }

    match Builder::new().try_build() {
        Ok(reactor) => reactor.start(task),
        Err(e) => {
            tracing::error!(error = ?e, "failed to build reactor");
            FAILURE_EXIT_CODE
        }
    }
}

fn exit_code(result: Result<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = ?e, "top-level task failed");
            FAILURE_EXIT_CODE
        }
    }
}

// Test-only helpers
#[cfg(test)]
impl Reactor {
    pub(crate) fn core(&self) -> &Rc<Core> {
        &self.core
    }
}

// Export the builder as a RuntimeConfig object consumed by the reactor core
// and the worker bridge.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) worker_threads: usize,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) max_events: usize,
}

impl RuntimeConfig {
    fn validate(&self) -> Result<()> {
        if self.max_events > i32::MAX as usize {
            anyhow::bail!("max_events ({}) exceeds epoll limits", self.max_events);
        }

        Ok(())
    }
}

impl TryFrom<Builder> for RuntimeConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let worker_threads = match builder.worker_threads {
            Some(n) => n,
            None => thread::available_parallelism()?.get(),
        };

        let cfg = RuntimeConfig {
            worker_threads,
            thread_name: builder.thread_name,
            thread_stack_size: builder.thread_stack_size,
            max_events: builder.max_events,
        };

        cfg.validate()?;

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    assert_impl_all!(RuntimeConfig: Send, Sync, Clone);
    assert_not_impl_any!(Reactor: Send, Sync);

    #[test]
    fn test_config_defaults() -> Result<()> {
        let cfg = RuntimeConfig::try_from(Builder::new())?;

        assert!(cfg.worker_threads > 0);
        assert_eq!(cfg.max_events, MAX_EVENTS);
        assert_eq!(cfg.thread_stack_size, None);
        assert_eq!((cfg.thread_name.0)(), "evbus-worker-0");
        assert_eq!((cfg.thread_name.0)(), "evbus-worker-1");
        Ok(())
    }

    #[test]
    fn test_config_overrides() -> Result<()> {
        let cfg = RuntimeConfig::try_from(
            Builder::new()
                .worker_threads(3)
                .thread_name("rpc-pool")
                .thread_stack_size(1 << 20)
                .max_events(8),
        )?;

        assert_eq!(cfg.worker_threads, 3);
        assert_eq!(cfg.max_events, 8);
        assert_eq!(cfg.thread_stack_size, Some(1 << 20));
        assert_eq!((cfg.thread_name.0)(), "rpc-pool");
        Ok(())
    }

    #[test]
    #[should_panic(expected = "worker_threads must be greater than 0")]
    fn test_zero_worker_threads_rejected() {
        let _ = Builder::new().worker_threads(0);
    }

    #[test]
    #[should_panic(expected = "thread_stack_size must be a power of two")]
    fn test_stack_size_must_be_power_of_two() {
        let _ = Builder::new().thread_stack_size(1000);
    }
}
