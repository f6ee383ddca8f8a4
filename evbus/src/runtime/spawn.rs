//! Fire-and-forget execution of tasks.
//!
//! A detached task runs independently of whoever started it: nobody waits for
//! its result and its failures stop at the detach boundary. Detached work
//! cannot be retracted once started.
use crate::task::Task;

/// Starts `task` right away, discarding its value. A failure is logged at
/// `debug` level and otherwise swallowed.
pub fn spawn<T: 'static>(task: Task<T>) {
    task.run(
        |_| {},
        |failure| tracing::debug!(error = ?failure, "detached task failed"),
    );
}

/// Returns a task that, when run, starts `task` and resolves immediately
/// without waiting for it.
///
/// ```ignore
/// coroutine(async move {
///     detach(notify_peers(bus.clone())).await?;
///     // `notify_peers` may still be running here.
///     Ok(())
/// })
/// ```
pub fn detach<T: 'static>(task: Task<T>) -> Task<()> {
    Task::new(move |pass, _| {
        spawn(task);
        pass(());
    })
}
