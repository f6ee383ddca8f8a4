use crate::error::{EvError, panic_payload_as_str};
use crate::runtime::notify::Notifier;
use crate::runtime::runtime::{RuntimeConfig, ThreadNameFn};
use crate::context;
use crate::task::{Continuation, Task};
use anyhow::{Result, anyhow};
use crossbeam_deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};
use slab::Slab;
use std::any::Any;
use std::cell::RefCell;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

type Completion = (usize, Box<dyn Any + Send>);

type Resume = Box<dyn FnOnce(Box<dyn Any + Send>)>;

/// Runs `f` on the reactor's worker pool and resolves with its result on the
/// reactor thread.
///
/// Use this for calls that would otherwise block the reactor thread (e.g. a
/// synchronous database transaction). A panic inside `f` is delivered as an
/// [`EvError::Panicked`] failure.
pub fn blocking<F, R>(f: F) -> Task<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    Task::new(move |pass, fail| {
        let k = Continuation::new(pass, fail);

        match context::current() {
            Ok(core) => core.bridge.submit(f, k),
            Err(e) => k.fail(e.into()),
        }
    })
}

/// State shared between the reactor thread and the workers.
struct Shared {
    injector: Injector<Job>,

    /// Guards the shutdown flag and pairs with `cond` for parking.
    shutdown: Mutex<bool>,
    cond: Condvar,

    /// Finished jobs waiting for the reactor thread.
    completions: Mutex<Vec<Completion>>,

    notifier: Arc<Notifier>,
}

/// Runs blocking calls on a fixed pool of OS threads and resumes their
/// continuations on the reactor thread.
///
/// Workers only ever run the submitted closure and push its result; they never
/// touch tasks. Threads are spawned on first use.
pub(crate) struct WorkerBridge {
    shared: Arc<Shared>,

    num_workers: usize,
    thread_name: ThreadNameFn,
    thread_stack_size: Option<usize>,

    /// Continuations of submitted jobs, keyed by the id carried by the job.
    pending: RefCell<Slab<Resume>>,

    handles: RefCell<Vec<thread::JoinHandle<()>>>,
}

impl WorkerBridge {
    pub(crate) fn new(cfg: &RuntimeConfig, notifier: Arc<Notifier>) -> Self {
        Self {
            shared: Arc::new(Shared {
                injector: Injector::new(),
                shutdown: Mutex::new(false),
                cond: Condvar::new(),
                completions: Mutex::new(Vec::new()),
                notifier,
            }),
            num_workers: cfg.worker_threads,
            thread_name: cfg.thread_name.clone(),
            thread_stack_size: cfg.thread_stack_size,
            pending: RefCell::new(Slab::new()),
            handles: RefCell::new(Vec::new()),
        }
    }

    /// Queues `f` on the pool. `k` is resumed on the reactor thread with the
    /// closure's result, or with a failure if it panicked.
    pub(crate) fn submit<F, R>(&self, f: F, k: Continuation<R>)
    where
        F: FnOnce() -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        if let Err(e) = self.ensure_workers() {
            return k.fail(e);
        }

        let key = self
            .pending
            .borrow_mut()
            .insert(Box::new(move |any: Box<dyn Any + Send>| {
                match any.downcast::<Result<R>>() {
                    Ok(result) => k.deliver(*result),
                    Err(_) => k.fail(EvError::Abandoned.into()),
                }
            }));

        let shared = Arc::clone(&self.shared);
        let job: Job = Box::new(move || {
            let result: Result<R> = match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(result) => result,
                Err(payload) => Err(EvError::Panicked(panic_payload_as_str(&payload)).into()),
            };

            shared.completions.lock().push((key, Box::new(result)));
            shared.notifier.notify();
        });

        self.shared.injector.push(job);

        // Notify under the lock so a worker about to park cannot miss it.
        let _guard = self.shared.shutdown.lock();
        self.shared.cond.notify_one();
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Resumes the continuations of every finished job.
    pub(crate) fn drain_completions(&self) {
        let done = mem::take(&mut *self.shared.completions.lock());

        for (key, result) in done {
            let resume = self.pending.borrow_mut().try_remove(key);
            if let Some(resume) = resume {
                resume(result);
            }
        }
    }

    /// Stops the workers and waits for them. Jobs still queued are dropped;
    /// a job already running is waited for.
    pub(crate) fn shutdown(&self) {
        *self.shared.shutdown.lock() = true;
        self.shared.cond.notify_all();

        if let Err(e) = self.join_all() {
            tracing::error!(error = ?e, "worker bridge shutdown");
        }

        // Queued jobs hold the shared state alive.
        let mut dropped = 0;
        loop {
            match self.shared.injector.steal() {
                Steal::Success(job) => {
                    drop(job);
                    dropped += 1;
                }
                Steal::Retry => continue,
                Steal::Empty => break,
            }
        }
        if dropped > 0 {
            tracing::debug!(dropped, "dropped queued blocking calls");
        }

        // Resumes still pending hold continuations that can never fire.
        let pending = mem::take(&mut *self.pending.borrow_mut());
        drop(pending);
    }

    fn ensure_workers(&self) -> Result<()> {
        let mut handles = self.handles.borrow_mut();
        if !handles.is_empty() {
            return Ok(());
        }

        for _ in 0..self.num_workers {
            handles.push(self.spawn_worker_thread()?);
        }

        tracing::debug!(workers = handles.len(), "worker bridge started");
        Ok(())
    }

    fn spawn_worker_thread(&self) -> Result<thread::JoinHandle<()>> {
        let mut builder = thread::Builder::new().name((self.thread_name.0)());

        if let Some(stack_size) = self.thread_stack_size {
            builder = builder.stack_size(stack_size);
        }

        let shared = Arc::clone(&self.shared);
        let handle = builder
            .spawn(move || worker_loop(shared))
            .map_err(|e| anyhow!("failed to spawn worker thread: {}", e))?;

        Ok(handle)
    }

    fn join_all(&self) -> Result<()> {
        let handles = mem::take(&mut *self.handles.borrow_mut());

        let errors = handles
            .into_iter()
            .filter_map(|handle| handle.join().err())
            .count();

        if errors == 0 {
            Ok(())
        } else {
            Err(anyhow!("{} thread(s) panicked", errors))
        }
    }
}

impl Drop for WorkerBridge {
    fn drop(&mut self) {
        if !self.handles.get_mut().is_empty() {
            self.shutdown();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    tracing::trace!("worker started");

    loop {
        if *shared.shutdown.lock() {
            break;
        }

        match shared.injector.steal() {
            Steal::Success(job) => job(),
            Steal::Retry => continue,
            Steal::Empty => {
                let mut shutdown = shared.shutdown.lock();
                if !*shutdown && shared.injector.is_empty() {
                    shared.cond.wait(&mut shutdown);
                }
            }
        }
    }

    tracing::trace!("worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Shared: Send, Sync);
    assert_impl_all!(Job: Send);
}
