use crate::coroutine;
use crate::error::EvError;
use crate::runtime::bridge::WorkerBridge;
use crate::runtime::notify::Notifier;
use crate::runtime::runtime::RuntimeConfig;
use crate::task::Task;
use crate::utils::ScopeGuard;
use anyhow::Result;
use slab::Slab;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

pub(crate) type Callback = Box<dyn FnOnce()>;

// Epoll user data of the bridge notifier. Watcher keys are slab indices and
// never reach this value.
const NOTIFY_TOKEN: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
    Readable,
    Writable,
}

impl Interest {
    fn as_epoll_events(self) -> u32 {
        let events = match self {
            Interest::Readable => libc::EPOLLIN | libc::EPOLLRDHUP,
            Interest::Writable => libc::EPOLLOUT,
        };

        (events | libc::EPOLLONESHOT) as u32
    }
}

struct Watcher {
    fd: RawFd,
    callback: Callback,
}

/// Single-threaded event loop state.
///
/// Everything in here is only ever touched from the thread that built the
/// reactor; the only cross-thread entry point is the bridge's notifier.
pub(crate) struct Core {
    pub(crate) owner_id: ThreadId,

    cfg: RuntimeConfig,

    epoll: OwnedFd,

    notifier: Arc<Notifier>,

    /// Callbacks deferred to the next turn.
    ready: RefCell<VecDeque<Callback>>,

    /// Ordered by deadline, ties broken by insertion order.
    timers: RefCell<BTreeMap<(Instant, u64), Callback>>,
    timer_seq: Cell<u64>,

    /// One-shot fd readiness registrations, keyed by epoll user data.
    watchers: RefCell<Slab<Watcher>>,

    /// Zero-delay idle callback draining the coroutine cleaning list.
    idle_armed: Cell<bool>,

    /// Set while a top-level task is being driven.
    running: Cell<bool>,

    ticks: Cell<u64>,

    pub(crate) bridge: WorkerBridge,
}

impl Core {
    pub(crate) fn try_new(cfg: RuntimeConfig) -> Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(EvError::Io(io::Error::last_os_error()).into());
        }
        let epoll = unsafe { OwnedFd::from_raw_fd(epfd) };

        let notifier = Arc::new(Notifier::try_new()?);
        epoll_ctl(
            &epoll,
            libc::EPOLL_CTL_ADD,
            notifier.as_raw_fd(),
            libc::EPOLLIN as u32,
            NOTIFY_TOKEN,
        )?;

        let bridge = WorkerBridge::new(&cfg, Arc::clone(&notifier));

        Ok(Self {
            owner_id: thread::current().id(),
            cfg,
            epoll,
            notifier,
            ready: RefCell::new(VecDeque::new()),
            timers: RefCell::new(BTreeMap::new()),
            timer_seq: Cell::new(0),
            watchers: RefCell::new(Slab::new()),
            idle_armed: Cell::new(false),
            running: Cell::new(false),
            ticks: Cell::new(0),
            bridge,
        })
    }

    pub(crate) fn defer(&self, callback: Callback) {
        self.ready.borrow_mut().push_back(callback);
    }

    pub(crate) fn add_timer(&self, deadline: Instant, callback: Callback) {
        let seq = self.timer_seq.get();
        self.timer_seq.set(seq.wrapping_add(1));
        self.timers.borrow_mut().insert((deadline, seq), callback);
    }

    /// Registers a one-shot readiness watcher. Only one watcher per fd can be
    /// pending at a time.
    pub(crate) fn watch(&self, fd: RawFd, interest: Interest, callback: Callback) -> io::Result<()> {
        let key = self.watchers.borrow_mut().insert(Watcher { fd, callback });

        if let Err(e) = epoll_ctl(
            &self.epoll,
            libc::EPOLL_CTL_ADD,
            fd,
            interest.as_epoll_events(),
            key as u64,
        ) {
            self.watchers.borrow_mut().remove(key);
            return Err(e);
        }

        Ok(())
    }

    pub(crate) fn arm_idle(&self) {
        self.idle_armed.set(true);
    }

    #[cfg(test)]
    pub(crate) fn is_idle_armed(&self) -> bool {
        self.idle_armed.get()
    }

    pub(crate) fn ticks(&self) -> u64 {
        self.ticks.get()
    }

    /// Runs `task` and turns the loop until it resolves.
    pub(crate) fn run_to_completion<T: 'static>(&self, task: Task<T>) -> Result<T> {
        if self.running.replace(true) {
            return Err(EvError::ReactorBusy.into());
        }
        let _running = ScopeGuard::new(|| self.running.set(false));

        let outcome: Rc<RefCell<Option<Result<T>>>> = Rc::new(RefCell::new(None));
        let (on_pass, on_fail) = (Rc::clone(&outcome), Rc::clone(&outcome));

        task.run(
            move |value| *on_pass.borrow_mut() = Some(Ok(value)),
            move |failure| *on_fail.borrow_mut() = Some(Err(failure)),
        );

        self.run_until(|| outcome.borrow().is_some())?;

        let result = outcome.borrow_mut().take();
        match result {
            Some(result) => result,
            None => Err(EvError::Stalled.into()),
        }
    }

    fn run_until(&self, is_done: impl Fn() -> bool) -> Result<()> {
        loop {
            let tick = self.ticks.get().wrapping_add(1);
            self.ticks.set(tick);

            let ran = self.run_ready();
            let fired = self.fire_timers(Instant::now());

            if self.idle_armed.replace(false) {
                coroutine::do_cleaning_as_scheduled();
            }

            if is_done() {
                return Ok(());
            }

            let timeout = self.next_timeout()?;
            tracing::trace!(tick, ran, fired, ?timeout, "reactor turn");

            self.poll_os(timeout)?;
        }
    }

    /// Runs the callbacks queued before this turn started. Anything they
    /// queue runs on the next turn.
    fn run_ready(&self) -> usize {
        let batch = mem::take(&mut *self.ready.borrow_mut());
        let ran = batch.len();

        for callback in batch {
            callback();
        }

        ran
    }

    fn fire_timers(&self, now: Instant) -> usize {
        let mut fired = 0;

        loop {
            let expired = {
                let mut timers = self.timers.borrow_mut();
                let due = matches!(timers.first_key_value(), Some(((deadline, _), _)) if *deadline <= now);
                if due { timers.pop_first() } else { None }
            };

            match expired {
                Some((_, callback)) => {
                    callback();
                    fired += 1;
                }
                None => return fired,
            }
        }
    }

    fn next_timeout(&self) -> Result<Option<Duration>, EvError> {
        if !self.ready.borrow().is_empty() || self.idle_armed.get() {
            return Ok(Some(Duration::ZERO));
        }

        if let Some(((deadline, _), _)) = self.timers.borrow().first_key_value() {
            return Ok(Some(deadline.saturating_duration_since(Instant::now())));
        }

        if !self.watchers.borrow().is_empty() || self.bridge.in_flight() > 0 {
            return Ok(None);
        }

        Err(EvError::Stalled)
    }

    fn poll_os(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout_ms = match timeout {
            None => -1,
            // Round up so we never wake right before a deadline and spin.
            Some(d) => d.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32,
        };

        let mut events: Vec<libc::epoll_event> = Vec::with_capacity(self.cfg.max_events);
        let n = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                events.as_mut_ptr(),
                self.cfg.max_events as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(EvError::Io(err).into());
        }

        // Safety: the kernel initialized the first `n` entries.
        unsafe { events.set_len(n as usize) };

        for event in events {
            let token = event.u64;

            if token == NOTIFY_TOKEN {
                self.notifier.drain();
                self.bridge.drain_completions();
            } else {
                self.fire_watcher(token as usize);
            }
        }

        Ok(())
    }

    fn fire_watcher(&self, key: usize) {
        let Some(watcher) = self.watchers.borrow_mut().try_remove(key) else {
            return;
        };

        // One-shot: the registration is disabled, drop it so the fd can be
        // watched again. The fd may already be closed by the owner.
        let _ = epoll_ctl(&self.epoll, libc::EPOLL_CTL_DEL, watcher.fd, 0, 0);

        (watcher.callback)();
    }

    /// Drops everything still pending, stops the bridge and drains the
    /// cleaning list.
    pub(crate) fn shutdown(&self) {
        let ready = mem::take(&mut *self.ready.borrow_mut());
        let timers = mem::take(&mut *self.timers.borrow_mut());
        let watchers = mem::take(&mut *self.watchers.borrow_mut());

        tracing::debug!(
            ticks = self.ticks(),
            ready = ready.len(),
            timers = timers.len(),
            watchers = watchers.len(),
            bridge_in_flight = self.bridge.in_flight(),
            "reactor shutting down"
        );

        drop(ready);
        drop(timers);
        drop(watchers);

        self.bridge.shutdown();

        self.idle_armed.set(false);
        if !coroutine::is_cleaning_list_empty() {
            coroutine::do_cleaning_as_scheduled();
        }
    }
}

fn epoll_ctl(epoll: &OwnedFd, op: libc::c_int, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
    let mut event = libc::epoll_event { events, u64: token };

    let ret = unsafe { libc::epoll_ctl(epoll.as_raw_fd(), op, fd, &mut event) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
