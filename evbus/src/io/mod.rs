//! Readiness notifications for file descriptors owned by collaborators
//! (RPC sockets, database connections).
use crate::context;
use crate::error::EvError;
use crate::runtime::Interest;
use crate::task::Task;
use std::os::fd::RawFd;

/// Resolves once `fd` is readable, or has hung up.
///
/// Only one readiness task per fd may be pending at a time; a second one fails
/// with an I/O error.
pub fn readable(fd: RawFd) -> Task<()> {
    ready(fd, Interest::Readable)
}

/// Resolves once `fd` is writable.
pub fn writable(fd: RawFd) -> Task<()> {
    ready(fd, Interest::Writable)
}

fn ready(fd: RawFd, interest: Interest) -> Task<()> {
    Task::new(move |pass, fail| {
        let core = match context::current() {
            Ok(core) => core,
            Err(e) => return fail(e.into()),
        };

        // On error the callback, and `pass` with it, is dropped unrun.
        if let Err(e) = core.watch(fd, interest, Box::new(move || pass(()))) {
            fail(EvError::Io(e).into());
        }
    })
}

#[cfg(test)]
mod tests;
