use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// An `eventfd` used to wake the reactor out of `epoll_wait` from other
/// threads. Level-triggered: stays readable until drained.
#[derive(Debug)]
pub(crate) struct Notifier {
    fd: OwnedFd,
}

impl Notifier {
    pub(crate) fn try_new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub(crate) fn notify(&self) {
        let one: u64 = 1;

        // EAGAIN only happens when the counter is saturated, which still
        // leaves the fd readable.
        let _ = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                size_of::<u64>(),
            )
        };
    }

    /// Resets the counter. Returns how many notifications were coalesced.
    pub(crate) fn drain(&self) -> u64 {
        let mut count: u64 = 0;

        let ret = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut count as *mut u64 as *mut libc::c_void,
                size_of::<u64>(),
            )
        };

        if ret < 0 { 0 } else { count }
    }
}

impl AsRawFd for Notifier {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Notifier: Send, Sync);

    #[test]
    fn test_notifications_coalesce() -> Result<()> {
        let notifier = Notifier::try_new()?;
        assert_eq!(notifier.drain(), 0);

        notifier.notify();
        notifier.notify();
        notifier.notify();

        assert_eq!(notifier.drain(), 3);
        assert_eq!(notifier.drain(), 0);
        Ok(())
    }
}
