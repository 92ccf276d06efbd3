//! Event-notification facade: a thin wrapper over epoll.
//!
//! One [`Reactor`] per readiness domain: a listener owns one for its
//! listening fd and a separate one for its peers' fds.

use std::io;
use std::os::fd::RawFd;
use std::thread;
use std::time::Duration;

use log::debug;

use crate::ffi::{
    self, EMFILE, ENFILE, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN,
    EPOLLRDHUP, EpollEvent,
};

/// What to watch a file descriptor for when arming it.
#[derive(Debug, Clone, Copy)]
pub struct Interest {
    /// Edge-triggered (listener fds) vs level-triggered (peer fds are
    /// armed edge-triggered too in this crate; the read helpers drain to
    /// `WouldBlock` so level- or edge-triggered both work).
    pub edge_triggered: bool,
    /// Watch for remote-hangup in addition to readable/error. Always set
    /// for peer fds, optional for listening fds (which never see RDHUP).
    pub watch_hangup: bool,
}

impl Interest {
    pub fn listener() -> Interest {
        Interest {
            edge_triggered: true,
            watch_hangup: false,
        }
    }

    pub fn peer() -> Interest {
        Interest {
            edge_triggered: true,
            watch_hangup: true,
        }
    }

    fn as_bits(&self) -> u32 {
        let mut bits = EPOLLIN;
        if self.edge_triggered {
            bits |= EPOLLET;
        }
        if self.watch_hangup {
            bits |= EPOLLRDHUP;
        }
        bits
    }
}

/// A single notification returned by [`Reactor::wait`].
#[derive(Debug, Clone, Copy)]
pub struct RawEvent {
    bits: u32,
    pub fd: RawFd,
}

impl RawEvent {
    /// An event is an error if it carries the error flag OR the hangup
    /// flag OR it does not carry the readable flag.
    pub fn is_error(&self) -> bool {
        (self.bits & EPOLLERR != 0) || (self.bits & EPOLLHUP != 0) || (self.bits & EPOLLIN == 0)
    }

    pub fn is_readable(&self) -> bool {
        self.bits & EPOLLIN != 0
    }
}

/// One epoll instance, plus the interest-arming and teardown helpers built
/// on top of it.
pub struct Reactor {
    epfd: RawFd,
}

impl Reactor {
    /// Creates a new reactor. Retries indefinitely with a 1-second backoff
    /// on `EMFILE`/`ENFILE` ("too many open files") — the only place in
    /// this crate that blocks on retry. Every other error surfaces
    /// immediately.
    pub fn create() -> io::Result<Reactor> {
        loop {
            let epfd = unsafe { ffi::epoll_create1(0) };
            if epfd >= 0 {
                return Ok(Reactor { epfd });
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(EMFILE) | Some(ENFILE) => {
                    debug!("epoll_create1 failed (fd table exhausted), retrying in 1s");
                    thread::sleep(Duration::from_secs(1));
                }
                _ => return Err(err),
            }
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.epfd
    }

    /// Subscribes `fd` for notification under `interest`.
    pub fn arm(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut event = EpollEvent {
            events: interest.as_bits(),
            data: fd as u64,
        };
        let res = unsafe { ffi::epoll_ctl(self.epfd, EPOLL_CTL_ADD, fd, &mut event) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Removes `fd` from the interest list without closing the reactor.
    pub fn disarm(&self, fd: RawFd) -> io::Result<()> {
        let mut event = EpollEvent { events: 0, data: 0 };
        let res = unsafe { ffi::epoll_ctl(self.epfd, EPOLL_CTL_DEL, fd, &mut event) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Waits for events, filling `out` (cleared first). `timeout = None`
    /// blocks indefinitely, which is this crate's default wait mode.
    pub fn wait(&self, out: &mut Vec<RawEvent>, capacity: usize, timeout: Option<Duration>) -> io::Result<()> {
        let mut raw: Vec<EpollEvent> = Vec::with_capacity(capacity);
        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let count = unsafe {
            ffi::epoll_wait(self.epfd, raw.as_mut_ptr(), capacity as i32, timeout_ms)
        };
        if count < 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe { raw.set_len(count as usize) };

        out.clear();
        out.extend(raw.into_iter().map(|e| RawEvent {
            bits: e.events,
            fd: e.data as RawFd,
        }));
        Ok(())
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        let res = unsafe { ffi::close(self.epfd) };
        if res < 0 {
            log::error!(
                "failed to close epoll instance {}: {}",
                self.epfd,
                io::Error::last_os_error()
            );
        }
    }
}
