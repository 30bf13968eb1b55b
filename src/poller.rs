use log::info;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::os::unix::io::{BorrowedFd, RawFd};

/// How long a single poll call may block. Short enough that registration
/// and shutdown never wait noticeably on the driver.
pub const DEFAULT_POLL_TIMEOUT_MS: u16 = 100;

/// Readiness poller the connection manager drives its endpoints with.
///
/// Registering a fd that is already registered is a silent no-op, as is
/// unregistering one that was never added.
pub trait Poller: Send {
    fn register(&mut self, fd: RawFd);

    fn unregister(&mut self, fd: RawFd);

    /// Blocks up to the poller's timeout and returns the fds with bytes
    /// (or a hangup) waiting to be read.
    fn poll(&mut self) -> Vec<RawFd>;

    /// Drops whatever the poller holds, rendering it empty.
    fn release(&mut self);
}

/// Portable level-triggered backend: keeps a plain list of fds and hands
/// the whole thing to poll(2) on every call.
pub struct SelectPoller {
    fds: Vec<RawFd>,
    timeout_ms: u16,
}

impl SelectPoller {
    pub fn new(timeout_ms: u16) -> Self {
        Self {
            fds: Vec::new(),
            timeout_ms,
        }
    }
}

impl Default for SelectPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_TIMEOUT_MS)
    }
}

impl Poller for SelectPoller {
    fn register(&mut self, fd: RawFd) {
        if !self.fds.contains(&fd) {
            self.fds.push(fd);
        }
    }

    fn unregister(&mut self, fd: RawFd) {
        self.fds.retain(|&registered| registered != fd);
    }

    fn poll(&mut self) -> Vec<RawFd> {
        let interest = PollFlags::POLLIN | PollFlags::POLLPRI;
        let mut poll_fds: Vec<PollFd> = self
            .fds
            .iter()
            .map(|&fd| {
                // The manager unregisters every fd before the endpoint that
                // owns it is dropped, so the descriptors outlive this call
                let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
                PollFd::new(borrowed, interest)
            })
            .collect();

        match poll(&mut poll_fds, PollTimeout::from(self.timeout_ms)) {
            Ok(n) if n > 0 => {
                // Hangups and errors count as readable so the endpoint gets
                // to observe the EOF and terminate
                let ready = interest | PollFlags::POLLHUP | PollFlags::POLLERR;
                poll_fds
                    .iter()
                    .zip(&self.fds)
                    .filter(|(poll_fd, _)| {
                        poll_fd
                            .revents()
                            .map(|revents| revents.intersects(ready))
                            .unwrap_or(false)
                    })
                    .map(|(_, &fd)| fd)
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    fn release(&mut self) {
        self.fds.clear();
    }
}

#[cfg(target_os = "linux")]
pub use self::linux::EpollPoller;

#[cfg(target_os = "linux")]
mod linux {
    use super::Poller;
    use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
    use std::os::unix::io::{BorrowedFd, RawFd};

    /// Scalable backend over the kernel's interest list; preferred when
    /// available since poll(2) rescans every registered fd per call.
    pub struct EpollPoller {
        epoll: Epoll,
        timeout_ms: u16,
    }

    impl EpollPoller {
        pub fn new(timeout_ms: u16) -> nix::Result<Self> {
            Ok(Self {
                epoll: Epoll::new(EpollCreateFlags::empty())?,
                timeout_ms,
            })
        }
    }

    impl Poller for EpollPoller {
        fn register(&mut self, fd: RawFd) {
            let event = EpollEvent::new(EpollFlags::EPOLLIN | EpollFlags::EPOLLPRI, fd as u64);
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            // EEXIST for a duplicate registration is part of the contract
            let _ = self.epoll.add(borrowed, event);
        }

        fn unregister(&mut self, fd: RawFd) {
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            // ENOENT for an unknown fd is part of the contract
            let _ = self.epoll.delete(borrowed);
        }

        fn poll(&mut self) -> Vec<RawFd> {
            let mut events = [EpollEvent::empty(); 64];
            match self
                .epoll
                .wait(&mut events, EpollTimeout::from(self.timeout_ms))
            {
                Ok(n) => events[..n].iter().map(|event| event.data() as RawFd).collect(),
                Err(_) => Vec::new(),
            }
        }

        fn release(&mut self) {
            // The epoll instance goes away with the poller; nothing else is
            // held on to
        }
    }
}

/// The poller a freshly created manager uses: epoll where the OS has it,
/// the portable backend everywhere else.
#[cfg(target_os = "linux")]
pub fn default_poller() -> Box<dyn Poller> {
    match EpollPoller::new(DEFAULT_POLL_TIMEOUT_MS) {
        Ok(poller) => {
            info!("Using epoll");
            Box::new(poller)
        }
        Err(errno) => {
            info!("Using poll as epoll is not available: {}", errno);
            Box::new(SelectPoller::new(DEFAULT_POLL_TIMEOUT_MS))
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn default_poller() -> Box<dyn Poller> {
    info!("Using poll as epoll is not available");
    Box::new(SelectPoller::new(DEFAULT_POLL_TIMEOUT_MS))
}
