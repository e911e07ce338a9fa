//! Linux `epoll`-based engine.
//!
//! [`EpollReactor`] provides the engine primitives on top of:
//! - an `epoll` instance for descriptor readiness,
//! - one `timerfd` per timer watcher,
//! - one `eventfd` per signal watcher, written by a process-wide signal
//!   handler while the watcher is active.
//!
//! Readiness is level-triggered. `EPOLLERR` and `EPOLLHUP` are reported as
//! both readable and writable (masked by the watcher's events), so a caller
//! waiting on either direction learns about the failure on its next I/O call.
//!
//! A signal watcher observes deliveries to the whole process, whichever thread
//! the kernel picks. Starting it installs the handler, stopping the last
//! watcher of a signal restores the disposition that was in place before.

use super::sys::{
    sys_close, sys_epoll_add, sys_epoll_create, sys_epoll_del, sys_eventfd, sys_eventfd_drain,
    sys_route_signal, sys_timerfd_create, sys_timerfd_drain, sys_timerfd_set,
    sys_unroute_signal,
};
use super::{Dispatch, EngineEvents, LoopControl, Reactor, RunMode, WatcherId};
use crate::utils::Slab;

use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, c_int, epoll_event, epoll_wait};
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use tracing::{debug, trace};

/// What a watcher observes, and the descriptor it owns if any.
enum Source {
    /// A caller-owned descriptor.
    Fd { fd: RawFd, events: EngineEvents },

    /// A timerfd owned by the watcher.
    Timer { fd: RawFd, after: Duration },

    /// An eventfd owned by the watcher, bumped on every delivery of `signum`.
    Signal { fd: RawFd, signum: c_int },
}

impl Source {
    fn raw_fd(&self) -> RawFd {
        match self {
            Source::Fd { fd, .. } | Source::Timer { fd, .. } | Source::Signal { fd, .. } => *fd,
        }
    }
}

struct Watcher {
    source: Source,
    active: bool,
}

/// Linux `epoll` engine.
///
/// Watcher ids double as epoll tokens.
pub struct EpollReactor {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,

    watchers: Slab<Watcher>,

    /// Failure of the last run, if it failed.
    pending: Option<io::Error>,

    running: bool,
}

impl EpollReactor {
    /// Creates an engine with its own epoll instance.
    pub fn new() -> io::Result<Self> {
        let epoll = sys_epoll_create()?;

        Ok(Self {
            epoll,
            events: vec![epoll_event { events: 0, u64: 0 }; 64],
            watchers: Slab::new(16),
            pending: None,
            running: false,
        })
    }

    /// Number of active watchers.
    pub fn active_watchers(&self) -> usize {
        self.watchers.iter().filter(|(_, w)| w.active).count()
    }

    /// Number of watchers created and not destroyed.
    pub fn live_watchers(&self) -> usize {
        self.watchers.len()
    }

    /// Acknowledges the fire of watcher `index` and returns its events.
    ///
    /// Timers are one-shot and stop here. `None` means nothing to dispatch.
    fn consume(&mut self, index: usize, flags: u32) -> Option<EngineEvents> {
        let epoll = self.epoll;
        let watcher = self.watchers.get_mut(index)?;

        if !watcher.active {
            return None;
        }

        match watcher.source {
            Source::Fd { events, .. } => {
                let revents = readiness(flags) & (events | EngineEvents::POLLERR);
                (!revents.is_empty()).then_some(revents)
            }
            Source::Timer { fd, .. } => {
                sys_timerfd_drain(fd);
                watcher.active = false;
                let _ = sys_epoll_del(epoll, fd);
                Some(EngineEvents::POLLIN)
            }
            Source::Signal { fd, .. } => {
                (sys_eventfd_drain(fd) > 0).then_some(EngineEvents::POLLIN)
            }
        }
    }

    fn run_loop(&mut self, mode: RunMode, dispatch: &mut dyn Dispatch) -> i32 {
        let mut control = LoopControl::new();

        loop {
            if self.active_watchers() == 0 {
                return 0;
            }

            let timeout = match mode {
                RunMode::Block => -1,
                RunMode::NoWait => 0,
            };

            let n = unsafe {
                epoll_wait(
                    self.epoll,
                    self.events.as_mut_ptr(),
                    self.events.len() as c_int,
                    timeout,
                )
            };

            if n < 0 {
                let err = io::Error::last_os_error();
                // The interrupting signal may be one a watcher routes.
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }

                self.pending = Some(err);
                return -1;
            }

            let fired: Vec<(usize, u32)> = self.events[..n as usize]
                .iter()
                .map(|ev| (ev.u64 as usize, ev.events))
                .collect();

            for (index, flags) in fired {
                let Some(revents) = self.consume(index, flags) else {
                    continue;
                };

                trace!(watcher = index, ?revents, "epoll watcher fired");
                dispatch.fire(&mut control, WatcherId(index), revents);
            }

            if control.stop_requested() || mode == RunMode::NoWait {
                return self.active_watchers() as i32;
            }
        }
    }
}

/// Converts epoll flags to engine events.
fn readiness(flags: u32) -> EngineEvents {
    let mut revents = EngineEvents::empty();

    if flags & (EPOLLIN as u32) != 0 {
        revents |= EngineEvents::POLLIN;
    }
    if flags & (EPOLLOUT as u32) != 0 {
        revents |= EngineEvents::POLLOUT;
    }
    if flags & ((EPOLLERR | EPOLLHUP) as u32) != 0 {
        revents |= EngineEvents::POLLIN | EngineEvents::POLLOUT | EngineEvents::POLLERR;
    }

    revents
}

/// Epoll flags for engine events.
fn interest(events: EngineEvents) -> u32 {
    let mut flags = 0;

    if events.contains(EngineEvents::POLLIN) {
        flags |= EPOLLIN;
    }
    if events.contains(EngineEvents::POLLOUT) {
        flags |= EPOLLOUT;
    }

    flags as u32
}

impl Reactor for EpollReactor {
    fn fd_watcher(&mut self, fd: RawFd, events: EngineEvents) -> io::Result<WatcherId> {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }

        let index = self.watchers.insert(Watcher {
            source: Source::Fd { fd, events },
            active: false,
        });
        Ok(WatcherId(index))
    }

    fn timer_watcher(&mut self, after: Duration) -> io::Result<WatcherId> {
        let fd = sys_timerfd_create()?;

        let index = self.watchers.insert(Watcher {
            source: Source::Timer { fd, after },
            active: false,
        });
        Ok(WatcherId(index))
    }

    fn signal_watcher(&mut self, signum: c_int) -> io::Result<WatcherId> {
        if signum <= 0 {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }

        let fd = sys_eventfd()?;

        let index = self.watchers.insert(Watcher {
            source: Source::Signal { fd, signum },
            active: false,
        });
        Ok(WatcherId(index))
    }

    fn start(&mut self, watcher: WatcherId) -> io::Result<()> {
        let epoll = self.epoll;
        let token = watcher.0 as u64;
        let entry = self
            .watchers
            .get_mut(watcher.0)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown epoll watcher"))?;

        if entry.active {
            return Ok(());
        }

        match &mut entry.source {
            Source::Fd { fd, events } => {
                sys_epoll_add(epoll, *fd, interest(*events), token)?;
            }
            Source::Timer { fd, after } => {
                sys_timerfd_set(*fd, Some(*after))?;
                sys_epoll_add(epoll, *fd, EPOLLIN as u32, token)?;
            }
            Source::Signal { fd, signum } => {
                sys_route_signal(*signum, *fd)?;

                if let Err(err) = sys_epoll_add(epoll, *fd, EPOLLIN as u32, token) {
                    sys_unroute_signal(*signum, *fd);
                    return Err(err);
                }
            }
        }

        entry.active = true;
        Ok(())
    }

    fn stop(&mut self, watcher: WatcherId) {
        let epoll = self.epoll;
        let Some(entry) = self.watchers.get_mut(watcher.0) else {
            return;
        };

        if !entry.active {
            return;
        }
        entry.active = false;

        // The caller may already have closed its descriptor.
        let _ = sys_epoll_del(epoll, entry.source.raw_fd());

        match entry.source {
            Source::Fd { .. } => {}
            Source::Timer { fd, .. } => {
                let _ = sys_timerfd_set(fd, None);
            }
            Source::Signal { fd, signum } => {
                sys_unroute_signal(signum, fd);

                // Deliveries after the last run went to this watcher, not to
                // the previous disposition.
                let late = sys_eventfd_drain(fd);
                if late > 0 {
                    debug!(signum, late, "signal arrived after the run ended");
                }
            }
        }
    }

    fn destroy(&mut self, watcher: WatcherId) {
        self.stop(watcher);

        if let Some(Watcher {
            source: Source::Timer { fd, .. } | Source::Signal { fd, .. },
            ..
        }) = self.watchers.remove(watcher.0)
        {
            sys_close(fd);
        }
    }

    fn run(&mut self, mode: RunMode, dispatch: &mut dyn Dispatch) -> i32 {
        if self.running {
            self.pending = Some(io::Error::other("epoll reactor is already running"));
            return -1;
        }

        self.running = true;
        let count = self.run_loop(mode, dispatch);
        self.running = false;

        count
    }

    fn take_error(&mut self) -> Option<io::Error> {
        self.pending.take()
    }
}

impl Drop for EpollReactor {
    fn drop(&mut self) {
        let ids: Vec<usize> = self.watchers.iter().map(|(index, _)| index).collect();
        if !ids.is_empty() {
            debug!(watchers = ids.len(), "dropping epoll reactor with live watchers");
        }

        for index in ids {
            self.destroy(WatcherId(index));
        }

        sys_close(self.epoll);
    }
}
