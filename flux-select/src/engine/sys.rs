//! Thin `libc` wrappers used by the epoll engine.
//!
//! Every function maps a failing call to [`io::Error::last_os_error`]; none of
//! them retries.
//!
//! Signals are routed with a process-wide `sigaction` handler that writes to
//! an eventfd per route, so a delivery to any thread wakes the epoll loop.

use libc::{
    EFD_CLOEXEC, EFD_NONBLOCK, EINVAL, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, SA_RESTART,
    TFD_CLOEXEC, TFD_NONBLOCK, __errno_location, c_int, c_void, close, epoll_create1, epoll_ctl,
    epoll_event, eventfd, itimerspec, read, sigaction, sigemptyset, sighandler_t,
    timerfd_create, timerfd_settime, timespec, write,
};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use std::{io, mem, ptr};

fn cvt(rc: c_int) -> io::Result<c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

/// Creates a close-on-exec epoll instance.
pub(crate) fn sys_epoll_create() -> io::Result<RawFd> {
    cvt(unsafe { epoll_create1(EPOLL_CLOEXEC) })
}

/// Adds `fd` to `epoll` for `flags`, tagged with `token`.
pub(crate) fn sys_epoll_add(epoll: RawFd, fd: RawFd, flags: u32, token: u64) -> io::Result<()> {
    let mut event = epoll_event {
        events: flags,
        u64: token,
    };

    cvt(unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, fd, &mut event) }).map(drop)
}

/// Removes `fd` from `epoll`.
pub(crate) fn sys_epoll_del(epoll: RawFd, fd: RawFd) -> io::Result<()> {
    cvt(unsafe { epoll_ctl(epoll, EPOLL_CTL_DEL, fd, ptr::null_mut()) }).map(drop)
}

/// Closes a file descriptor.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

/// Creates a non-blocking monotonic timerfd.
pub(crate) fn sys_timerfd_create() -> io::Result<RawFd> {
    cvt(unsafe { timerfd_create(libc::CLOCK_MONOTONIC, TFD_NONBLOCK | TFD_CLOEXEC) })
}

/// Arms `fd` to expire once, `after` from now. `None` disarms it.
pub(crate) fn sys_timerfd_set(fd: RawFd, after: Option<Duration>) -> io::Result<()> {
    let value = match after {
        // A zero it_value disarms the timer, so expire as soon as possible.
        Some(after) => {
            let after = after.max(Duration::from_nanos(1));
            timespec {
                tv_sec: after.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
                tv_nsec: after.subsec_nanos() as _,
            }
        }
        None => timespec {
            tv_sec: 0,
            tv_nsec: 0,
        },
    };

    let spec = itimerspec {
        it_interval: timespec {
            tv_sec: 0,
            tv_nsec: 0,
        },
        it_value: value,
    };

    cvt(unsafe { timerfd_settime(fd, 0, &spec, ptr::null_mut()) }).map(drop)
}

/// Consumes the expiration count of a timerfd.
pub(crate) fn sys_timerfd_drain(fd: RawFd) {
    let mut expirations = 0u64;
    unsafe {
        read(fd, &mut expirations as *mut u64 as *mut c_void, 8);
    }
}

/// Creates a non-blocking eventfd.
pub(crate) fn sys_eventfd() -> io::Result<RawFd> {
    cvt(unsafe { eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) })
}

/// Resets an eventfd and returns the count it held.
pub(crate) fn sys_eventfd_drain(fd: RawFd) -> u64 {
    let mut count = 0u64;
    let n = unsafe { read(fd, &mut count as *mut u64 as *mut c_void, 8) };

    if n == 8 { count } else { 0 }
}

/// Route table read by the signal handler.
///
/// Each slot is empty (`0`) or holds `signum << 32 | fd`. The handler may only
/// touch atomics and `write(2)`, so it scans this table instead of taking a
/// lock.
static ROUTES: [AtomicU64; MAX_ROUTES] = [const { AtomicU64::new(0) }; MAX_ROUTES];

const MAX_ROUTES: usize = 64;

/// A disposition installed by [`sys_route_signal`], with the one it replaced.
struct Installed {
    signum: c_int,
    routes: usize,
    previous: sigaction,
}

/// Installed dispositions, one per routed signal.
static INSTALLED: Mutex<Vec<Installed>> = Mutex::new(Vec::new());

fn route_entry(signum: c_int, fd: RawFd) -> u64 {
    ((signum as u64) << 32) | fd as u32 as u64
}

extern "C" fn on_signal(signum: c_int) {
    let saved = unsafe { *__errno_location() };
    let one = 1u64;

    for slot in &ROUTES {
        let entry = slot.load(Ordering::Acquire);
        if entry != 0 && (entry >> 32) as c_int == signum {
            let fd = entry as u32 as RawFd;
            unsafe { write(fd, &one as *const u64 as *const c_void, 8) };
        }
    }

    unsafe { *__errno_location() = saved };
}

/// Routes deliveries of `signum` to the eventfd `fd`, process wide.
///
/// The first route for a signal installs the handler; the previous
/// disposition is kept and restored by the last [`sys_unroute_signal`]. A
/// signal delivered to any thread is routed, so no thread has to block it.
pub(crate) fn sys_route_signal(signum: c_int, fd: RawFd) -> io::Result<()> {
    if signum <= 0 || fd < 0 {
        return Err(io::Error::from_raw_os_error(EINVAL));
    }

    let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
    let entry = route_entry(signum, fd);

    let slot = ROUTES
        .iter()
        .find(|slot| {
            slot.compare_exchange(0, entry, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
        .ok_or_else(|| io::Error::other("signal route table is full"))?;

    if let Some(known) = installed.iter_mut().find(|known| known.signum == signum) {
        known.routes += 1;
        return Ok(());
    }

    let mut action: sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = on_signal as extern "C" fn(c_int) as sighandler_t;
    action.sa_flags = SA_RESTART;
    unsafe { sigemptyset(&mut action.sa_mask) };

    let mut previous: sigaction = unsafe { mem::zeroed() };
    if let Err(err) = cvt(unsafe { libc::sigaction(signum, &action, &mut previous) }) {
        slot.store(0, Ordering::Release);
        return Err(err);
    }

    installed.push(Installed {
        signum,
        routes: 1,
        previous,
    });
    Ok(())
}

/// Removes the route of `signum` to `fd`.
///
/// Restores the previous disposition once no route for `signum` is left.
pub(crate) fn sys_unroute_signal(signum: c_int, fd: RawFd) {
    let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
    let entry = route_entry(signum, fd);

    let removed = ROUTES.iter().any(|slot| {
        slot.compare_exchange(entry, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    });
    if !removed {
        return;
    }

    let Some(at) = installed.iter().position(|known| known.signum == signum) else {
        return;
    };

    installed[at].routes -= 1;
    if installed[at].routes == 0 {
        let known = installed.swap_remove(at);
        unsafe { libc::sigaction(signum, &known.previous, ptr::null_mut()) };
    }
}
