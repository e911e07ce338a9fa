//! Reactor engine primitives.
//!
//! The selector does not know how readiness is detected. It talks to an engine
//! through the [`Reactor`] trait, which exposes the fixed primitive set a
//! callback-driven event loop offers:
//! - create fd, timer and signal watchers,
//! - start, stop and destroy them,
//! - run the loop until stopped, or drain what is ready and return,
//! - report a pending engine failure after a failed run.
//!
//! Watcher callbacks are not closures owned by the engine. Instead, the caller
//! passes a [`Dispatch`] into [`Reactor::run`] and the engine reports every fired
//! watcher to it, together with a [`LoopControl`] used to request a stop.
//!
//! Two engines ship with the crate: the deterministic [`lab::LabReactor`] and,
//! on Linux, [`epoll::EpollReactor`].

pub mod lab;

#[cfg(target_os = "linux")]
pub mod epoll;

#[cfg(target_os = "linux")]
mod sys;

use std::fmt;
use std::io;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::os::fd::RawFd;
use std::time::Duration;

use libc::c_int;

/// Engine-native event mask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EngineEvents(u32);

impl EngineEvents {
    pub const POLLIN: EngineEvents = EngineEvents(0x01);
    pub const POLLOUT: EngineEvents = EngineEvents(0x02);
    pub const POLLERR: EngineEvents = EngineEvents(0x04);

    pub const fn empty() -> Self {
        EngineEvents(0)
    }

    /// Builds a mask from raw bits. Unknown bits are kept.
    pub const fn from_bits(bits: u32) -> Self {
        EngineEvents(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if every bit of `other` is set in `self`.
    pub const fn contains(self, other: EngineEvents) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EngineEvents {
    type Output = EngineEvents;

    fn bitor(self, rhs: Self) -> Self {
        EngineEvents(self.0 | rhs.0)
    }
}

impl BitOrAssign for EngineEvents {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EngineEvents {
    type Output = EngineEvents;

    fn bitand(self, rhs: Self) -> Self {
        EngineEvents(self.0 & rhs.0)
    }
}

impl fmt::Debug for EngineEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineEvents({:#x})", self.0)
    }
}

/// Handle of one engine watcher.
///
/// Issued by the engine on creation and valid until [`Reactor::destroy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(pub(crate) usize);

impl WatcherId {
    pub const fn new(index: usize) -> Self {
        WatcherId(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

/// How a call to [`Reactor::run`] behaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Run until a callback requests a stop or no watcher is active.
    Block,

    /// Dispatch what is already ready, then return without blocking.
    NoWait,
}

/// Loop control handed to [`Dispatch::fire`].
#[derive(Debug, Default)]
pub struct LoopControl {
    stop: bool,
}

impl LoopControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the engine to leave the current run once the watchers fired in
    /// this iteration have been dispatched.
    pub fn request_stop(&mut self) {
        self.stop = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop
    }
}

/// Receiver of watcher fires during a [`Reactor::run`].
pub trait Dispatch {
    /// Called once per fired watcher, on the thread running the engine.
    fn fire(&mut self, control: &mut LoopControl, watcher: WatcherId, revents: EngineEvents);
}

/// The primitive set a callback-driven reactor engine provides.
///
/// Watchers are created stopped. An engine allows a single active run at a
/// time; a nested [`run`](Reactor::run) fails with a negative count.
pub trait Reactor {
    /// Creates a watcher observing `fd` for `events`.
    fn fd_watcher(&mut self, fd: RawFd, events: EngineEvents) -> io::Result<WatcherId>;

    /// Creates a one-shot timer firing `after` the moment it is started.
    fn timer_watcher(&mut self, after: Duration) -> io::Result<WatcherId>;

    /// Creates a watcher for delivery of `signum` to the process.
    fn signal_watcher(&mut self, signum: c_int) -> io::Result<WatcherId>;

    fn start(&mut self, watcher: WatcherId) -> io::Result<()>;

    /// Stops a watcher. Stopping an inactive or unknown watcher is a no-op.
    fn stop(&mut self, watcher: WatcherId);

    /// Stops and releases a watcher. The id must not be used afterwards.
    fn destroy(&mut self, watcher: WatcherId);

    /// Runs the loop, reporting fired watchers to `dispatch`.
    ///
    /// Returns the number of watchers still active, or a negative value when
    /// the run failed; the failure is then available through
    /// [`take_error`](Reactor::take_error).
    fn run(&mut self, mode: RunMode, dispatch: &mut dyn Dispatch) -> i32;

    /// Takes the failure recorded by the last failed run, if any.
    fn take_error(&mut self) -> Option<io::Error>;

    /// Turns a pending failure into an `Err`.
    fn raise_if_pending(&mut self) -> io::Result<()> {
        match self.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Creates and starts a watcher in one step, destroying it if the start fails.
pub(crate) fn armed<R: Reactor + ?Sized>(
    engine: &mut R,
    create: impl FnOnce(&mut R) -> io::Result<WatcherId>,
) -> io::Result<WatcherId> {
    let watcher = create(&mut *engine)?;

    if let Err(err) = engine.start(watcher) {
        engine.destroy(watcher);
        return Err(err);
    }

    Ok(watcher)
}
