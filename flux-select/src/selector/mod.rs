//! The selector contract and its reactor-backed implementation.
//!
//! [`Selector`] is the capability set every multiplexer backend offers:
//! register interest, unregister, and wait for a ready set. [`FluxSelector`]
//! implements it on top of any [`Reactor`] engine:
//! - each registration is one engine fd watcher,
//! - each wait is one engine run, cancelled by the interrupt signal and
//!   optionally bounded by an engine timer,
//! - fired watchers are gathered into the returned ready set.

pub(crate) mod builder;
pub(crate) mod key;

mod ready;
mod session;
mod watchers;

use self::builder::{InterruptPolicy, SelectorBuilder};
use self::key::{ReadyEntry, SelectorKey};
use self::ready::Readiness;
use self::session::{SessionGuard, WaitSession};
use self::watchers::Watchers;
use crate::bridge::{HostBridge, HostHandle, HostId, MetaWatcher};
use crate::engine::{Reactor, RunMode};
use crate::error::{Result, SelectError};
use crate::interest::Interest;

use libc::c_int;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use tracing::{debug, warn};

/// A synchronous readiness multiplexer.
pub trait Selector {
    /// Caller data carried by every key.
    type Tag: Clone;

    /// Starts watching `fd` for `interest`.
    ///
    /// Fails with [`SelectError::AlreadyRegistered`] if `fd` already has a key.
    fn register(
        &mut self,
        fd: RawFd,
        interest: Interest,
        tag: Option<Self::Tag>,
    ) -> Result<SelectorKey<Self::Tag>>;

    /// Stops watching `fd` and returns its key.
    ///
    /// Fails with [`SelectError::NotRegistered`] if `fd` has no key.
    fn unregister(&mut self, fd: RawFd) -> Result<SelectorKey<Self::Tag>>;

    /// Waits for registered descriptors to become ready.
    ///
    /// - `None` blocks until at least one descriptor is ready,
    /// - `Some(d)` with `d > 0` blocks for at most `d`,
    /// - `Some(Duration::ZERO)` reports what is ready now without blocking.
    fn select(&mut self, timeout: Option<Duration>) -> Result<Vec<ReadyEntry<Self::Tag>>>;

    /// Replaces the registration of `fd`.
    ///
    /// Fails with [`SelectError::NotRegistered`] if `fd` has no key. An empty
    /// `interest` is rejected before the current registration is touched.
    fn modify(
        &mut self,
        fd: RawFd,
        interest: Interest,
        tag: Option<Self::Tag>,
    ) -> Result<SelectorKey<Self::Tag>> {
        if interest.is_empty() {
            return Err(SelectError::InvalidInterest(fd));
        }

        self.unregister(fd)?;
        self.register(fd, interest, tag)
    }
}

/// A [`Selector`] running on a callback-driven reactor engine.
///
/// The engine is owned by the selector and driven only from the thread calling
/// its methods. Dropping the selector releases every watcher it created.
pub struct FluxSelector<R: Reactor, T = ()> {
    /// The engine all watchers live in.
    engine: R,

    /// One live fd watcher per registered descriptor.
    watchers: Watchers<T>,

    /// Readiness of the wait in progress.
    ready: Readiness,

    /// Host handles pumping this selector.
    bridge: HostBridge,

    /// Signal cancelling a wait.
    interrupt_signal: c_int,

    interrupt_policy: InterruptPolicy,

    /// Readiness kept from interrupted waits under [`InterruptPolicy::Preserve`].
    preserved: Vec<ReadyEntry<T>>,
}

impl<R: Reactor, T> FluxSelector<R, T> {
    /// Creates a selector with the default configuration.
    pub fn new(engine: R) -> Self {
        SelectorBuilder::new().build(engine)
    }

    pub(crate) fn with_config(
        engine: R,
        interrupt_signal: c_int,
        interrupt_policy: InterruptPolicy,
        capacity: usize,
    ) -> Self {
        Self {
            engine,
            watchers: Watchers::new(capacity),
            ready: Readiness::new(capacity),
            bridge: HostBridge::default(),
            interrupt_signal,
            interrupt_policy,
            preserved: Vec::new(),
        }
    }

    /// The key registered for `fd`.
    pub fn key(&self, fd: RawFd) -> Option<&SelectorKey<T>> {
        self.watchers.key(fd)
    }

    /// Every registered key, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &SelectorKey<T>> {
        self.watchers.keys()
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.len() == 0
    }

    pub fn engine(&self) -> &R {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut R {
        &mut self.engine
    }

    /// Signal that cancels a wait.
    pub fn interrupt_signal(&self) -> c_int {
        self.interrupt_signal
    }

    /// Takes the readiness kept from interrupted waits.
    ///
    /// Always empty under [`InterruptPolicy::Discard`].
    pub fn take_interrupted(&mut self) -> Vec<ReadyEntry<T>> {
        std::mem::take(&mut self.preserved)
    }

    /// Attaches a host handle so its loop can pump this selector.
    ///
    /// Fails with [`SelectError::DuplicateBridge`] if the handle is attached.
    pub fn attach_host<H: HostHandle + ?Sized>(&mut self, host: &H) -> Result<()> {
        self.bridge.attach(host.host_id(), host.as_raw_fd())
    }

    /// Detaches a host handle. No drain happens for it afterwards.
    ///
    /// Fails with [`SelectError::HostNotAttached`] if the handle is unknown.
    pub fn detach_host(&mut self, host: HostId) -> Result<MetaWatcher> {
        self.bridge.detach(host)
    }

    /// The meta watcher of an attached host handle.
    pub fn host(&self, host: HostId) -> Option<&MetaWatcher> {
        self.bridge.get(host)
    }

    /// Descriptors the host loop has to watch, one per attached handle.
    pub fn host_fds(&self) -> impl Iterator<Item = (HostId, RawFd)> + '_ {
        self.bridge.fds()
    }

    /// Unregisters every descriptor and detaches every host handle.
    pub fn close(&mut self) {
        for fd in self.watchers.fds() {
            // Every fd comes from the table, so this cannot miss.
            let _ = self.watchers.unregister(&mut self.engine, fd);
        }

        self.bridge.clear();
        self.ready.clear();
        self.preserved.clear();
    }
}

impl<R: Reactor, T: Clone> FluxSelector<R, T> {
    /// Waits with a timeout in seconds.
    ///
    /// Zero, negative and NaN timeouts poll without blocking.
    pub fn select_secs(&mut self, timeout: f64) -> Result<Vec<ReadyEntry<T>>> {
        let timeout = if timeout > 0.0 {
            Duration::try_from_secs_f64(timeout).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        };

        self.wait(Some(timeout))
    }

    /// Host loop report that `host` is ready.
    ///
    /// Performs one non-blocking drain and forwards its ready set. Returns
    /// `None`, without touching the engine, when `host` is not attached.
    pub fn host_ready(&mut self, host: HostId) -> Result<Option<Vec<ReadyEntry<T>>>> {
        if !self.bridge.fire(host) {
            debug!(%host, "readiness reported for a detached host handle");
            return Ok(None);
        }

        self.wait(Some(Duration::ZERO)).map(Some)
    }

    /// One wait cycle.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<ReadyEntry<T>>> {
        self.ready.clear();

        let (mode, timer) = match timeout {
            None => (RunMode::Block, None),
            Some(after) if after.is_zero() => (RunMode::NoWait, None),
            Some(after) => (RunMode::Block, Some(after)),
        };

        let (count, interrupted) = {
            let mut guard = SessionGuard::arm(&mut self.engine, self.interrupt_signal, timer)?;
            let mut session =
                WaitSession::new(&self.watchers, &mut self.ready, guard.cancel(), guard.timer());

            let count = guard.run(mode, &mut session);
            (count, session.interrupted())
        };

        // An interrupt wins over both a normal return and an engine failure.
        if interrupted {
            if count < 0 {
                if let Some(err) = self.engine.take_error() {
                    warn!(%err, "reactor failure superseded by interrupt");
                }
            }

            return Err(self.interrupt());
        }

        if count < 0 {
            self.ready.clear();

            let err = match self.engine.raise_if_pending() {
                Err(err) => err,
                Ok(()) => io::Error::other("reactor run failed without reporting an error"),
            };
            warn!(%err, "reactor run failed");
            return Err(SelectError::Engine(err));
        }

        Ok(self.collect())
    }

    fn interrupt(&mut self) -> SelectError {
        match self.interrupt_policy {
            InterruptPolicy::Discard => {
                debug!(discarded = self.ready.len(), "wait interrupted");
                self.ready.clear();
            }
            InterruptPolicy::Preserve => {
                let entries = self.collect();
                debug!(preserved = entries.len(), "wait interrupted");
                self.preserved.extend(entries);
            }
        }

        SelectError::Interrupted(self.interrupt_signal)
    }

    /// Drains the readiness set into keyed entries.
    fn collect(&mut self) -> Vec<ReadyEntry<T>> {
        let watchers = &self.watchers;

        self.ready
            .drain()
            .filter_map(|(fd, ready)| watchers.key(fd).map(|key| (key.clone(), ready)))
            .collect()
    }
}

impl<R: Reactor, T: Clone> Selector for FluxSelector<R, T> {
    type Tag = T;

    fn register(&mut self, fd: RawFd, interest: Interest, tag: Option<T>) -> Result<SelectorKey<T>> {
        self.watchers.register(&mut self.engine, fd, interest, tag)
    }

    fn unregister(&mut self, fd: RawFd) -> Result<SelectorKey<T>> {
        self.watchers.unregister(&mut self.engine, fd)
    }

    /// Replaces the registration of `fd`, keeping the current one on failure.
    fn modify(&mut self, fd: RawFd, interest: Interest, tag: Option<T>) -> Result<SelectorKey<T>> {
        self.watchers.modify(&mut self.engine, fd, interest, tag)
    }

    fn select(&mut self, timeout: Option<Duration>) -> Result<Vec<ReadyEntry<T>>> {
        self.wait(timeout)
    }
}

impl<R: Reactor, T> Drop for FluxSelector<R, T> {
    fn drop(&mut self) {
        self.close();
    }
}
