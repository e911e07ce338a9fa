//! State scoping one call to `select`.
//!
//! A wait owns two transient watchers:
//! - the cancellation watcher for the interrupt signal, always armed,
//! - the timeout timer, armed only for bounded waits.
//!
//! [`SessionGuard`] arms both and tears them down when dropped, so no exit path
//! of `select` (success, engine failure, interrupt) leaves either one live.
//! [`WaitSession`] is the [`Dispatch`] the engine reports fires to during the
//! run; it holds the interrupted flag and writes into the readiness set.

use super::ready::Readiness;
use super::watchers::Watchers;
use crate::engine::{self, Dispatch, EngineEvents, LoopControl, Reactor, RunMode, WatcherId};
use crate::interest;

use libc::c_int;
use std::io;
use std::time::Duration;

use tracing::trace;

/// Transient watchers of one wait, released on drop.
pub(crate) struct SessionGuard<'e, R: Reactor> {
    engine: &'e mut R,
    cancel: WatcherId,
    timer: Option<WatcherId>,
}

impl<'e, R: Reactor> SessionGuard<'e, R> {
    /// Arms the cancellation watcher for `signum` and, when `timeout` is set,
    /// a one-shot timer.
    pub(crate) fn arm(
        engine: &'e mut R,
        signum: c_int,
        timeout: Option<Duration>,
    ) -> io::Result<Self> {
        let cancel = engine::armed(&mut *engine, |engine| engine.signal_watcher(signum))?;

        let mut guard = Self {
            engine,
            cancel,
            timer: None,
        };

        if let Some(after) = timeout {
            // On failure the guard is dropped here and disarms `cancel`.
            let timer = engine::armed(&mut *guard.engine, |engine| engine.timer_watcher(after))?;
            guard.timer = Some(timer);
        }

        Ok(guard)
    }

    pub(crate) fn cancel(&self) -> WatcherId {
        self.cancel
    }

    pub(crate) fn timer(&self) -> Option<WatcherId> {
        self.timer
    }

    pub(crate) fn run(&mut self, mode: RunMode, session: &mut dyn Dispatch) -> i32 {
        self.engine.run(mode, session)
    }
}

impl<R: Reactor> Drop for SessionGuard<'_, R> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            self.engine.stop(timer);
            self.engine.destroy(timer);
        }

        self.engine.stop(self.cancel);
        self.engine.destroy(self.cancel);
    }
}

/// Receives the fires of one engine run.
pub(crate) struct WaitSession<'s, T> {
    watchers: &'s Watchers<T>,
    ready: &'s mut Readiness,
    cancel: WatcherId,
    timer: Option<WatcherId>,
    interrupted: bool,
}

impl<'s, T> WaitSession<'s, T> {
    pub(crate) fn new(
        watchers: &'s Watchers<T>,
        ready: &'s mut Readiness,
        cancel: WatcherId,
        timer: Option<WatcherId>,
    ) -> Self {
        Self {
            watchers,
            ready,
            cancel,
            timer,
            interrupted: false,
        }
    }

    pub(crate) fn interrupted(&self) -> bool {
        self.interrupted
    }
}

impl<T> Dispatch for WaitSession<'_, T> {
    fn fire(&mut self, control: &mut LoopControl, watcher: WatcherId, revents: EngineEvents) {
        if watcher == self.cancel {
            trace!("interrupt signal during wait");
            self.interrupted = true;
            control.request_stop();
            return;
        }

        if Some(watcher) == self.timer {
            trace!("wait timed out");
            control.request_stop();
            return;
        }

        let Some(key) = self.watchers.lookup(watcher) else {
            trace!(watcher = watcher.index(), "fire for a watcher the selector does not own");
            return;
        };

        // Readiness outside of the registered interest is never reported.
        let ready = interest::from_engine(revents) & key.interest;
        if ready.is_empty() {
            trace!(fd = key.fd, ?revents, "fire without requested readiness");
            return;
        }

        trace!(fd = key.fd, ?ready, "descriptor ready");
        self.ready.add(key.fd, ready);
        control.request_stop();
    }
}
