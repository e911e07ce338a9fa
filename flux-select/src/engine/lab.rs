//! Deterministic lab engine for testing.
//!
//! [`LabReactor`] implements [`Reactor`] without touching the OS. Descriptors
//! are plain numbers whose readiness is set by the test, time is virtual and
//! only advances while a blocking run has nothing to dispatch, and signals are
//! injected explicitly.
//!
//! # Features
//!
//! - **Level-triggered readiness**: [`set_ready`](LabReactor::set_ready) stays
//!   in effect until [`clear_ready`](LabReactor::clear_ready)
//! - **Scheduled events**: readiness and signals can be injected at a virtual
//!   time in the future
//! - **Failure injection**: the next run or the next watcher creation can be
//!   forced to fail
//! - **Introspection**: live watchers, runs and run modes can be observed
//!
//! A blocking run that has nothing ready and nothing scheduled would wait
//! forever; the lab engine fails it with [`io::ErrorKind::WouldBlock`] instead.
//!
//! # Example
//!
//! ```ignore
//! use flux_select::engine::lab::LabReactor;
//! use flux_select::engine::EngineEvents;
//! use std::time::Duration;
//!
//! let mut lab = LabReactor::new();
//! lab.schedule_ready(Duration::from_millis(10), 5, EngineEvents::POLLIN);
//! lab.schedule_signal(Duration::from_millis(20), libc::SIGINT);
//! ```

use super::{Dispatch, EngineEvents, LoopControl, Reactor, RunMode, WatcherId};
use crate::utils::Slab;

use libc::c_int;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use tracing::trace;

/// What a lab watcher observes.
#[derive(Debug)]
enum Source {
    Fd { fd: RawFd, events: EngineEvents },
    Timer { after: Duration, deadline: Option<Duration> },
    Signal { signum: c_int },
}

#[derive(Debug)]
struct LabWatcher {
    source: Source,
    active: bool,
}

/// Something injected into the lab at a given virtual time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Injection {
    Ready(RawFd, EngineEvents),
    Signal(c_int),
}

/// A scheduled injection.
///
/// Ordered by time, then by sequence number so that injections scheduled for
/// the same instant are applied in the order they were scheduled.
#[derive(Debug, PartialEq, Eq)]
struct Scheduled {
    at: Duration,
    sequence: u64,
    injection: Injection,
}

impl Ord for Scheduled {
    /// Reversed so that a `BinaryHeap<Scheduled>` pops the earliest first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A virtual reactor engine.
#[derive(Debug)]
pub struct LabReactor {
    watchers: Slab<LabWatcher>,

    /// Current readiness per descriptor.
    ready: HashMap<RawFd, EngineEvents>,

    /// Future injections, earliest first.
    scheduled: BinaryHeap<Scheduled>,

    /// Delivered signals not consumed by a watcher yet.
    signals: VecDeque<c_int>,

    /// Virtual clock.
    now: Duration,

    sequence: u64,
    running: bool,
    pending: Option<io::Error>,
    fail_next: Option<io::Error>,
    fail_watcher: Option<io::Error>,
    modes: Vec<RunMode>,
}

impl LabReactor {
    pub fn new() -> Self {
        Self {
            watchers: Slab::new(16),
            ready: HashMap::new(),
            scheduled: BinaryHeap::new(),
            signals: VecDeque::new(),
            now: Duration::ZERO,
            sequence: 0,
            running: false,
            pending: None,
            fail_next: None,
            fail_watcher: None,
            modes: Vec::new(),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Marks `fd` ready for `events`, in addition to its current readiness.
    pub fn set_ready(&mut self, fd: RawFd, events: EngineEvents) {
        *self.ready.entry(fd).or_default() |= events;
    }

    pub fn clear_ready(&mut self, fd: RawFd) {
        self.ready.remove(&fd);
    }

    /// Marks `fd` ready for `events` once `after` of virtual time has passed.
    pub fn schedule_ready(&mut self, after: Duration, fd: RawFd, events: EngineEvents) {
        self.schedule(after, Injection::Ready(fd, events));
    }

    /// Delivers `signum` now.
    pub fn raise(&mut self, signum: c_int) {
        self.signals.push_back(signum);
    }

    /// Delivers `signum` once `after` of virtual time has passed.
    pub fn schedule_signal(&mut self, after: Duration, signum: c_int) {
        self.schedule(after, Injection::Signal(signum));
    }

    /// Makes the next run fail with `err`.
    pub fn fail_next_run(&mut self, err: io::Error) {
        self.fail_next = Some(err);
    }

    /// Makes the next watcher creation fail with `err`.
    pub fn fail_next_watcher(&mut self, err: io::Error) {
        self.fail_watcher = Some(err);
    }

    /// Number of watchers created and not destroyed.
    pub fn live_watchers(&self) -> usize {
        self.watchers.len()
    }

    /// Number of active watchers observing `fd`.
    pub fn active_fd_watchers(&self, fd: RawFd) -> usize {
        self.watchers
            .iter()
            .filter(|(_, w)| w.active && matches!(w.source, Source::Fd { fd: f, .. } if f == fd))
            .count()
    }

    /// Events the active watcher on `fd` is armed with, if there is one.
    pub fn armed_events(&self, fd: RawFd) -> Option<EngineEvents> {
        self.watchers.iter().find_map(|(_, w)| match w.source {
            Source::Fd { fd: f, events } if w.active && f == fd => Some(events),
            _ => None,
        })
    }

    /// Number of runs performed so far.
    pub fn runs(&self) -> usize {
        self.modes.len()
    }

    /// Mode of every run performed so far.
    pub fn run_modes(&self) -> &[RunMode] {
        &self.modes
    }

    /// Signals delivered but not consumed by any watcher.
    pub fn pending_signals(&self) -> usize {
        self.signals.len()
    }

    fn schedule(&mut self, after: Duration, injection: Injection) {
        self.sequence += 1;
        self.scheduled.push(Scheduled {
            at: self.now.saturating_add(after),
            sequence: self.sequence,
            injection,
        });
    }

    fn active_count(&self) -> usize {
        self.watchers.iter().filter(|(_, w)| w.active).count()
    }

    /// Applies every injection due at the current virtual time.
    fn apply_due(&mut self) {
        while let Some(next) = self.scheduled.peek() {
            if next.at > self.now {
                break;
            }

            let Some(next) = self.scheduled.pop() else {
                break;
            };

            match next.injection {
                Injection::Ready(fd, events) => self.set_ready(fd, events),
                Injection::Signal(signum) => self.raise(signum),
            }
        }
    }

    /// Collects the watchers firing at the current virtual time, in id order.
    ///
    /// Timers are one-shot and stop themselves; signal fires consume the
    /// delivered signal.
    fn collect_fired(&mut self) -> Vec<(WatcherId, EngineEvents)> {
        let now = self.now;
        let ready = &self.ready;
        let signals = &mut self.signals;
        let mut fired = Vec::new();

        for (index, watcher) in self.watchers.iter_mut() {
            if !watcher.active {
                continue;
            }

            match watcher.source {
                Source::Fd { fd, events } => {
                    let revents = ready.get(&fd).copied().unwrap_or_default()
                        & (events | EngineEvents::POLLERR);
                    if !revents.is_empty() {
                        fired.push((WatcherId(index), revents));
                    }
                }
                Source::Timer { deadline, .. } => {
                    if deadline.is_some_and(|deadline| deadline <= now) {
                        watcher.active = false;
                        fired.push((WatcherId(index), EngineEvents::POLLIN));
                    }
                }
                Source::Signal { signum } => {
                    if let Some(at) = signals.iter().position(|s| *s == signum) {
                        signals.remove(at);
                        fired.push((WatcherId(index), EngineEvents::POLLIN));
                    }
                }
            }
        }

        fired
    }

    /// Earliest virtual time at which something can happen.
    fn next_wakeup(&self) -> Option<Duration> {
        let timers = self.watchers.iter().filter_map(|(_, w)| match w.source {
            Source::Timer { deadline, .. } if w.active => deadline,
            _ => None,
        });

        timers
            .chain(self.scheduled.peek().map(|s| s.at))
            .min()
    }

    fn run_loop(&mut self, mode: RunMode, dispatch: &mut dyn Dispatch) -> i32 {
        let mut control = LoopControl::new();

        loop {
            self.apply_due();

            for (watcher, revents) in self.collect_fired() {
                trace!(watcher = watcher.index(), ?revents, now = ?self.now, "lab watcher fired");
                dispatch.fire(&mut control, watcher, revents);
            }

            if control.stop_requested() || mode == RunMode::NoWait {
                return self.active_count() as i32;
            }
            if self.active_count() == 0 {
                return 0;
            }

            match self.next_wakeup() {
                Some(at) => self.now = self.now.max(at),
                None => {
                    self.pending = Some(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        "lab reactor would block forever",
                    ));
                    return -1;
                }
            }
        }
    }
}

impl Default for LabReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor for LabReactor {
    fn fd_watcher(&mut self, fd: RawFd, events: EngineEvents) -> io::Result<WatcherId> {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        if let Some(err) = self.fail_watcher.take() {
            return Err(err);
        }

        let index = self.watchers.insert(LabWatcher {
            source: Source::Fd { fd, events },
            active: false,
        });
        Ok(WatcherId(index))
    }

    fn timer_watcher(&mut self, after: Duration) -> io::Result<WatcherId> {
        if let Some(err) = self.fail_watcher.take() {
            return Err(err);
        }

        let index = self.watchers.insert(LabWatcher {
            source: Source::Timer {
                after,
                deadline: None,
            },
            active: false,
        });
        Ok(WatcherId(index))
    }

    fn signal_watcher(&mut self, signum: c_int) -> io::Result<WatcherId> {
        if signum <= 0 {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        if let Some(err) = self.fail_watcher.take() {
            return Err(err);
        }

        let index = self.watchers.insert(LabWatcher {
            source: Source::Signal { signum },
            active: false,
        });
        Ok(WatcherId(index))
    }

    fn start(&mut self, watcher: WatcherId) -> io::Result<()> {
        let now = self.now;
        let entry = self
            .watchers
            .get_mut(watcher.0)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown lab watcher"))?;

        if let Source::Timer { after, deadline } = &mut entry.source {
            *deadline = Some(now.saturating_add(*after));
        }
        entry.active = true;
        Ok(())
    }

    fn stop(&mut self, watcher: WatcherId) {
        if let Some(entry) = self.watchers.get_mut(watcher.0) {
            entry.active = false;
        }
    }

    fn destroy(&mut self, watcher: WatcherId) {
        self.watchers.remove(watcher.0);
    }

    fn run(&mut self, mode: RunMode, dispatch: &mut dyn Dispatch) -> i32 {
        if self.running {
            self.pending = Some(io::Error::other("lab reactor is already running"));
            return -1;
        }

        self.modes.push(mode);

        if let Some(err) = self.fail_next.take() {
            self.pending = Some(err);
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

#[cfg(test)]
mod tests {
    use super::*;

    /// Records fires and stops on the first one.
    #[derive(Default)]
    struct Recorder {
        fired: Vec<(WatcherId, EngineEvents)>,
        stop: bool,
    }

    impl Dispatch for Recorder {
        fn fire(&mut self, control: &mut LoopControl, watcher: WatcherId, revents: EngineEvents) {
            self.fired.push((watcher, revents));
            if self.stop {
                control.request_stop();
            }
        }
    }

    fn stopping() -> Recorder {
        Recorder {
            stop: true,
            ..Recorder::default()
        }
    }

    #[test]
    fn nowait_returns_without_advancing_time() {
        let mut lab = LabReactor::new();
        let timer = lab.timer_watcher(Duration::from_secs(5)).unwrap();
        lab.start(timer).unwrap();

        let mut recorder = Recorder::default();
        assert_eq!(lab.run(RunMode::NoWait, &mut recorder), 1);
        assert!(recorder.fired.is_empty());
        assert_eq!(lab.now(), Duration::ZERO);
    }

    #[test]
    fn block_advances_to_the_timer() {
        let mut lab = LabReactor::new();
        let timer = lab.timer_watcher(Duration::from_millis(250)).unwrap();
        lab.start(timer).unwrap();

        let mut recorder = stopping();
        assert_eq!(lab.run(RunMode::Block, &mut recorder), 0);
        assert_eq!(recorder.fired, vec![(timer, EngineEvents::POLLIN)]);
        assert_eq!(lab.now(), Duration::from_millis(250));
    }

    #[test]
    fn fd_readiness_is_masked_by_the_watcher() {
        let mut lab = LabReactor::new();
        let watcher = lab.fd_watcher(3, EngineEvents::POLLOUT).unwrap();
        lab.start(watcher).unwrap();
        lab.set_ready(3, EngineEvents::POLLIN | EngineEvents::POLLOUT);

        let mut recorder = stopping();
        lab.run(RunMode::Block, &mut recorder);
        assert_eq!(recorder.fired, vec![(watcher, EngineEvents::POLLOUT)]);
    }

    #[test]
    fn signal_is_consumed_by_its_watcher() {
        let mut lab = LabReactor::new();
        let watcher = lab.signal_watcher(libc::SIGINT).unwrap();
        lab.start(watcher).unwrap();
        lab.schedule_signal(Duration::from_millis(5), libc::SIGINT);
        let guard = lab.timer_watcher(Duration::from_secs(1)).unwrap();
        lab.start(guard).unwrap();

        let mut recorder = stopping();
        lab.run(RunMode::Block, &mut recorder);
        assert_eq!(recorder.fired, vec![(watcher, EngineEvents::POLLIN)]);
        assert_eq!(lab.pending_signals(), 0);
        assert_eq!(lab.now(), Duration::from_millis(5));
    }

    #[test]
    fn nothing_to_wait_for_fails_the_run() {
        let mut lab = LabReactor::new();
        let watcher = lab.fd_watcher(3, EngineEvents::POLLIN).unwrap();
        lab.start(watcher).unwrap();

        assert_eq!(lab.run(RunMode::Block, &mut Recorder::default()), -1);
        let err = lab.raise_if_pending().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(lab.raise_if_pending().is_ok());
    }

    #[test]
    fn forced_failure_is_reported_once() {
        let mut lab = LabReactor::new();
        lab.fail_next_run(io::Error::other("boom"));

        assert_eq!(lab.run(RunMode::NoWait, &mut Recorder::default()), -1);
        assert_eq!(lab.take_error().unwrap().to_string(), "boom");
        assert_eq!(lab.run(RunMode::NoWait, &mut Recorder::default()), 0);
    }

    #[test]
    fn stopped_and_destroyed_watchers_do_not_fire() {
        let mut lab = LabReactor::new();
        let a = lab.fd_watcher(1, EngineEvents::POLLIN).unwrap();
        let b = lab.fd_watcher(2, EngineEvents::POLLIN).unwrap();
        lab.start(a).unwrap();
        lab.start(b).unwrap();
        lab.set_ready(1, EngineEvents::POLLIN);
        lab.set_ready(2, EngineEvents::POLLIN);

        lab.stop(a);
        lab.destroy(b);

        let mut recorder = Recorder::default();
        assert_eq!(lab.run(RunMode::NoWait, &mut recorder), 0);
        assert!(recorder.fired.is_empty());
        assert_eq!(lab.live_watchers(), 1);
    }
}
