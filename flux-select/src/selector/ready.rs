use crate::interest::Interest;

use std::os::fd::RawFd;

/// Readiness collected during one wait cycle.
///
/// Fired watchers add `(fd, readiness)` pairs; a descriptor firing more than
/// once in the same cycle has its readiness merged. Entries come back out in
/// insertion order, which callers must not rely on.
#[derive(Debug, Default)]
pub(crate) struct Readiness {
    entries: Vec<(RawFd, Interest)>,
}

impl Readiness {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Records readiness for `fd`. Empty readiness is ignored.
    pub(crate) fn add(&mut self, fd: RawFd, ready: Interest) {
        if ready.is_empty() {
            return;
        }

        if let Some(entry) = self.entries.iter_mut().find(|(known, _)| *known == fd) {
            entry.1 |= ready;
        } else {
            self.entries.push((fd, ready));
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Empties the set and returns what it held.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (RawFd, Interest)> + '_ {
        self.entries.drain(..)
    }
}
