use super::key::SelectorKey;
use crate::engine::{self, Reactor, WatcherId};
use crate::error::{Result, SelectError};
use crate::interest::{self, Interest};

use std::collections::HashMap;
use std::os::fd::RawFd;

use tracing::{debug, warn};

/// A registered descriptor and the engine watcher bound to it.
struct Registration<T> {
    key: SelectorKey<T>,
    watcher: WatcherId,
}

/// Owns one live engine watcher per registered descriptor.
///
/// Both maps always describe the same set of registrations: a watcher id is
/// in `by_watcher` exactly when its descriptor is in `by_fd`.
pub(crate) struct Watchers<T> {
    by_fd: HashMap<RawFd, Registration<T>>,
    by_watcher: HashMap<WatcherId, RawFd>,
}

impl<T: Clone> Watchers<T> {
    /// Creates and starts a watcher for `fd` armed with `interest`.
    pub(crate) fn register<R: Reactor>(
        &mut self,
        engine: &mut R,
        fd: RawFd,
        interest: Interest,
        tag: Option<T>,
    ) -> Result<SelectorKey<T>> {
        if self.by_fd.contains_key(&fd) {
            return Err(SelectError::AlreadyRegistered(fd));
        }
        if interest.is_empty() {
            return Err(SelectError::InvalidInterest(fd));
        }

        let events = interest::to_engine(interest);
        let watcher = engine::armed(engine, |engine| engine.fd_watcher(fd, events))?;

        let key = SelectorKey { fd, interest, tag };
        self.by_watcher.insert(watcher, fd);
        self.by_fd.insert(
            fd,
            Registration {
                key: key.clone(),
                watcher,
            },
        );

        debug!(fd, ?interest, watcher = watcher.index(), "registered descriptor");
        Ok(key)
    }

    /// Replaces the registration of `fd`.
    ///
    /// The current watcher is only stopped while its replacement is armed; if
    /// arming fails it is restarted and the registration is left as it was.
    pub(crate) fn modify<R: Reactor>(
        &mut self,
        engine: &mut R,
        fd: RawFd,
        interest: Interest,
        tag: Option<T>,
    ) -> Result<SelectorKey<T>> {
        let current = match self.by_fd.get(&fd) {
            Some(registration) => registration.watcher,
            None => return Err(SelectError::NotRegistered(fd)),
        };
        if interest.is_empty() {
            return Err(SelectError::InvalidInterest(fd));
        }

        engine.stop(current);

        let events = interest::to_engine(interest);
        let watcher = match engine::armed(engine, |engine| engine.fd_watcher(fd, events)) {
            Ok(watcher) => watcher,
            Err(err) => {
                if let Err(restart) = engine.start(current) {
                    warn!(fd, %restart, "could not restore registration after failed modify");
                    let _ = self.unregister(engine, fd);
                }
                return Err(err.into());
            }
        };

        engine.destroy(current);
        self.by_watcher.remove(&current);
        self.by_watcher.insert(watcher, fd);

        let key = SelectorKey { fd, interest, tag };
        self.by_fd.insert(
            fd,
            Registration {
                key: key.clone(),
                watcher,
            },
        );

        debug!(fd, ?interest, watcher = watcher.index(), "modified descriptor");
        Ok(key)
    }
}

impl<T> Watchers<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            by_fd: HashMap::with_capacity(capacity),
            by_watcher: HashMap::with_capacity(capacity),
        }
    }

    /// Stops and releases the watcher of `fd`.
    ///
    /// An unknown `fd` leaves both maps untouched.
    pub(crate) fn unregister<R: Reactor>(
        &mut self,
        engine: &mut R,
        fd: RawFd,
    ) -> Result<SelectorKey<T>> {
        let registration = self
            .by_fd
            .remove(&fd)
            .ok_or(SelectError::NotRegistered(fd))?;

        self.by_watcher.remove(&registration.watcher);
        engine.stop(registration.watcher);
        engine.destroy(registration.watcher);

        debug!(fd, watcher = registration.watcher.index(), "unregistered descriptor");
        Ok(registration.key)
    }

    /// The key whose watcher is `watcher`.
    pub(crate) fn lookup(&self, watcher: WatcherId) -> Option<&SelectorKey<T>> {
        let fd = self.by_watcher.get(&watcher)?;
        self.by_fd.get(fd).map(|registration| &registration.key)
    }

    pub(crate) fn key(&self, fd: RawFd) -> Option<&SelectorKey<T>> {
        self.by_fd.get(&fd).map(|registration| &registration.key)
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &SelectorKey<T>> {
        self.by_fd.values().map(|registration| &registration.key)
    }

    pub(crate) fn fds(&self) -> Vec<RawFd> {
        self.by_fd.keys().copied().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_fd.len()
    }
}
