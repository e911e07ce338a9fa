//! Host loop embedding.
//!
//! A selector normally owns its thread while it waits. When the application
//! already runs a different event loop (the host loop), the selector's engine
//! can instead be pumped by that loop: each attached host handle gets a
//! persistent meta watcher, the host loop polls the handle's descriptor, and
//! every time it reports the handle ready the selector performs exactly one
//! non-blocking drain of its engine
//! ([`FluxSelector::host_ready`](crate::FluxSelector::host_ready)).
//!
//! The meta watcher lives in the host loop, not in the selector's engine. The
//! selector only records it ([`MetaWatcher`] is the host fd plus a drain
//! counter); watching [`host_fds`](crate::FluxSelector::host_fds) and calling
//! `host_ready` when one of them fires is the host loop's job.
//!
//! # Precondition
//!
//! Several host handles may be attached at once, each triggering drains of the
//! same engine independently. The engine must therefore accept repeated
//! `RunMode::NoWait` runs from any of these triggers without one of them owning
//! its run loop. The bundled engines do; a custom [`Reactor`](crate::engine::Reactor)
//! has to provide the same guarantee.

use crate::error::{Result, SelectError};

use std::collections::HashMap;
use std::fmt;
use std::os::fd::RawFd;

use tracing::debug;

/// Identity of a host handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(pub usize);

impl HostId {
    /// Identity derived from the address of `handle`.
    ///
    /// Only stable while `handle` is neither moved nor dropped.
    pub fn of<H: ?Sized>(handle: &H) -> Self {
        HostId(handle as *const H as *const () as usize)
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

/// A handle owned by a host loop that can drive the selector.
pub trait HostHandle {
    /// Identity used to attach and detach the handle.
    fn host_id(&self) -> HostId;

    /// The descriptor the host loop watches on behalf of this handle.
    fn as_raw_fd(&self) -> RawFd;
}

/// Persistent watcher standing for one attached host handle.
///
/// It is not an engine watcher: the host loop polls [`fd`](Self::fd) and
/// reports readiness through `host_ready`, which bumps [`drains`](Self::drains).
#[derive(Debug)]
pub struct MetaWatcher {
    fd: RawFd,
    drains: u64,
}

impl MetaWatcher {
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Number of drains this handle has triggered.
    pub fn drains(&self) -> u64 {
        self.drains
    }
}

/// Attached host handles.
#[derive(Debug, Default)]
pub(crate) struct HostBridge {
    entries: HashMap<HostId, MetaWatcher>,
}

impl HostBridge {
    pub(crate) fn attach(&mut self, host: HostId, fd: RawFd) -> Result<()> {
        if self.entries.contains_key(&host) {
            return Err(SelectError::DuplicateBridge(host));
        }

        self.entries.insert(host, MetaWatcher { fd, drains: 0 });
        debug!(%host, fd, "attached host handle");
        Ok(())
    }

    pub(crate) fn detach(&mut self, host: HostId) -> Result<MetaWatcher> {
        let meta = self
            .entries
            .remove(&host)
            .ok_or(SelectError::HostNotAttached(host))?;

        debug!(%host, drains = meta.drains, "detached host handle");
        Ok(meta)
    }

    /// Fires the meta watcher of `host`.
    ///
    /// Returns `false` when `host` is not attached, in which case no drain may
    /// happen.
    pub(crate) fn fire(&mut self, host: HostId) -> bool {
        match self.entries.get_mut(&host) {
            Some(meta) => {
                meta.drains += 1;
                true
            }
            None => false,
        }
    }

    pub(crate) fn get(&self, host: HostId) -> Option<&MetaWatcher> {
        self.entries.get(&host)
    }

    pub(crate) fn fds(&self) -> impl Iterator<Item = (HostId, RawFd)> + '_ {
        self.entries.iter().map(|(host, meta)| (*host, meta.fd))
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
