use crate::bridge::HostId;

use libc::c_int;
use std::io;
use std::os::fd::RawFd;

/// Errors surfaced by the selector and the host bridge.
///
/// Every error is reported synchronously by the call that detected it and
/// nothing is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    /// `register` for a descriptor that already holds a key.
    #[error("file descriptor {0} is already registered")]
    AlreadyRegistered(RawFd),

    /// `unregister` / `modify` for a descriptor without a key.
    #[error("file descriptor {0} is not registered")]
    NotRegistered(RawFd),

    /// `register` with an empty interest mask.
    #[error("file descriptor {0} registered without any interest")]
    InvalidInterest(RawFd),

    /// `attach_host` for an identity that is already bridged.
    #[error("host handle {0} is already attached")]
    DuplicateBridge(HostId),

    /// `detach_host` for an identity that is not bridged.
    #[error("host handle {0} is not attached")]
    HostNotAttached(HostId),

    /// The engine failed, either while running or while creating a watcher.
    #[error("reactor engine failed: {0}")]
    Engine(#[from] io::Error),

    /// The wait was cancelled by the interrupt signal.
    #[error("select interrupted by signal {0}")]
    Interrupted(c_int),
}

impl SelectError {
    /// Returns `true` for the cancellation exit of a wait.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SelectError::Interrupted(_))
    }
}

pub type Result<T> = std::result::Result<T, SelectError>;
