use crate::interest::Interest;

use std::os::fd::RawFd;

/// The identity of one registered descriptor.
///
/// A key is created by [`register`](super::Selector::register) and handed back
/// with every readiness report for its descriptor. The selector keeps its own
/// copy until the descriptor is unregistered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectorKey<T> {
    /// The registered descriptor.
    pub fd: RawFd,

    /// Events the caller asked to be told about.
    pub interest: Interest,

    /// Caller data attached at registration.
    pub tag: Option<T>,
}

/// One entry of a ready set: the key and the readiness observed for it.
///
/// The readiness never contains events outside of `key.interest`.
pub type ReadyEntry<T> = (SelectorKey<T>, Interest);
