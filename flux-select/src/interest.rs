//! Interest masks and their translation to engine events.
//!
//! Callers speak in [`Interest`] (`READ` / `WRITE`), engines speak in
//! [`EngineEvents`] (`POLLIN` / `POLLOUT` / `POLLERR`). The two functions in this
//! module are the only place where one vocabulary is turned into the other.
//! Bits without a counterpart are dropped.

use crate::engine::EngineEvents;

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Readiness a caller is interested in, or readiness reported back.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest(u8);

impl Interest {
    /// No interest.
    pub const NONE: Interest = Interest(0);

    /// Interest in readable events.
    pub const READ: Interest = Interest(0b01);

    /// Interest in writable events.
    pub const WRITE: Interest = Interest(0b10);

    /// Interest in both readable and writable events.
    pub const BOTH: Interest = Interest(0b11);

    /// Builds an interest from raw bits, dropping unknown ones.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Interest(bits & Self::BOTH.0)
    }

    /// Raw bit representation.
    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_readable(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Self) -> Self {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Interest {
    type Output = Interest;

    fn bitand(self, rhs: Self) -> Self {
        Interest(self.0 & rhs.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_readable(), self.is_writable()) {
            (true, true) => f.write_str("READ | WRITE"),
            (true, false) => f.write_str("READ"),
            (false, true) => f.write_str("WRITE"),
            (false, false) => f.write_str("NONE"),
        }
    }
}

/// Translates caller interest into the engine's event mask.
pub fn to_engine(interest: Interest) -> EngineEvents {
    let mut events = EngineEvents::empty();

    if interest.is_readable() {
        events |= EngineEvents::POLLIN;
    }
    if interest.is_writable() {
        events |= EngineEvents::POLLOUT;
    }

    events
}

/// Translates an engine event mask back into caller readiness.
///
/// `POLLERR` and any bit the engine may add later have no caller-side meaning
/// and are dropped.
pub fn from_engine(events: EngineEvents) -> Interest {
    let mut interest = Interest::NONE;

    if events.contains(EngineEvents::POLLIN) {
        interest |= Interest::READ;
    }
    if events.contains(EngineEvents::POLLOUT) {
        interest |= Interest::WRITE;
    }

    interest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_and_write_map_to_pollin_and_pollout() {
        assert_eq!(to_engine(Interest::READ), EngineEvents::POLLIN);
        assert_eq!(to_engine(Interest::WRITE), EngineEvents::POLLOUT);
        assert_eq!(
            to_engine(Interest::BOTH),
            EngineEvents::POLLIN | EngineEvents::POLLOUT
        );
        assert!(to_engine(Interest::NONE).is_empty());
    }

    #[test]
    fn error_and_unknown_engine_bits_are_dropped() {
        let events = EngineEvents::POLLOUT | EngineEvents::POLLERR | EngineEvents::from_bits(0x80);
        assert_eq!(from_engine(events), Interest::WRITE);
        assert_eq!(from_engine(EngineEvents::POLLERR), Interest::NONE);
    }

    #[test]
    fn unknown_interest_bits_are_truncated() {
        assert_eq!(Interest::from_bits_truncate(0xff), Interest::BOTH);
        assert_eq!(Interest::from_bits_truncate(0b100), Interest::NONE);
    }

    #[test]
    fn every_interest_survives_the_engine_and_back() {
        for interest in [Interest::NONE, Interest::READ, Interest::WRITE, Interest::BOTH] {
            assert_eq!(from_engine(to_engine(interest)), interest);
        }
    }
}
