use super::FluxSelector;
use crate::engine::Reactor;

use libc::c_int;

/// What happens to readiness gathered before an interrupt cancels a wait.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InterruptPolicy {
    /// Drop it. The interrupted call reports nothing but the cancellation.
    #[default]
    Discard,

    /// Keep it aside; [`FluxSelector::take_interrupted`] hands it out.
    Preserve,
}

/// Builder for configuring and creating a selector.
///
/// # Examples
///
/// ```rust,ignore
/// let selector = SelectorBuilder::new()
///     .interrupt_signal(libc::SIGTERM)
///     .interrupt_policy(InterruptPolicy::Preserve)
///     .build::<_, u64>(engine);
/// ```
#[derive(Clone, Debug)]
pub struct SelectorBuilder {
    /// Signal that cancels a wait in progress.
    interrupt_signal: c_int,

    /// Fate of readiness collected before the interrupt.
    interrupt_policy: InterruptPolicy,

    /// Expected number of registered descriptors.
    capacity: usize,
}

impl SelectorBuilder {
    /// Creates a new `SelectorBuilder` with default configuration.
    ///
    /// By default waits are cancelled by `SIGINT`, readiness gathered before
    /// the interrupt is discarded and room is reserved for 64 descriptors.
    pub fn new() -> Self {
        Self {
            interrupt_signal: libc::SIGINT,
            interrupt_policy: InterruptPolicy::Discard,
            capacity: 64,
        }
    }

    /// Sets the signal that cancels a wait.
    ///
    /// # Panics
    ///
    /// Panics if `signum` is not a positive signal number.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let builder = SelectorBuilder::new()
    ///     .interrupt_signal(libc::SIGTERM);
    /// ```
    pub fn interrupt_signal(mut self, signum: c_int) -> Self {
        assert!(signum > 0, "interrupt_signal must be a positive signal number");

        self.interrupt_signal = signum;
        self
    }

    /// Sets what happens to readiness gathered before an interrupt.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let builder = SelectorBuilder::new()
    ///     .interrupt_policy(InterruptPolicy::Preserve);
    /// ```
    pub fn interrupt_policy(mut self, policy: InterruptPolicy) -> Self {
        self.interrupt_policy = policy;
        self
    }

    /// Reserves room for `n` registered descriptors.
    pub fn capacity(mut self, n: usize) -> Self {
        self.capacity = n;
        self
    }

    /// Builds a selector driving `engine`.
    ///
    /// The selector owns the engine from here on; watchers are only created
    /// once descriptors are registered.
    pub fn build<R: Reactor, T>(self, engine: R) -> FluxSelector<R, T> {
        FluxSelector::with_config(
            engine,
            self.interrupt_signal,
            self.interrupt_policy,
            self.capacity,
        )
    }
}

impl Default for SelectorBuilder {
    /// Creates a default `SelectorBuilder`.
    ///
    /// Equivalent to [`SelectorBuilder::new`].
    fn default() -> Self {
        Self::new()
    }
}
