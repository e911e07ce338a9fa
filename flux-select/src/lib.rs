//! # flux-select
//!
//! **flux-select** runs code written against a synchronous selector contract
//! ("register interests, call `select(timeout)`, get back a ready set") on top of
//! a callback-driven reactor engine that owns its own watchers and its own
//! run/stop control flow.
//!
//! The adapter never polls descriptors itself. Every registration becomes an
//! engine watcher, every `select` becomes one engine run, and the fired watchers
//! are collected into the returned ready set. The same engine can also be pumped
//! by a foreign host loop through the host embedding bridge.
//!
//! The crate offers:
//!
//! - A [`Selector`] trait and its reactor-backed implementation [`FluxSelector`]
//! - Blocking, bounded and non-blocking waits with interrupt-signal cancellation
//! - A **host embedding bridge** so another event loop can drive the engine
//! - A deterministic [`LabReactor`](engine::lab::LabReactor) engine for tests
//! - An `epoll`/`timerfd`/`eventfd` engine on Linux
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use flux_select::engine::epoll::EpollReactor;
//! use flux_select::{Interest, Selector, SelectorBuilder};
//! use std::time::Duration;
//!
//! let engine = EpollReactor::new()?;
//! let mut selector = SelectorBuilder::new().build::<_, &str>(engine);
//!
//! selector.register(socket.as_raw_fd(), Interest::READ, Some("socket"))?;
//!
//! for (key, ready) in selector.select(Some(Duration::from_secs(1)))? {
//!     println!("{:?} is ready for {:?}", key.tag, ready);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: Reactor engine primitives and the bundled engines
//! - [`bridge`]: Host loop embedding
//! - [`interest`]: Interest masks and their engine translation

mod error;
mod selector;
mod utils;

pub mod bridge;
pub mod engine;
pub mod interest;

pub use bridge::{HostHandle, HostId};
pub use error::{Result, SelectError};
pub use interest::Interest;
pub use selector::builder::{InterruptPolicy, SelectorBuilder};
pub use selector::key::{ReadyEntry, SelectorKey};
pub use selector::{FluxSelector, Selector};
