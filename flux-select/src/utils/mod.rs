//! Storage utilities shared by the bundled engines.
//!
//! [`Slab`] hands out small reusable indices, which the engines use directly
//! as [`WatcherId`](crate::engine::WatcherId) values.

mod slab;

pub(crate) use slab::Slab;
