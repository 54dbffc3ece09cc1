//! # dux-cache
//!
//! The per-path cache (C2 + C3): an entry acts simultaneously as memo,
//! in-progress computation handle, and pub/sub progress channel; the
//! registry maps absolute paths to entries and arbitrates which caller
//! owns the computation.

pub mod entry;
pub mod registry;

pub use entry::{CacheEntry, Subscription};
pub use registry::Registry;
