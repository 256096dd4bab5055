//! Byte-budgeted in-memory cache for decoded resources.
//!
//! [`BoundedResourceCache`] keeps a bounded working set of decoded payloads
//! keyed by resource identity, evicting in least-recently-used order when
//! the byte budget is exceeded. See the module docs on [`bounded`] for the
//! eviction policy details.

mod bounded;

pub use bounded::{BoundedResourceCache, CacheStats, DEFAULT_ENTRY_OVERHEAD_BYTES};
