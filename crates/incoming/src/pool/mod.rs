//! Bounded object recycling.
//!
//! A [`Pool`] keeps up to `capacity` reset instances around so hot paths (connection read buffers
//! in this crate) reuse allocations instead of creating new ones. Acquire never fails and never
//! waits: an empty or contended pool simply allocates, and a full or contended pool lets released
//! instances drop.

mod object_pool;

pub use object_pool::Origin;
pub use object_pool::Pool;
pub use object_pool::Poolable;
pub use object_pool::Pooled;
