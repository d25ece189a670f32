//! In-memory stale-while-revalidate cache.
//!
//! The `Store` maps canonical keys to entries holding the last good value,
//! the most recent error and a validation flag. Readers get an immutable
//! `Snapshot` instantly; subscribers are notified synchronously on every
//! change. Network access never starts here, see `crate::fetch`.

mod entry;
mod lock;
pub mod store;

pub use entry::{Callback, Snapshot};
pub use store::{Invalidation, Store, Subscription};

pub(crate) use lock::mutex_lock;
