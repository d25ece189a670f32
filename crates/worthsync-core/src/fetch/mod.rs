//! Deduplicated, sequence-ordered revalidation.
//!
//! `Revalidator` owns the network side of the cache: it decides whether a
//! request is needed, runs the producer with a per-attempt timeout and
//! exponential retry backoff, and writes the outcome into the `Store` only
//! if no newer fetch or invalidation superseded it.

pub mod options;
pub mod revalidator;

pub use options::FetchOptions;
pub use revalidator::{producer, Producer, ProducerFuture, Revalidation, Revalidator};
