//! REST client for the net-worth backend.
//!
//! Every resource is a plain `GET` of its cache key resolved against the
//! configured origin. Non-success statuses are mapped to
//! `SyncError::Status` with a truncated body.

pub mod client;

pub use client::ApiClient;
