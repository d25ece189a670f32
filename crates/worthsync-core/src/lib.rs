//! worthsync core - client-side data sync for the net-worth dashboard.
//!
//! A keyed stale-while-revalidate cache (`cache`), a revalidator that
//! deduplicates and orders fetches (`fetch`), and a realtime push channel
//! (`realtime`) whose messages invalidate cache keys through `dispatch`.
//! `resources` ties the REST client (`api`) to canonical keys (`keys`).

pub mod api;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod keys;
pub mod realtime;
pub mod resources;

pub use api::ApiClient;
pub use cache::{Snapshot, Store, Subscription};
pub use config::SyncConfig;
pub use dispatch::{DispatchTable, Dispatcher, Invalidate};
pub use error::SyncError;
pub use fetch::{FetchOptions, Revalidator};
pub use realtime::{ChannelHandle, ChannelState, RealtimeChannel, WsConnector};
pub use resources::Resources;
