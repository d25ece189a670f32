//! Server push channel.
//!
//! The backend broadcasts small JSON frames (`{"type": "prices_updated"}`)
//! over a WebSocket at `/api/ws`. The channel keeps one connection open,
//! hands every parsed frame to the `Dispatcher`, and reconnects on a fixed
//! delay after any loss. It only ever affects how quickly the cache notices
//! changes, never what the cache holds.

pub mod channel;
pub mod machine;
pub mod message;
pub mod transport;

pub use channel::{ChannelHandle, RealtimeChannel};
pub use machine::{ChannelEvent, ChannelMachine, ChannelState, Command, DEFAULT_RECONNECT_DELAY_MS};
pub use message::{PushMessage, PRICES_UPDATED};
pub use transport::{push_url, Connector, Socket, TransportEvent, WsConnector, PUSH_PATH};
