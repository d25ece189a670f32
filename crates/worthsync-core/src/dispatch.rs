//! Push-message → cache-key invalidation table.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::fetch::Revalidator;
use crate::keys;
use crate::realtime::message::{PushMessage, PRICES_UPDATED};

/// Anything that can invalidate a cache key.
pub trait Invalidate: Send + Sync {
    fn invalidate(&self, key: &str);
}

impl<T> Invalidate for Revalidator<T>
where
    T: Send + Sync + 'static,
{
    fn invalidate(&self, key: &str) {
        // The refetch runs on its own task; nothing to wait for here
        let _ = Revalidator::invalidate(self, key);
    }
}

/// Static mapping from message type to the keys it makes stale.
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    routes: HashMap<String, Vec<String>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The routes the backend emits today.
    pub fn baseline() -> Self {
        Self::new().route(PRICES_UPDATED, [keys::dashboard()])
    }

    /// Add `keys` to the set invalidated by `message_type`.
    pub fn route<I>(mut self, message_type: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let entry = self.routes.entry(message_type.to_string()).or_default();
        for key in keys {
            if !entry.contains(&key) {
                entry.push(key);
            }
        }
        self
    }

    pub fn keys_for(&self, message_type: &str) -> &[String] {
        self.routes
            .get(message_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

pub struct Dispatcher {
    table: DispatchTable,
    target: Arc<dyn Invalidate>,
}

impl Dispatcher {
    pub fn new(table: DispatchTable, target: Arc<dyn Invalidate>) -> Self {
        Self { table, target }
    }

    /// Invalidate every key routed from `message`'s type. Returns how many
    /// keys were invalidated; unknown or missing types are a no-op.
    pub fn dispatch(&self, message: &PushMessage) -> usize {
        let Some(kind) = message.kind.as_deref() else {
            debug!("Push message without type, ignoring");
            return 0;
        };

        let keys = self.table.keys_for(kind);
        if keys.is_empty() {
            debug!(message_type = %kind, "No route for push message");
            return 0;
        }

        for key in keys {
            debug!(message_type = %kind, key = %key, "Invalidating from push");
            self.target.invalidate(key);
        }
        keys.len()
    }
}
