use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

/// Message type broadcast after the backend refreshes market prices.
pub const PRICES_UPDATED: &str = "prices_updated";

/// A server push frame: `{"type": "...", ...}`.
///
/// `kind` is optional so that frames without a type still parse; they are
/// dropped by the dispatcher rather than treated as malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PushMessage {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            extra: Map::new(),
        }
    }

    /// Parse a UTF-8 text frame. Anything that is not a JSON object is an
    /// error.
    pub fn parse(text: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(text)?)
    }
}
