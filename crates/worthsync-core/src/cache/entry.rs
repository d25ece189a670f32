use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::SyncError;

/// Subscriber callback, invoked synchronously with the entry's latest state.
pub type Callback<T> = Arc<dyn Fn(&Snapshot<T>) + Send + Sync>;

/// Mutable per-key state. Only the store touches this directly.
pub(crate) struct Entry<T> {
    pub data: Option<Arc<T>>,
    pub error: Option<SyncError>,
    pub is_validating: bool,
    pub is_stale: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub sequence: u64,
    pub subscribers: BTreeMap<u64, Callback<T>>,
}

impl<T> Default for Entry<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_validating: false,
            is_stale: false,
            updated_at: None,
            sequence: 0,
            subscribers: BTreeMap::new(),
        }
    }
}

impl<T> Entry<T> {
    pub fn snapshot(&self, key: &str) -> Snapshot<T> {
        Snapshot {
            key: key.to_string(),
            data: self.data.clone(),
            error: self.error.clone(),
            is_validating: self.is_validating,
            is_stale: self.is_stale,
            updated_at: self.updated_at,
            sequence: self.sequence,
        }
    }
}

/// Immutable view of a cache entry handed to readers and subscribers.
///
/// `data` is shared, never mutated: a newer value always arrives as a new
/// snapshot with a new `Arc`.
pub struct Snapshot<T> {
    pub key: String,
    pub data: Option<Arc<T>>,
    pub error: Option<SyncError>,
    pub is_validating: bool,
    pub is_stale: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub sequence: u64,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            data: self.data.clone(),
            error: self.error.clone(),
            is_validating: self.is_validating,
            is_stale: self.is_stale,
            updated_at: self.updated_at,
            sequence: self.sequence,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("key", &self.key)
            .field("data", &self.data)
            .field("error", &self.error)
            .field("is_validating", &self.is_validating)
            .field("is_stale", &self.is_stale)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl<T> Snapshot<T> {
    /// The last fetch failed after exhausting its retries. `data` may still
    /// hold an older good value.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Nothing to show yet and a fetch is under way.
    pub fn is_loading(&self) -> bool {
        self.data.is_none() && self.is_validating
    }

    pub fn age_minutes(&self) -> Option<i64> {
        self.updated_at
            .map(|at| (Utc::now() - at).num_minutes())
    }

    pub fn age_display(&self) -> String {
        let Some(minutes) = self.age_minutes() else {
            return "never".to_string();
        };
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            let remaining_mins = minutes % 60;
            if remaining_mins >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            let remaining_hours = (minutes % 1440) / 60;
            if remaining_hours >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn snapshot_aged(minutes: i64) -> Snapshot<u32> {
        let mut entry = Entry::default();
        entry.data = Some(Arc::new(1));
        entry.updated_at = Some(Utc::now() - Duration::minutes(minutes));
        entry.snapshot("k")
    }

    #[test]
    fn test_age_display() {
        assert_eq!(Entry::<u32>::default().snapshot("k").age_display(), "never");
        assert_eq!(snapshot_aged(0).age_display(), "just now");
        assert_eq!(snapshot_aged(-5).age_display(), "just now");
        assert_eq!(snapshot_aged(5).age_display(), "5m ago");
        assert_eq!(snapshot_aged(95).age_display(), "2h ago");
        assert_eq!(snapshot_aged(65).age_display(), "1h ago");
        assert_eq!(snapshot_aged(3 * 1440).age_display(), "3d ago");
    }

    #[test]
    fn test_loading_and_error_flags() {
        let mut entry: Entry<u32> = Entry::default();
        entry.is_validating = true;
        assert!(entry.snapshot("k").is_loading());

        entry.data = Some(Arc::new(7));
        entry.error = Some(SyncError::Network("down".into()));
        let snap = entry.snapshot("k");
        assert!(!snap.is_loading());
        assert!(snap.is_error());
        assert_eq!(snap.data.as_deref(), Some(&7));
    }
}
