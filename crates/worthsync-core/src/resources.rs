//! Typed bindings from backend resources to cache keys.
//!
//! `use_x` subscribes a callback and revalidates on mount; `revalidate_x`
//! pushes the key through the same invalidation path a server push would.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::api::ApiClient;
use crate::cache::{Snapshot, Store, Subscription};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::fetch::{producer, FetchOptions, Producer, Revalidation, Revalidator};
use crate::keys;

/// History changes at most once per price refresh.
const HISTORY_DEDUPING_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Risk metrics are expensive to compute server-side.
const RISK_METRICS_DEDUPING_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Clone)]
pub struct Resources {
    api: ApiClient,
    revalidator: Revalidator<Value>,
    defaults: FetchOptions,
}

impl Resources {
    pub fn new(api: ApiClient, revalidator: Revalidator<Value>, defaults: FetchOptions) -> Self {
        Self {
            api,
            revalidator,
            defaults,
        }
    }

    pub fn from_config(config: &SyncConfig, store: Store<Value>) -> Result<Self, SyncError> {
        Ok(Self::new(
            ApiClient::new(config)?,
            Revalidator::new(store),
            config.fetch_options(),
        ))
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn revalidator(&self) -> &Revalidator<Value> {
        &self.revalidator
    }

    pub fn history_options(&self) -> FetchOptions {
        self.defaults
            .with_deduping_interval(HISTORY_DEDUPING_INTERVAL)
    }

    pub fn risk_metrics_options(&self) -> FetchOptions {
        self.defaults
            .with_deduping_interval(RISK_METRICS_DEDUPING_INTERVAL)
    }

    /// Every resource is a plain GET of its own key.
    fn get(&self, key: &str) -> Producer<Value> {
        let api = self.api.clone();
        let key = key.to_string();
        producer(move || {
            let api = api.clone();
            let key = key.clone();
            async move { api.get_json(&key).await }
        })
    }

    fn bind<F>(&self, key: String, options: FetchOptions, callback: F) -> Subscription<Value>
    where
        F: Fn(&Snapshot<Value>) + Send + Sync + 'static,
    {
        let producer = self.get(&key);
        self.revalidator.subscribe(&key, producer, options, callback)
    }

    pub fn use_dashboard<F>(&self, callback: F) -> Subscription<Value>
    where
        F: Fn(&Snapshot<Value>) + Send + Sync + 'static,
    {
        self.bind(keys::dashboard(), self.defaults, callback)
    }

    pub fn use_history<F>(&self, range: &str, callback: F) -> Subscription<Value>
    where
        F: Fn(&Snapshot<Value>) + Send + Sync + 'static,
    {
        self.bind(keys::history(range), self.history_options(), callback)
    }

    pub fn use_budgets<F>(&self, callback: F) -> Subscription<Value>
    where
        F: Fn(&Snapshot<Value>) + Send + Sync + 'static,
    {
        self.bind(keys::budgets(), self.defaults, callback)
    }

    pub fn use_income<F>(&self, callback: F) -> Subscription<Value>
    where
        F: Fn(&Snapshot<Value>) + Send + Sync + 'static,
    {
        self.bind(keys::income(), self.defaults, callback)
    }

    pub fn use_setting<F>(&self, name: &str, callback: F) -> Subscription<Value>
    where
        F: Fn(&Snapshot<Value>) + Send + Sync + 'static,
    {
        self.bind(keys::setting(name), self.defaults, callback)
    }

    pub fn use_risk_metrics<F>(&self, callback: F) -> Subscription<Value>
    where
        F: Fn(&Snapshot<Value>) + Send + Sync + 'static,
    {
        self.bind(keys::risk_metrics(), self.risk_metrics_options(), callback)
    }

    pub fn use_alerts<F>(&self, callback: F) -> Subscription<Value>
    where
        F: Fn(&Snapshot<Value>) + Send + Sync + 'static,
    {
        self.bind(keys::alerts(), self.defaults, callback)
    }

    pub fn revalidate_dashboard(&self) -> Option<Revalidation<Value>> {
        self.revalidator.invalidate(&keys::dashboard())
    }

    pub fn revalidate_history(&self, range: &str) -> Option<Revalidation<Value>> {
        self.revalidator.invalidate(&keys::history(range))
    }

    pub fn revalidate_budgets(&self) -> Option<Revalidation<Value>> {
        self.revalidator.invalidate(&keys::budgets())
    }

    pub fn revalidate_income(&self) -> Option<Revalidation<Value>> {
        self.revalidator.invalidate(&keys::income())
    }

    pub fn revalidate_setting(&self, name: &str) -> Option<Revalidation<Value>> {
        self.revalidator.invalidate(&keys::setting(name))
    }

    pub fn revalidate_risk_metrics(&self) -> Option<Revalidation<Value>> {
        self.revalidator.invalidate(&keys::risk_metrics())
    }

    pub fn revalidate_alerts(&self) -> Option<Revalidation<Value>> {
        self.revalidator.invalidate(&keys::alerts())
    }

    /// Save a setting, then revalidate its key so subscribers see the
    /// server's view of it.
    pub async fn update_setting(&self, name: &str, value: &Value) -> Result<Value, SyncError> {
        let response = self.api.update_setting(name, value).await?;
        if self.revalidate_setting(name).is_none() {
            debug!(setting = %name, "Setting saved with no subscribers");
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Resources against a closed local port, failing fast with no retries.
    fn offline() -> Resources {
        let config = SyncConfig {
            origin: "http://127.0.0.1:9".into(),
            retry_count: 0,
            ..SyncConfig::default()
        };
        Resources::from_config(&config, Store::new()).unwrap()
    }

    #[test]
    fn test_per_resource_windows() {
        let resources = offline();
        assert_eq!(
            resources.history_options().deduping_interval,
            Duration::from_secs(300)
        );
        assert_eq!(
            resources.risk_metrics_options().deduping_interval,
            Duration::from_secs(600)
        );
        assert_eq!(resources.history_options().retry_count, 0);
    }

    #[test]
    fn test_revalidate_without_subscribers_only_marks_stale() {
        let resources = offline();
        assert!(resources.revalidate_budgets().is_none());

        let snapshot = resources.revalidator().store().get(&keys::budgets()).unwrap();
        assert!(snapshot.is_stale);
        assert!(!snapshot.is_validating);
    }

    #[tokio::test]
    async fn test_failed_fetch_reaches_subscriber_as_error() {
        let resources = offline();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = resources.use_dashboard(move |snapshot| {
            sink.lock().unwrap().push(snapshot.clone());
        });

        let result = resources.revalidate_dashboard().expect("subscribed").await;
        assert!(matches!(result, Err(SyncError::Network(_))));

        let seen = seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert!(last.is_error());
        assert!(!last.is_validating);
        assert!(last.data.is_none());
    }

    #[tokio::test]
    async fn test_use_setting_keys_by_name() {
        let resources = offline();
        let _sub = resources.use_setting("display currency", |_| {});
        let store = resources.revalidator().store();
        assert_eq!(store.subscriber_count("/api/settings/display%20currency"), 1);
    }
}
