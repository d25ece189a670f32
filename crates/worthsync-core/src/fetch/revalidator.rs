use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::cache::{mutex_lock, Snapshot, Store, Subscription};
use crate::error::SyncError;

use super::options::FetchOptions;

const SOURCE: &str = "fetch::revalidator";

/// Future returned by one producer call.
pub type ProducerFuture<T> = BoxFuture<'static, Result<T, SyncError>>;

/// Idempotent data source for one key; called once per network attempt.
pub type Producer<T> = Arc<dyn Fn() -> ProducerFuture<T> + Send + Sync>;

/// Outcome of a revalidation, shared by every caller that joined it.
pub type Revalidation<T> = Shared<BoxFuture<'static, Result<Arc<T>, SyncError>>>;

/// Wrap an async closure as a `Producer`.
pub fn producer<T, F, Fut>(f: F) -> Producer<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

struct Registration<T> {
    producer: Producer<T>,
    options: FetchOptions,
}

impl<T> Clone for Registration<T> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
            options: self.options,
        }
    }
}

struct Inflight<T> {
    sequence: u64,
    started_at: Instant,
    future: Revalidation<T>,
}

struct RevalidatorState<T> {
    registrations: HashMap<String, Registration<T>>,
    inflight: HashMap<String, Inflight<T>>,
}

/// Issues deduplicated, sequence-ordered fetches and writes their results
/// into a `Store`.
///
/// Each issued fetch bumps the key's sequence number and remembers it. A
/// result is only written if that number is still current when it arrives,
/// so a slow response can never overwrite a newer one, and an invalidation
/// in between discards whatever was in flight.
///
/// Fetches are spawned onto the tokio runtime and run to completion even if
/// every caller drops its `Revalidation`.
pub struct Revalidator<T> {
    store: Store<T>,
    state: Arc<Mutex<RevalidatorState<T>>>,
}

impl<T> Clone for Revalidator<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Revalidator<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(store: Store<T>) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(RevalidatorState {
                registrations: HashMap::new(),
                inflight: HashMap::new(),
            })),
        }
    }

    pub fn store(&self) -> &Store<T> {
        &self.store
    }

    /// Subscribe `callback` to `key` and revalidate it on mount.
    ///
    /// The producer is remembered so later invalidations of `key` can refetch.
    pub fn subscribe<F>(
        &self,
        key: &str,
        producer: Producer<T>,
        options: FetchOptions,
        callback: F,
    ) -> Subscription<T>
    where
        F: Fn(&Snapshot<T>) + Send + Sync + 'static,
    {
        let subscription = self.store.subscribe(key, callback);
        let _ = self.revalidate(key, producer, options);
        subscription
    }

    /// Fetch `key` through `producer`, joining a request that is already in
    /// flight when it was issued less than `deduping_interval` ago and has
    /// not been superseded.
    pub fn revalidate(
        &self,
        key: &str,
        producer: Producer<T>,
        options: FetchOptions,
    ) -> Revalidation<T> {
        let mut state = mutex_lock(&self.state, SOURCE, "revalidate");
        state.registrations.insert(
            key.to_string(),
            Registration {
                producer: Arc::clone(&producer),
                options,
            },
        );

        if let Some(inflight) = state.inflight.get(key) {
            let current = self.store.sequence(key) == Some(inflight.sequence);
            if current && inflight.started_at.elapsed() < options.deduping_interval {
                debug!(key = %key, sequence = inflight.sequence, "Joining in-flight fetch");
                return inflight.future.clone();
            }
        }

        let (sequence, notify) = self.store.begin_fetch(key);
        let future = self.fetch(key.to_string(), sequence, producer, options);
        state.inflight.insert(
            key.to_string(),
            Inflight {
                sequence,
                started_at: Instant::now(),
                future: future.clone(),
            },
        );
        drop(state);

        debug!(key = %key, sequence, "Fetch issued");
        notify.send();
        tokio::spawn(future.clone());
        future
    }

    /// Invalidate `key` and refetch it if anyone is subscribed.
    ///
    /// Returns the refetch, or `None` when the entry was only marked stale
    /// (no subscribers, or no producer known for the key).
    pub fn invalidate(&self, key: &str) -> Option<Revalidation<T>> {
        let invalidation = self.store.invalidate(key);
        if !invalidation.has_subscribers {
            return None;
        }

        let registration = {
            let state = mutex_lock(&self.state, SOURCE, "invalidate");
            state.registrations.get(key).cloned()
        };
        let Some(registration) = registration else {
            debug!(key = %key, "No producer registered, not refetching");
            return None;
        };
        Some(self.revalidate(key, registration.producer, registration.options))
    }

    /// Write `data` locally, superseding any fetch still in flight.
    pub fn mutate(&self, key: &str, data: T) -> u64 {
        let sequence = self.store.replace(key, Arc::new(data));
        debug!(key = %key, sequence, "Local mutation applied");
        sequence
    }

    pub fn in_flight(&self, key: &str) -> bool {
        let state = mutex_lock(&self.state, SOURCE, "in_flight");
        state.inflight.contains_key(key)
    }

    fn fetch(
        &self,
        key: String,
        sequence: u64,
        producer: Producer<T>,
        options: FetchOptions,
    ) -> Revalidation<T> {
        let store = self.store.clone();
        let state = Arc::downgrade(&self.state);

        async move {
            let outcome = fetch_with_retries(&store, &key, sequence, &producer, &options).await;

            let applied = store.commit(&key, sequence, outcome.clone());
            if applied {
                match &outcome {
                    Ok(_) => debug!(key = %key, sequence, "Fetch applied"),
                    Err(error) => warn!(key = %key, sequence, error = %error, "Fetch failed"),
                }
            } else {
                debug!(key = %key, sequence, "Discarding superseded fetch result");
            }

            if let Some(state) = state.upgrade() {
                let settled = {
                    let mut state = mutex_lock(&state, SOURCE, "complete");
                    if state
                        .inflight
                        .get(&key)
                        .is_some_and(|inflight| inflight.sequence == sequence)
                    {
                        state.inflight.remove(&key);
                    }
                    // Superseded and no newer fetch will clear the flag
                    if !applied && !state.inflight.contains_key(&key) {
                        store.settle(&key)
                    } else {
                        None
                    }
                };
                if let Some(notify) = settled {
                    notify.send();
                }
            }

            outcome
        }
        .boxed()
        .shared()
    }
}

async fn fetch_with_retries<T>(
    store: &Store<T>,
    key: &str,
    sequence: u64,
    producer: &Producer<T>,
    options: &FetchOptions,
) -> Result<Arc<T>, SyncError> {
    let mut attempt = 0;
    loop {
        let result = match timeout(options.timeout, producer()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(options.timeout)),
        };
        let error = match result {
            Ok(data) => return Ok(Arc::new(data)),
            Err(error) => error,
        };

        if attempt >= options.retry_count || !error.is_retryable() {
            return Err(error);
        }
        if store.sequence(key) != Some(sequence) {
            debug!(key = %key, sequence, "Superseded, not retrying");
            return Err(error);
        }

        attempt += 1;
        let delay = options.backoff_for(attempt);
        warn!(
            key = %key,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Fetch failed, retrying"
        );
        sleep(delay).await;
    }
}
