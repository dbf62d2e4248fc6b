//! Broker engine
//!
//! The broker is the topic registry: a map from topic key to the handle of
//! the one actor serving that key. It is responsible for:
//! - creating an actor the first time a key is referenced, exactly once
//! - deriving per-topic settings (history on/off) from the key
//! - the history preconditions checked before a command is sent
//! - retrying a command when the actor it reached was tearing down
//!
//! Concurrency and usage notes:
//! - The map lock is held only to look up, insert or remove a handle, never
//!   across an await. Topic state lives inside the actors.
//! - Only an actor removes itself from the map (see `topic.rs`); the broker
//!   never decides that a topic is idle.
//! - `Broker` is cheap to clone and must be used inside a tokio runtime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::broker::topic::{Published, TopicActor, TopicHandle, TopicOptions};
use crate::client::Subscription;
use crate::config::BrokerSettings;
use crate::persistence::SharedStore;
use crate::utils::error::{BrokerError, BrokerResult};

pub(crate) type TopicMap = Arc<Mutex<HashMap<String, TopicHandle>>>;

#[derive(Debug, Clone)]
pub struct Broker {
    topics: TopicMap,
    settings: Arc<BrokerSettings>,
    store: SharedStore,
    next_generation: Arc<AtomicU64>,
}

impl Broker {
    pub fn new(settings: BrokerSettings, store: SharedStore) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            settings: Arc::new(settings),
            store,
            next_generation: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Whether topics under `key` keep and persist history.
    pub fn is_history_key(&self, key: &str) -> bool {
        key.starts_with(&self.settings.history_prefix)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn topic_count(&self) -> usize {
        self.lock().len()
    }

    /// Return the actor for `key`, starting one if none is registered.
    pub fn get_or_create(&self, key: &str) -> TopicHandle {
        let mut topics = self.lock();
        if let Some(handle) = topics.get(key) {
            return handle.clone();
        }

        let history_enabled = self.is_history_key(key);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = TopicHandle::new(key, history_enabled, generation, tx);

        let options = TopicOptions {
            max_history_size: self.settings.max_history_size,
            subscriber_buffer: self.settings.subscriber_buffer,
            send_timeout: Duration::from_millis(self.settings.send_timeout_ms),
        };
        let actor = TopicActor::new(&handle, options, self.store.clone(), self.topics.clone());
        tokio::spawn(actor.run(rx));

        topics.insert(key.to_string(), handle.clone());
        debug!(topic = %key, history_enabled, generation, "topic created");
        handle
    }

    /// Subscribe to `key`, replaying retained messages newer than `cursor`
    /// (everything retained when `None`).
    ///
    /// A cursor on a topic without history is rejected.
    pub async fn subscribe(
        &self,
        key: &str,
        password: &str,
        cursor: Option<u64>,
    ) -> BrokerResult<Subscription> {
        if cursor.is_some() && !self.is_history_key(key) {
            return Err(BrokerError::NotHistoryEnabled(key.to_string()));
        }
        self.subscribe_after(key, password, cursor.unwrap_or(0)).await
    }

    /// Subscribe to live messages only, skipping any retained history.
    pub async fn subscribe_live(&self, key: &str, password: &str) -> BrokerResult<Subscription> {
        self.subscribe_after(key, password, u64::MAX).await
    }

    async fn subscribe_after(
        &self,
        key: &str,
        password: &str,
        after: u64,
    ) -> BrokerResult<Subscription> {
        loop {
            let topic = self.get_or_create(key);
            match topic.subscribe(after, password).await {
                Err(BrokerError::TopicClosed(_)) => {
                    debug!(topic = %key, "subscribe raced teardown, retrying");
                    tokio::task::yield_now().await;
                }
                result => return result,
            }
        }
    }

    pub async fn publish(&self, key: &str, password: &str, data: Bytes) -> BrokerResult<Published> {
        self.produce(key, password, |topic| {
            let data = data.clone();
            async move { topic.publish(data).await }
        })
        .await
    }

    /// Compact history of `key` up to `id`. `Ok(false)` for a stale request.
    ///
    /// Ids start at 1, so an `id` of 0 is treated like a missing one.
    pub async fn compact(
        &self,
        key: &str,
        password: &str,
        id: Option<u64>,
        data: Bytes,
    ) -> BrokerResult<bool> {
        self.require_history(key)?;
        let id = id.filter(|&id| id > 0).ok_or(BrokerError::MissingCursor)?;
        self.produce(key, password, |topic| {
            let data = data.clone();
            async move { topic.compact(id, data).await }
        })
        .await
    }

    pub async fn clear_history(&self, key: &str, password: &str) -> BrokerResult<()> {
        self.require_history(key)?;
        self.produce(key, password, |topic| async move { topic.clear_history().await })
            .await
    }

    fn require_history(&self, key: &str) -> BrokerResult<()> {
        if self.is_history_key(key) {
            Ok(())
        } else {
            Err(BrokerError::NotHistoryEnabled(key.to_string()))
        }
    }

    /// Run a producer command, retrying against a fresh actor when the one
    /// found was tearing down. Producers never carry a password, and an
    /// actor they start has none until its first subscriber arrives.
    async fn produce<T, F, Fut>(&self, key: &str, password: &str, op: F) -> BrokerResult<T>
    where
        F: Fn(TopicHandle) -> Fut,
        Fut: Future<Output = BrokerResult<T>>,
    {
        if !password.is_empty() {
            return Err(BrokerError::Forbidden);
        }
        loop {
            let topic = self.get_or_create(key);
            match op(topic).await {
                Err(BrokerError::TopicClosed(_)) => {
                    debug!(topic = %key, "command raced teardown, retrying");
                    tokio::task::yield_now().await;
                }
                result => return result,
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TopicHandle>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
