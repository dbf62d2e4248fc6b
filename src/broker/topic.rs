//! Topic actor
//!
//! Every live topic is one tokio task running [`TopicActor::run`]. The task
//! owns the topic's history, last id and subscriber senders; nothing else
//! touches them. Callers talk to it through a cloneable [`TopicHandle`] that
//! pushes [`Command`]s onto an unbounded queue and awaits a oneshot reply.
//!
//! Each command is applied to completion (persistence included) before the
//! next one is read. The topic password is actor state too: the first
//! subscriber of an empty topic fixes it, later subscribers must present the
//! same one, and it is forgotten when the last subscriber leaves.
//!
//! After every command the actor checks whether it still
//! has subscribers; when it has none and its queue is empty it removes
//! itself from the broker map and stops. Commands that slip into the queue
//! during that window are dropped unanswered, which callers observe as
//! [`BrokerError::TopicClosed`] and retry against a fresh actor.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::engine::TopicMap;
use crate::broker::history::History;
use crate::broker::message::Message;
use crate::client::Subscription;
use crate::persistence::SharedStore;
use crate::utils::error::{BrokerError, BrokerResult};

pub type SubscriberId = Uuid;

/// Outcome of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    pub id: u64,
    /// Free history slots; `None` when the topic keeps no history.
    pub remaining: Option<usize>,
}

pub(crate) struct Subscribed {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<Message>,
}

pub(crate) enum Command {
    Subscribe {
        after: u64,
        password: String,
        reply: oneshot::Sender<BrokerResult<Subscribed>>,
    },
    Unsubscribe {
        id: SubscriberId,
    },
    Publish {
        data: Bytes,
        reply: oneshot::Sender<Published>,
    },
    Compact {
        id: u64,
        data: Bytes,
        reply: oneshot::Sender<bool>,
    },
    ClearHistory {
        reply: oneshot::Sender<()>,
    },
}

/// Per-topic knobs copied from broker settings at creation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TopicOptions {
    pub max_history_size: usize,
    pub subscriber_buffer: usize,
    pub send_timeout: Duration,
}

/// Cheap, cloneable address of a running topic actor.
#[derive(Debug, Clone)]
pub struct TopicHandle {
    key: Arc<str>,
    history_enabled: bool,
    generation: u64,
    commands: mpsc::UnboundedSender<Command>,
}

impl TopicHandle {
    pub(crate) fn new(
        key: &str,
        history_enabled: bool,
        generation: u64,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            key: Arc::from(key),
            history_enabled,
            generation,
            commands,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn history_enabled(&self) -> bool {
        self.history_enabled
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Register a subscriber. Retained messages with `id > after` are already
    /// queued on the returned subscription, ahead of any live message.
    ///
    /// `password` becomes the topic's password if nobody is subscribed yet;
    /// otherwise it must equal the current one or the call is `Forbidden`.
    pub async fn subscribe(&self, after: u64, password: &str) -> BrokerResult<Subscription> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe {
            after,
            password: password.to_string(),
            reply,
        })?;
        let subscribed = rx.await.map_err(|_| self.closed())??;
        Ok(Subscription::new(
            subscribed.id,
            subscribed.receiver,
            self.clone(),
        ))
    }

    /// Fire-and-forget removal of a subscriber. Unknown ids are ignored by
    /// the actor, and a stopped actor has no subscribers left to remove.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let _ = self.commands.send(Command::Unsubscribe { id });
    }

    pub async fn publish(&self, data: Bytes) -> BrokerResult<Published> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Publish { data, reply })?;
        rx.await.map_err(|_| self.closed())
    }

    /// Replace history up to `id` with `data`. `Ok(false)` means the request
    /// was older than the retained window and nothing changed.
    pub async fn compact(&self, id: u64, data: Bytes) -> BrokerResult<bool> {
        if !self.history_enabled {
            return Err(BrokerError::NotHistoryEnabled(self.key.to_string()));
        }
        let (reply, rx) = oneshot::channel();
        self.send(Command::Compact { id, data, reply })?;
        rx.await.map_err(|_| self.closed())
    }

    pub async fn clear_history(&self) -> BrokerResult<()> {
        if !self.history_enabled {
            return Err(BrokerError::NotHistoryEnabled(self.key.to_string()));
        }
        let (reply, rx) = oneshot::channel();
        self.send(Command::ClearHistory { reply })?;
        rx.await.map_err(|_| self.closed())
    }

    fn send(&self, command: Command) -> BrokerResult<()> {
        self.commands.send(command).map_err(|_| self.closed())
    }

    fn closed(&self) -> BrokerError {
        BrokerError::TopicClosed(self.key.to_string())
    }
}

pub(crate) struct TopicActor {
    key: Arc<str>,
    generation: u64,
    history_enabled: bool,
    history: History,
    last_id: u64,
    /// Set while the topic has subscribers, `None` otherwise.
    password: Option<String>,
    subscribers: HashMap<SubscriberId, mpsc::Sender<Message>>,
    options: TopicOptions,
    store: SharedStore,
    topics: TopicMap,
}

impl TopicActor {
    pub(crate) fn new(
        handle: &TopicHandle,
        options: TopicOptions,
        store: SharedStore,
        topics: TopicMap,
    ) -> Self {
        Self {
            key: handle.key.clone(),
            generation: handle.generation,
            history_enabled: handle.history_enabled,
            history: History::new(options.max_history_size),
            last_id: 0,
            password: None,
            subscribers: HashMap::new(),
            options,
            store,
            topics,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        if self.history_enabled {
            self.load_history().await;
        }

        while let Some(command) = commands.recv().await {
            self.handle(command).await;

            if self.subscribers.is_empty() && self.retire(&commands) {
                break;
            }
        }

        commands.close();
        let mut dropped = 0usize;
        while commands.try_recv().is_ok() {
            dropped += 1;
        }
        debug!(topic = %self.key, dropped, "topic stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Subscribe {
                after,
                password,
                reply,
            } => self.subscribe(after, password, reply),
            Command::Unsubscribe { id } => {
                if self.subscribers.remove(&id).is_some() {
                    debug!(topic = %self.key, subscriber = %id, "unsubscribed");
                }
                self.forget_password_if_idle();
            }
            Command::Publish { data, reply } => {
                let published = self.publish(data).await;
                let _ = reply.send(published);
            }
            Command::Compact { id, data, reply } => {
                let applied = self.compact(id, data).await;
                let _ = reply.send(applied);
            }
            Command::ClearHistory { reply } => {
                self.clear_history().await;
                let _ = reply.send(());
            }
        }
    }

    fn subscribe(
        &mut self,
        after: u64,
        password: String,
        reply: oneshot::Sender<BrokerResult<Subscribed>>,
    ) {
        self.forget_password_if_idle();
        if self
            .password
            .as_ref()
            .is_some_and(|current| *current != password)
        {
            debug!(topic = %self.key, "subscriber rejected, wrong password");
            let _ = reply.send(Err(BrokerError::Forbidden));
            return;
        }

        let replay = self.history.after(after);
        // Sized so the whole replay fits without waiting on the reader.
        let (sender, receiver) = mpsc::channel(self.options.subscriber_buffer + replay.len());
        for message in replay {
            let _ = sender.try_send(message);
        }

        let id = Uuid::new_v4();
        if reply.send(Ok(Subscribed { id, receiver })).is_ok() {
            self.password.get_or_insert(password);
            self.subscribers.insert(id, sender);
            debug!(topic = %self.key, subscriber = %id, after, "subscribed");
        }
    }

    async fn publish(&mut self, data: Bytes) -> Published {
        self.last_id += 1;
        let message = Message::new(self.last_id, data);

        let remaining = if self.history_enabled {
            self.history.push(message.clone());
            self.persist().await;
            Some(self.history.remaining())
        } else {
            None
        };

        self.fan_out(&message).await;

        Published {
            id: message.id,
            remaining,
        }
    }

    async fn compact(&mut self, id: u64, data: Bytes) -> bool {
        if !self.history_enabled {
            return false;
        }
        if !self.history.compact(id, data) {
            debug!(topic = %self.key, id, oldest = ?self.history.first_id(), "stale compaction ignored");
            return false;
        }
        self.last_id = self.last_id.max(id);
        self.persist().await;
        true
    }

    async fn clear_history(&mut self) {
        if !self.history_enabled {
            return;
        }
        self.history.clear();
        self.last_id = 0;

        let store = self.store.clone();
        let key = self.key.clone();
        match tokio::task::spawn_blocking(move || store.delete(&key)).await {
            Ok(Ok(())) => debug!(topic = %self.key, "history cleared"),
            Ok(Err(e)) => warn!(topic = %self.key, error = %e, "failed to delete history"),
            Err(e) => warn!(topic = %self.key, error = %e, "history delete task failed"),
        }
    }

    /// Deliver to every live subscriber. A subscriber whose buffer stays full
    /// past the send timeout, or whose receiver is gone, is dropped.
    async fn fan_out(&mut self, message: &Message) {
        let mut gone = Vec::new();
        for (id, sender) in &self.subscribers {
            match sender
                .send_timeout(message.clone(), self.options.send_timeout)
                .await
            {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!(topic = %self.key, subscriber = %id, "slow subscriber disconnected");
                    gone.push(*id);
                }
                Err(SendTimeoutError::Closed(_)) => gone.push(*id),
            }
        }
        for id in gone {
            self.subscribers.remove(&id);
        }
        self.forget_password_if_idle();
    }

    fn forget_password_if_idle(&mut self) {
        if self.subscribers.is_empty() {
            self.password = None;
        }
    }

    async fn load_history(&mut self) {
        let store = self.store.clone();
        let key = self.key.clone();
        let stored = match tokio::task::spawn_blocking(move || store.load(&key)).await {
            Ok(Ok(stored)) => stored.unwrap_or_default(),
            Ok(Err(e)) => {
                warn!(topic = %self.key, error = %e, "unreadable history, starting empty");
                Vec::new()
            }
            Err(e) => {
                warn!(topic = %self.key, error = %e, "history load task failed");
                Vec::new()
            }
        };

        self.history = History::from_stored(stored, self.options.max_history_size);
        self.last_id = self.history.last_id().unwrap_or(0);
        if !self.history.is_empty() {
            info!(topic = %self.key, messages = self.history.len(), last_id = self.last_id, "history loaded");
        }
    }

    async fn persist(&self) {
        let store = self.store.clone();
        let key = self.key.clone();
        let messages = self.history.to_vec();
        match tokio::task::spawn_blocking(move || store.save(&key, &messages)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(topic = %self.key, error = %e, "failed to save history"),
            Err(e) => warn!(topic = %self.key, error = %e, "history save task failed"),
        }
    }

    /// Leave the broker map if no command is waiting. Runs under the map
    /// lock so no caller can look this actor up between the check and the
    /// removal.
    fn retire(&self, commands: &mpsc::UnboundedReceiver<Command>) -> bool {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        if !commands.is_empty() {
            return false;
        }
        if topics
            .get(&*self.key)
            .is_some_and(|handle| handle.generation() == self.generation)
        {
            topics.remove(&*self.key);
        }
        debug!(topic = %self.key, "topic idle, removed");
        true
    }
}
