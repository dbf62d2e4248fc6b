use tokio::sync::mpsc;

use crate::broker::message::Message;
use crate::broker::topic::{SubscriberId, TopicHandle};

/// A live subscription to one topic.
///
/// Replayed history comes first, in ascending id order, followed by live
/// messages. `recv` returns `None` once the actor has closed the handle:
/// after an unsubscribe, or when the subscriber was dropped for being too
/// slow.
///
/// Dropping a `Subscription` unsubscribes it. Use [`Subscription::unsubscribe`]
/// to also collect what was still buffered.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Message>,
    topic: TopicHandle,
    unsubscribed: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriberId,
        receiver: mpsc::Receiver<Message>,
        topic: TopicHandle,
    ) -> Self {
        Self {
            id,
            receiver,
            topic,
            unsubscribed: false,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic_key(&self) -> &str {
        self.topic.key()
    }

    pub fn history_enabled(&self) -> bool {
        self.topic.history_enabled()
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Next message if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    /// Unsubscribe and drain until the actor closes the handle, so a publish
    /// already in flight toward it never waits on a reader that left.
    /// Returns the messages that were still buffered.
    pub async fn unsubscribe(mut self) -> Vec<Message> {
        self.unsubscribed = true;
        self.topic.unsubscribe(self.id);

        let mut drained = Vec::new();
        while let Some(message) = self.receiver.recv().await {
            drained.push(message);
        }
        drained
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.unsubscribed {
            self.topic.unsubscribe(self.id);
        }
    }
}
