//! Bounded topic history
//!
//! `History` is the retained tail of a topic: strictly ascending ids, at most
//! `capacity` entries, evicted oldest-first. It knows nothing about
//! subscribers or persistence; the topic actor drives it and persists the
//! result.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::broker::message::Message;

#[derive(Debug, Clone)]
pub struct History {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Rebuild a history from stored messages.
    ///
    /// Anything that breaks the ascending-id invariant is dropped, and only
    /// the newest `capacity` entries are kept.
    pub fn from_stored(stored: Vec<Message>, capacity: usize) -> Self {
        let mut history = Self::new(capacity);
        for message in stored {
            if history.last_id().is_some_and(|last| message.id <= last) {
                continue;
            }
            history.push(message);
        }
        history
    }

    /// Append a message, evicting from the front once over capacity.
    /// Callers must pass an id larger than any retained one.
    pub fn push(&mut self, message: Message) {
        self.messages.push_back(message);
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }

    /// Messages strictly newer than `cursor`, oldest first.
    pub fn after(&self, cursor: u64) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.id > cursor)
            .cloned()
            .collect()
    }

    /// Collapse everything up to and including `id` into one message.
    ///
    /// Retained messages newer than `id` survive after the summary. Returns
    /// `false` without touching anything when `id` is older than the oldest
    /// retained message, or when `id` is 0 and could never be replayed.
    pub fn compact(&mut self, id: u64, data: Bytes) -> bool {
        if id == 0 || self.first_id().is_some_and(|first| id < first) {
            return false;
        }

        let newer: Vec<Message> = self.messages.drain(..).filter(|m| m.id > id).collect();
        self.messages.push_back(Message::new(id, data));
        self.messages.extend(newer);
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
        true
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.messages.len())
    }

    pub fn first_id(&self) -> Option<u64> {
        self.messages.front().map(|m| m.id)
    }

    pub fn last_id(&self) -> Option<u64> {
        self.messages.back().map(|m| m.id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }
}
