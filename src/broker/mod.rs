//! The broker: topic registry, per-topic actors and bounded history.
//!
//! - `engine`: [`Broker`], the map from topic key to actor handle
//! - `topic`: the actor that serializes every mutation of one topic
//! - `history`: the bounded, compactable message window
//! - `message`: the stored and delivered [`Message`]

pub mod engine;
pub mod history;
pub mod message;
pub mod topic;

pub use engine::Broker;
pub use message::Message;
pub use topic::{Published, TopicHandle};
