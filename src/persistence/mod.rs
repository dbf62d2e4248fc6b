//! The `persistence` module stores the bounded history of history-enabled
//! topics so late subscribers can replay missed messages and so a topic
//! survives being torn down and recreated.
//!
//! Stores address a topic by its key. The key is turned into a
//! filesystem-safe, reversible name with [`encode_key`]; both backends use
//! that name so switching backends never changes how a topic is addressed.
//!
//! Two backends exist:
//! - [`FileStore`]: one JSON file per topic under a directory
//! - [`SledStore`]: one entry per topic in an embedded `sled` tree

pub mod file_store;
pub mod sled_store;

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

use crate::broker::message::Message;
use crate::config::{StorageBackend, StorageSettings};

pub use file_store::FileStore;
pub use sled_store::SledStore;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("history i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("history encoding failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("sled failed: {0}")]
    Sled(#[from] sled::Error),
}

/// Durable key -> ordered message list.
///
/// Implementations are called from blocking threads, one topic actor per key,
/// so a given key never sees concurrent writers.
pub trait HistoryStore: Send + Sync + Debug {
    /// Load the stored history. A topic that was never saved is `Ok(None)`.
    fn load(&self, key: &str) -> Result<Option<Vec<Message>>, PersistenceError>;

    /// Replace the stored history with `messages`.
    fn save(&self, key: &str, messages: &[Message]) -> Result<(), PersistenceError>;

    /// Remove the stored history. Removing a missing entry succeeds.
    fn delete(&self, key: &str) -> Result<(), PersistenceError>;
}

pub type SharedStore = Arc<dyn HistoryStore>;

/// Reversible, collision-free, filesystem-safe name for a topic key.
pub fn encode_key(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

/// Open the backend selected in configuration.
pub fn open_store(settings: &StorageSettings) -> Result<SharedStore, PersistenceError> {
    let path = Path::new(&settings.path);
    let store: SharedStore = match settings.backend {
        StorageBackend::File => Arc::new(FileStore::new(path)?),
        StorageBackend::Sled => Arc::new(SledStore::open(path)?),
    };
    Ok(store)
}
