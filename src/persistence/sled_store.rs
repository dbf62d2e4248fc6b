//! Persistence layer backed by `sled`
//!
//! All topic histories share one `history` tree. The entry key is the
//! encoded topic key and the value is the JSON-serialized message list, so a
//! save replaces the whole retained window in a single insert.

use sled::{Db, Tree};

use crate::broker::message::Message;
use crate::persistence::{HistoryStore, PersistenceError, encode_key};

const HISTORY_TREE: &str = "history";

#[derive(Clone)]
pub struct SledStore {
    db: Db,
    tree: Tree,
}

impl SledStore {
    /// Open or create a sled database at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, PersistenceError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(HISTORY_TREE)?;
        Ok(Self { db, tree })
    }
}

impl HistoryStore for SledStore {
    fn load(&self, key: &str) -> Result<Option<Vec<Message>>, PersistenceError> {
        match self.tree.get(encode_key(key).as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn save(&self, key: &str, messages: &[Message]) -> Result<(), PersistenceError> {
        let serialized = serde_json::to_vec(messages)?;
        self.tree.insert(encode_key(key).as_bytes(), serialized)?;
        self.tree.flush()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        self.tree.remove(encode_key(key).as_bytes())?;
        self.tree.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("recovered", &self.db.was_recovered())
            .field("tree", &HISTORY_TREE)
            .finish()
    }
}
