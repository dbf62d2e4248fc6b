//! History files on local disk
//!
//! Each topic's history lives in `<dir>/<encoded key>.json`. Saves go
//! through a temporary sibling file and a rename so a crash mid-write
//! leaves either the old or the new history, never a torn file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::broker::message::Message;
use crate::persistence::{HistoryStore, PersistenceError, encode_key};

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Use `dir` as the history directory, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Where the history of `key` is stored.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }
}

impl HistoryStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<Vec<Message>>, PersistenceError> {
        let raw = match fs::read(self.path_for(key)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    fn save(&self, key: &str, messages: &[Message]) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(messages)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
