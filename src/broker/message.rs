//! Message definitions for the broker
//!
//! `Message` is the unit stored in topic history, persisted by the history
//! stores and fanned out to subscribers.
//!
//! Notes on fields:
//! - `id`: assigned by the topic actor, starts at 1 and grows by one per
//!   publish; compaction may inject an id chosen by the producer
//! - `data`: opaque payload bytes, never inspected by the broker. Serialized
//!   as base64 so persisted history stays valid JSON for arbitrary bytes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    #[serde(with = "base64_data")]
    pub data: Bytes,
}

impl Message {
    pub fn new(id: u64, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }
}

mod base64_data {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
