//! Request parameters and JSON acknowledgements of the HTTP protocol.

use serde::{Deserialize, Serialize};

/// Query string of any request. `?sse` selects the event stream; `id` is a
/// resume cursor for reads and the compaction point for `PUT`.
#[derive(Debug, Default, Deserialize)]
pub struct RequestParams {
    pub sse: Option<String>,
    pub id: Option<String>,
}

impl RequestParams {
    pub fn wants_sse(&self) -> bool {
        self.sse.is_some()
    }

    pub fn cursor(&self) -> Option<u64> {
        parse_cursor(self.id.as_deref())
    }
}

/// Lenient id parsing: anything that is not a plain unsigned integer counts
/// as no cursor at all.
pub fn parse_cursor(raw: Option<&str>) -> Option<u64> {
    raw?.trim().parse().ok()
}

/// Split `key:password` at the first colon. No colon means no password.
pub fn split_password(combined: &str) -> (&str, &str) {
    combined.split_once(':').unwrap_or((combined, ""))
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishAck {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompactAck {
    pub compacted: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClearAck {
    pub cleared: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
