//! The `error` module defines the error types surfaced by broker operations.
//!
//! Persistence failures have their own type in `crate::persistence`; they are
//! wrapped here only where they reach a caller. Inside a topic actor they are
//! logged and swallowed.

use thiserror::Error;

use crate::persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Compact, clear or a resume cursor was requested on a topic whose key
    /// is outside the history namespace.
    #[error("topic '{0}' does not keep history")]
    NotHistoryEnabled(String),

    /// The topic password does not match, or a producer supplied one.
    #[error("forbidden")]
    Forbidden,

    /// A compaction request arrived without a usable id.
    #[error("compaction needs an id of at least 1")]
    MissingCursor,

    /// The actor stopped before accepting the command. Broker-level calls
    /// retry on this, callers holding a raw `TopicHandle` may see it.
    #[error("topic '{0}' is shutting down")]
    TopicClosed(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

pub type BrokerResult<T> = Result<T, BrokerError>;
