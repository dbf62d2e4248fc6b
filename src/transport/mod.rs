//! The `transport` module exposes the broker over HTTP.
//!
//! It maps methods on `/{key}` to broker operations, renders subscriptions
//! as server-sent event streams and acknowledgements as JSON, and ties the
//! lifetime of every subscription to its HTTP connection.

pub mod http;
pub mod message;

#[cfg(test)]
mod tests;

pub use http::{router, serve, start_http_server};
