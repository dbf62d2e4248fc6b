//! # via
//!
//! `via` is a small publish/subscribe broker spoken over plain HTTP. A topic
//! is whatever path a client names; subscribers stream it as server-sent
//! events and producers `POST` to it. Topics whose key carries the history
//! prefix (`h/` by default) keep a bounded, persisted backlog that late
//! subscribers replay from a cursor.
//!
//! ## Core Modules
//!
//! - `broker`: the topic registry and the per-topic actors that own all topic state.
//! - `client`: the subscriber side of a topic, a receiving handle that unsubscribes on drop.
//! - `config`: loading server, broker and storage settings from file and environment.
//! - `persistence`: history stores (JSON files or `sled`).
//! - `transport`: the axum HTTP/SSE surface.
//! - `utils`: shared error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod persistence;
pub mod transport;
pub mod utils;
