//! The `client` module defines the caller side of a subscription.
//!
//! A [`Subscription`] is what the broker hands to a consumer: a bounded
//! receiver fed by the topic actor plus enough of the topic's address to
//! unsubscribe again, explicitly or on drop.

pub mod subscription;
pub use subscription::Subscription;

#[cfg(test)]
mod tests;
