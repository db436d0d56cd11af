//! Real-time account streams.

pub mod websocket;

pub use websocket::{ConnectionState, SubscriptionId, SubscriptionManager, SubscriptionTarget};
