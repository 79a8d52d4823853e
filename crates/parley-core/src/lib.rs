//! Parley core
//!
//! Foundations shared by the client state machines:
//!
//! - [`env::Environment`]: time and randomness, so the same logic runs against
//!   the system clock in production and a virtual clock in simulation
//! - [`connection::ConnectionManager`]: the single push connection, its
//!   reconnect cycle, outbound queue and scoped subscriptions
//! - [`backoff::ReconnectPolicy`]: bounded exponential backoff with jitter
//!
//! Everything follows the action pattern: methods take time as input and
//! return actions for a driver to execute. No method performs I/O.

#![forbid(unsafe_code)]

pub mod backoff;
pub mod connection;
pub mod env;
pub mod error;

pub use backoff::ReconnectPolicy;
pub use connection::{
    ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionStatus, Subscription,
    SubscriptionId, Topic,
};
pub use env::Environment;
pub use error::ConnectionError;
