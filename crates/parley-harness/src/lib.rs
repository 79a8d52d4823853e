//! Deterministic simulation harness for Parley client testing.
//!
//! In-memory implementations of the Environment and Driver traits plus a
//! scripted server, so the production [`parley_app::Runtime`] can be driven
//! through reproducible schedules.
//!
//! # Components
//!
//! - [`SimEnv`]: virtual clock and seeded RNG
//! - [`SimServer`]: persistence API and push relay over in-memory state
//! - [`SimDriver`]: [`parley_app::Driver`] over a shared [`SimServer`], with
//!   manual delivery for controlling interleavings
//! - [`SimWorld`]: several clients sharing one server and one clock
//!
//! # Invariant Testing
//!
//! The `invariants` module checks WHAT must be true after every step, not
//! specific scenarios. Use [`InvariantRegistry::standard()`] for the client
//! invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_driver;
pub mod sim_env;
pub mod sim_server;
pub mod world;

pub use invariants::{
    ChronologicalOrder, ClientSnapshot, ConfirmedHaveServerIds, ConversationSnapshot, Invariant, InvariantRegistry,
    InvariantResult, MessageSnapshot, NoDuplicateMessages, PeerIsolation, SingleConnection, SystemSnapshot,
    Violation,
};
pub use sim_driver::{SimDriver, SimDriverError};
pub use sim_env::{SimEnv, SimInstant};
pub use sim_server::{ServerConfig, SharedSimServer, SimServer, create_shared_server};
pub use world::{SimClient, SimWorld};
