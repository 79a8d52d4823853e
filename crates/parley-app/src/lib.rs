//! Application layer for Parley
//!
//! Generic runtime that executes the client's actions through a platform
//! driver, so the same orchestration runs in the terminal client and in
//! deterministic simulation.
//!
//! # Components
//!
//! - [`Driver`]: trait for platform-specific I/O
//! - [`Runtime`]: orchestration loop feeding a [`parley_client::Client`]
//! - [`View`]: render snapshot of everything a frontend displays

#![forbid(unsafe_code)]

mod driver;
mod event;
mod runtime;
mod view;

pub use driver::Driver;
pub use event::AppEvent;
pub use runtime::Runtime;
pub use view::{ConversationView, MessageView, View};
