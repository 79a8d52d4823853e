//! Terminal client for Parley
//!
//! A thin shell over [`parley_app::Driver`] that provides terminal-specific
//! I/O. All orchestration logic lives in the generic [`parley_app::Runtime`].
//!
//! This crate only handles line input, line output and the production
//! environment.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod command;
pub mod credentials;
pub mod render;
pub mod system_env;
pub mod terminal;

pub use credentials::FileCredentialStore;
pub use parley_app::{AppEvent, Driver, Runtime, View};
pub use system_env::SystemEnv;
pub use terminal::{TerminalDriver, TerminalError};
