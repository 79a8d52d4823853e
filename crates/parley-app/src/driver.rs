//! Driver trait for abstracting I/O operations.
//!
//! The [`Driver`] trait decouples the runtime from specific I/O
//! implementations. Each frontend implements the trait to provide
//! platform-specific I/O, while the generic [`crate::Runtime`] handles all
//! orchestration.

use std::{future::Future, ops::Sub, time::Duration};

use parley_proto::{ApiRequest, Generation, PushEvent, RequestId, UserId};

use crate::{AppEvent, View};

/// Abstracts I/O operations for the runtime.
///
/// Work that takes time (persistence calls, opening a transport) is only
/// started by the methods below. Its outcome comes back later through
/// [`poll_event`](Driver::poll_event) as a client event tagged with the
/// request id or generation it was started with.
///
/// # Implementations
///
/// - **CLI**: stdin lines for input, reqwest for persistence calls,
///   tokio-tungstenite for the push channel
/// - **Simulation**: scripted in-memory server and virtual time
pub trait Driver: Send {
    /// Platform-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Time instant type. Enables virtual time in simulation.
    type Instant: Copy + Ord + Send + Sync + Sub<Output = Duration>;

    /// Wait for the next event.
    ///
    /// Returns `None` if nothing arrived before the driver's poll interval
    /// elapsed, so the runtime can tick.
    fn poll_event(&mut self) -> impl Future<Output = Result<Option<AppEvent<Self::Instant>>, Self::Error>> + Send;

    /// Start a persistence call. Report it as `ApiCompleted { request: id }`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the call could not be started at all.
    fn execute_request(&mut self, id: RequestId, request: ApiRequest, token: Option<String>) -> Result<(), Self::Error>;

    /// Start opening a push transport and report `TransportOpened` or
    /// `TransportClosed` for `generation`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the attempt could not be started at all.
    fn open_transport(&mut self, generation: Generation, identity: &UserId) -> Result<(), Self::Error>;

    /// Close the transport of `generation`, if it is still open.
    fn close_transport(&mut self, generation: Generation);

    /// Write an event on the transport of `generation`.
    ///
    /// A write to a dead transport is not an error here; the driver reports
    /// the loss as `TransportClosed`.
    fn emit(&mut self, generation: Generation, event: PushEvent);

    /// Current time instant.
    fn now(&self) -> Self::Instant;

    /// Render the application state.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails.
    fn render(&mut self, view: &View) -> Result<(), Self::Error>;

    /// Stop all transports and clean up resources.
    fn stop(&mut self);
}
