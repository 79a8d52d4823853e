//! Events a driver hands to the runtime.

use parley_client::ClientEvent;

/// Events produced by [`crate::Driver::poll_event`].
///
/// Everything except quitting is a client event: user intents as well as
/// completions of the work the driver was asked to start.
#[derive(Debug, Clone)]
pub enum AppEvent<I = std::time::Instant> {
    /// Feed into the client.
    Client(ClientEvent<I>),

    /// Leave the event loop.
    Quit,
}

impl<I> From<ClientEvent<I>> for AppEvent<I> {
    fn from(event: ClientEvent<I>) -> Self {
        Self::Client(event)
    }
}
