//! Generic runtime for application orchestration.
//!
//! The Runtime drives the event loop, coordinating between:
//! - [`Client`]: synchronization state machine
//! - [`Driver`]: platform-specific I/O

use parley_client::{
    Client, ClientAction, ClientConfig, ClientEvent, CredentialStore, Environment, Notice, SessionStatus,
};

use crate::{AppEvent, Driver, View};

/// Generic runtime that orchestrates Client and Driver.
///
/// # Type Parameters
///
/// - `D`: Platform-specific I/O driver
/// - `E`: Environment for time and randomness
/// - `S`: Credential store
pub struct Runtime<D, E, S>
where
    D: Driver,
    E: Environment,
{
    driver: D,
    client: Client<E, S>,
    status_message: Option<String>,
}

impl<D, E, S> Runtime<D, E, S>
where
    D: Driver<Instant = E::Instant>,
    E: Environment,
    S: CredentialStore,
{
    /// Create a new runtime with the given driver and environment.
    pub fn new(driver: D, env: E, store: S, config: ClientConfig) -> Self {
        Self { driver, client: Client::new(env, store, config), status_message: None }
    }

    /// Run the main event loop.
    ///
    /// This is the core orchestration loop that:
    /// 1. Restores a stored session, if any
    /// 2. Polls the driver for the next event and feeds it to the client
    /// 3. Executes the resulting actions through the driver
    /// 4. Ticks the client's timers and renders
    ///
    /// # Errors
    ///
    /// Returns an error if the driver encounters an I/O error.
    pub async fn run(mut self) -> Result<(), D::Error> {
        self.driver.render(&self.view())?;
        self.dispatch(ClientEvent::Restore)?;

        loop {
            let should_quit = self.process_cycle().await?;
            if should_quit {
                break;
            }
        }

        self.driver.stop();
        Ok(())
    }

    /// Process one cycle of the event loop.
    ///
    /// Returns `true` if the application should quit.
    pub async fn process_cycle(&mut self) -> Result<bool, D::Error> {
        match self.driver.poll_event().await? {
            Some(AppEvent::Quit) => return Ok(true),
            Some(AppEvent::Client(event)) => self.dispatch(event)?,
            None => {},
        }

        let now = self.driver.now();
        if self.client.next_deadline().is_some_and(|deadline| deadline <= now) {
            self.dispatch(ClientEvent::Tick { now })?;
        }
        Ok(false)
    }

    /// Feed one event to the client, execute its actions and render.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to execute an action or render.
    /// Client errors are shown to the user, never returned.
    pub fn dispatch(&mut self, event: ClientEvent<E::Instant>) -> Result<(), D::Error> {
        match self.client.handle(event) {
            Ok(actions) => self.execute(actions)?,
            Err(err) => {
                tracing::debug!(%err, kind = ?err.kind(), "intent refused");
                self.status_message = Some(View::describe_error(&err));
            },
        }
        self.driver.render(&self.view())
    }

    fn execute(&mut self, actions: Vec<ClientAction>) -> Result<(), D::Error> {
        for action in actions {
            match action {
                ClientAction::Request { id, request, token } => self.driver.execute_request(id, request, token)?,
                ClientAction::OpenTransport { generation, identity } => {
                    self.driver.open_transport(generation, &identity)?;
                },
                ClientAction::CloseTransport { generation } => self.driver.close_transport(generation),
                ClientAction::Emit { generation, event } => self.driver.emit(generation, event),
                ClientAction::SessionChanged(status) => {
                    tracing::info!(?status, "session changed");
                    if status == SessionStatus::Anonymous {
                        self.status_message = Some("Logged out".to_string());
                    }
                },
                ClientAction::SessionExpired => {
                    self.status_message = Some("Session expired, please log in again".to_string());
                },
                ClientAction::DraftRestored(_) => {},
                ClientAction::Notify(Notice::Info(message)) => self.status_message = Some(message),
                ClientAction::Notify(Notice::Error(err)) => {
                    self.status_message = Some(View::describe_error(&err));
                },
            }
        }
        Ok(())
    }

    /// Current render snapshot.
    pub fn view(&self) -> View {
        View::capture(&self.client, self.status_message.clone())
    }

    /// Get a reference to the Client.
    pub fn client(&self) -> &Client<E, S> {
        &self.client
    }

    /// Get a reference to the Driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Get a mutable reference to the Driver.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}
