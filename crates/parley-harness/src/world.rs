//! Several simulated clients sharing one server and one virtual clock.
//!
//! Each [`SimClient`] is the production [`Runtime`] over a [`SimDriver`].
//! [`SimWorld::settle`] steps the clients round-robin until no event is left
//! anywhere, checking the invariant registry after every step.

use std::{
    sync::{MutexGuard, PoisonError},
    time::Duration,
};

use parley_app::{Runtime, View};
use parley_client::{Client, ClientConfig, ClientEvent, Environment, MemoryCredentialStore};
use parley_proto::{Credentials, User, UserId};

use crate::{
    ClientSnapshot, InvariantRegistry, ServerConfig, SharedSimServer, SimDriver, SimDriverError, SimEnv, SimInstant,
    SimServer, SystemSnapshot, create_shared_server,
};

/// Upper bound on steps in one [`SimWorld::settle`].
const MAX_SETTLE_STEPS: usize = 10_000;

/// Password of every account created by [`SimWorld::register`].
pub const PASSWORD: &str = "secret";

/// One client runtime in the simulation.
pub struct SimClient {
    id: u64,
    env: SimEnv,
    runtime: Runtime<SimDriver, SimEnv, MemoryCredentialStore>,
}

impl SimClient {
    /// Create a client with its own driver on `server`.
    pub fn new(
        id: u64,
        server: SharedSimServer,
        env: SimEnv,
        store: MemoryCredentialStore,
        config: ClientConfig,
    ) -> Self {
        let driver = SimDriver::new(server, env.clone());
        Self { id, env: env.clone(), runtime: Runtime::new(driver, env, store, config) }
    }

    /// Queue an intent, as the user would.
    pub fn intent(&mut self, event: ClientEvent<SimInstant>) {
        self.runtime.driver_mut().inject(event);
    }

    /// Process one event or due timer. Returns `false` if there was
    /// nothing to do.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver refuses an action.
    pub async fn step(&mut self) -> Result<bool, SimDriverError> {
        let due = self.runtime.client().next_deadline().is_some_and(|deadline| deadline <= self.env.now());
        if !due && !self.runtime.driver().has_pending() {
            return Ok(false);
        }
        self.runtime.process_cycle().await?;
        Ok(true)
    }

    /// The client state machine.
    pub fn client(&self) -> &Client<SimEnv, MemoryCredentialStore> {
        self.runtime.client()
    }

    /// The driver, for inspection.
    pub fn driver(&self) -> &SimDriver {
        self.runtime.driver()
    }

    /// The driver, for delivery control.
    pub fn driver_mut(&mut self) -> &mut SimDriver {
        self.runtime.driver_mut()
    }

    /// The runtime.
    pub fn runtime_mut(&mut self) -> &mut Runtime<SimDriver, SimEnv, MemoryCredentialStore> {
        &mut self.runtime
    }

    /// Current render snapshot.
    pub fn view(&self) -> View {
        self.runtime.view()
    }

    /// Authenticated identity.
    pub fn identity(&self) -> Option<UserId> {
        self.client().user().map(|u| u.id.clone())
    }

    /// Invariant snapshot.
    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot::capture(self.id, self.client(), self.driver().open_transports())
    }
}

/// Clients, server and clock of one simulation run.
pub struct SimWorld {
    env: SimEnv,
    server: SharedSimServer,
    clients: Vec<SimClient>,
    invariants: InvariantRegistry,
}

impl SimWorld {
    /// World with the default server behavior.
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, ServerConfig::default())
    }

    /// World with custom server behavior.
    pub fn with_config(seed: u64, config: ServerConfig) -> Self {
        let env = SimEnv::with_seed(seed);
        let server = create_shared_server(env.clone(), config);
        Self { env, server, clients: Vec::new(), invariants: InvariantRegistry::standard() }
    }

    /// Shared clock.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Lock the server for seeding or fault injection.
    pub fn server(&self) -> MutexGuard<'_, SimServer> {
        self.server.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the account `name` with email `name@example.com`.
    pub fn register(&self, name: &str) -> User {
        self.server().register(name, &email(name), PASSWORD)
    }

    /// Add a logged-out client with the default config.
    pub fn add_client(&mut self) -> usize {
        self.add_client_with(MemoryCredentialStore::new(), ClientConfig::default())
    }

    /// Add a client with a given credential store and config.
    pub fn add_client_with(&mut self, store: MemoryCredentialStore, config: ClientConfig) -> usize {
        let index = self.clients.len();
        let client = SimClient::new(index as u64, self.server.clone(), self.env.clone(), store, config);
        self.clients.push(client);
        index
    }

    /// Client at `index`.
    pub fn client(&self, index: usize) -> &SimClient {
        &self.clients[index]
    }

    /// Client at `index`, mutably.
    pub fn client_mut(&mut self, index: usize) -> &mut SimClient {
        &mut self.clients[index]
    }

    /// Queue an intent on client `index`.
    pub fn intent(&mut self, index: usize, event: ClientEvent<SimInstant>) {
        self.clients[index].intent(event);
    }

    /// Log client `index` in as `name` and settle.
    ///
    /// # Errors
    ///
    /// Returns an error if a driver refuses an action.
    pub async fn login(&mut self, index: usize, name: &str) -> Result<usize, SimDriverError> {
        let credentials = Credentials { email: email(name), password: PASSWORD.to_string() };
        self.intent(index, ClientEvent::Login(credentials));
        self.settle().await
    }

    /// Step every client until none has work left. Returns the step count.
    ///
    /// # Errors
    ///
    /// Returns an error if a driver refuses an action.
    pub async fn settle(&mut self) -> Result<usize, SimDriverError> {
        let mut steps = 0;
        loop {
            let mut progressed = false;
            for index in 0..self.clients.len() {
                if self.clients[index].step().await? {
                    progressed = true;
                    steps += 1;
                    self.check(&format!("after step {steps} of client {index}"));
                }
            }
            if !progressed {
                return Ok(steps);
            }
            if steps >= MAX_SETTLE_STEPS {
                tracing::warn!(steps, "simulation did not settle");
                return Ok(steps);
            }
        }
    }

    /// Move the clock forward and settle.
    ///
    /// # Errors
    ///
    /// Returns an error if a driver refuses an action.
    pub async fn advance(&mut self, by: Duration) -> Result<usize, SimDriverError> {
        self.env.advance(by);
        self.settle().await
    }

    /// Snapshot of every client.
    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot::from_clients(self.clients.iter().map(SimClient::snapshot).collect())
    }

    /// Panic if any invariant is violated.
    pub fn check(&self, context: &str) {
        self.invariants.assert_all(&self.snapshot(), context);
    }

    /// Current virtual time.
    pub fn now(&self) -> SimInstant {
        self.env.now()
    }
}

fn email(name: &str) -> String {
    format!("{name}@example.com")
}
