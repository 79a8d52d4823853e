//! Simulation driver implementing the Driver trait.
//!
//! `SimDriver` provides the same interface as the terminal driver but for
//! deterministic testing. It implements [`Driver`] so the same
//! [`parley_app::Runtime`] orchestration code runs in both production and
//! simulation.
//!
//! Persistence calls run against the shared [`SimServer`] at once, but their
//! completions are queued like network responses. In manual mode nothing is
//! delivered until the test releases it, which is how tests pick the order
//! of acknowledgements and push events.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::PoisonError,
};

use parley_app::{AppEvent, Driver, View};
use parley_client::{ClientEvent, Environment};
use parley_proto::{ApiRequest, Generation, PushEvent, RequestId, UserId};

use crate::{SharedSimServer, SimEnv, SimInstant, SimServer};

/// Error type for simulation driver.
#[derive(Debug, Clone)]
pub struct SimDriverError(pub String);

impl std::fmt::Display for SimDriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimDriverError: {}", self.0)
    }
}

impl std::error::Error for SimDriverError {}

type SimEvent = AppEvent<SimInstant>;

/// Simulation driver for deterministic testing.
pub struct SimDriver {
    server: SharedSimServer,
    env: SimEnv,
    /// Intents injected by the test, and released deliveries.
    inbox: VecDeque<SimEvent>,
    /// Completions not yet delivered.
    completions: VecDeque<SimEvent>,
    /// Open transports: generation → server link.
    transports: BTreeMap<Generation, u64>,
    manual: bool,
    emitted: Vec<PushEvent>,
    requests: Vec<ApiRequest>,
    opened: usize,
    last_view: Option<View>,
    stopped: bool,
}

impl SimDriver {
    /// Create a driver talking to `server`.
    pub fn new(server: SharedSimServer, env: SimEnv) -> Self {
        Self {
            server,
            env,
            inbox: VecDeque::new(),
            completions: VecDeque::new(),
            transports: BTreeMap::new(),
            manual: false,
            emitted: Vec::new(),
            requests: Vec::new(),
            opened: 0,
            last_view: None,
            stopped: false,
        }
    }

    /// In manual mode completions and push events wait for
    /// [`release_completion`](Self::release_completion) and
    /// [`release_push`](Self::release_push).
    pub fn set_manual(&mut self, manual: bool) {
        self.manual = manual;
    }

    /// Inject an intent for processing.
    pub fn inject(&mut self, event: impl Into<SimEvent>) {
        self.inbox.push_back(event.into());
    }

    /// Move the oldest undelivered completion to the inbox.
    pub fn release_completion(&mut self) -> bool {
        let Some(event) = self.completions.pop_front() else {
            return false;
        };
        self.inbox.push_back(event);
        true
    }

    /// Move the next push event (or transport loss) to the inbox.
    pub fn release_push(&mut self) -> bool {
        let Some(event) = self.next_push() else {
            return false;
        };
        self.inbox.push_back(event);
        true
    }

    /// Completions not yet delivered.
    pub fn pending_completions(&self) -> usize {
        self.completions.len()
    }

    /// Whether a poll would return an event right now.
    pub fn has_pending(&self) -> bool {
        if !self.inbox.is_empty() {
            return true;
        }
        if self.manual {
            return false;
        }
        !self.completions.is_empty() || self.push_waiting()
    }

    /// Whether the server holds push events or a transport loss for us.
    pub fn push_waiting(&self) -> bool {
        let server = self.lock();
        self.transports.values().any(|link| !server.is_open(*link) || server.has_queued(*link))
    }

    /// Every event written on a transport, in order.
    pub fn emitted(&self) -> &[PushEvent] {
        &self.emitted
    }

    /// Every persistence call started, in order.
    pub fn requests(&self) -> &[ApiRequest] {
        &self.requests
    }

    /// Number of transports opened so far.
    pub fn transports_opened(&self) -> usize {
        self.opened
    }

    /// Transports open from this driver's side.
    pub fn open_transports(&self) -> usize {
        let server = self.lock();
        self.transports.values().filter(|link| server.is_open(**link)).count()
    }

    /// Last rendered view.
    pub fn last_view(&self) -> Option<&View> {
        self.last_view.as_ref()
    }

    /// Whether [`Driver::stop`] was called.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimServer> {
        self.server.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_push(&mut self) -> Option<SimEvent> {
        let mut server = self.server.lock().unwrap_or_else(PoisonError::into_inner);
        let mut lost = None;
        for (&generation, &link) in &self.transports {
            if !server.is_open(link) {
                lost = Some(generation);
                break;
            }
            if let Some(event) = server.poll(link) {
                return Some(ClientEvent::PushReceived { generation, event }.into());
            }
        }
        drop(server);

        let generation = lost?;
        self.transports.remove(&generation);
        Some(ClientEvent::TransportClosed { generation, reason: "connection lost".to_string() }.into())
    }
}

impl Driver for SimDriver {
    type Error = SimDriverError;
    type Instant = SimInstant;

    async fn poll_event(&mut self) -> Result<Option<SimEvent>, Self::Error> {
        if let Some(event) = self.inbox.pop_front() {
            return Ok(Some(event));
        }
        if self.manual {
            return Ok(None);
        }
        if let Some(event) = self.completions.pop_front() {
            return Ok(Some(event));
        }
        Ok(self.next_push())
    }

    fn execute_request(&mut self, id: RequestId, request: ApiRequest, token: Option<String>) -> Result<(), Self::Error> {
        if self.stopped {
            return Err(SimDriverError("driver stopped".to_string()));
        }
        let result = self.lock().handle_request(&request, token.as_deref());
        tracing::debug!(%id, ok = result.is_ok(), "simulated request");
        self.requests.push(request);
        self.completions.push_back(ClientEvent::ApiCompleted { request: id, result }.into());
        Ok(())
    }

    fn open_transport(&mut self, generation: Generation, identity: &UserId) -> Result<(), Self::Error> {
        if self.stopped {
            return Err(SimDriverError("driver stopped".to_string()));
        }
        self.opened += 1;
        let link = self.lock().connect();
        let event = match link {
            Some(link) => {
                self.transports.insert(generation, link);
                ClientEvent::TransportOpened { generation }
            },
            None => ClientEvent::TransportClosed { generation, reason: "connection refused".to_string() },
        };
        tracing::debug!(%generation, %identity, "simulated transport");
        self.completions.push_back(event.into());
        Ok(())
    }

    fn close_transport(&mut self, generation: Generation) {
        if let Some(link) = self.transports.remove(&generation) {
            self.lock().disconnect(link);
        }
    }

    fn emit(&mut self, generation: Generation, event: PushEvent) {
        self.emitted.push(event.clone());
        match self.transports.get(&generation) {
            Some(link) => {
                let link = *link;
                self.lock().receive(link, event);
            },
            None => tracing::warn!(%generation, "emit on unknown transport"),
        }
    }

    fn now(&self) -> SimInstant {
        self.env.now()
    }

    fn render(&mut self, view: &View) -> Result<(), Self::Error> {
        self.last_view = Some(view.clone());
        Ok(())
    }

    fn stop(&mut self) {
        let links: Vec<_> = std::mem::take(&mut self.transports).into_values().collect();
        let mut server = self.lock();
        for link in links {
            server.disconnect(link);
        }
        drop(server);
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use parley_proto::Credentials;

    use super::*;
    use crate::{ServerConfig, create_shared_server};

    fn driver() -> SimDriver {
        let env = SimEnv::new();
        let server = create_shared_server(env.clone(), ServerConfig::default());
        server.lock().unwrap().register("alice", "alice@example.com", "secret");
        SimDriver::new(server, env)
    }

    fn login() -> ApiRequest {
        ApiRequest::Login(Credentials { email: "alice@example.com".into(), password: "secret".into() })
    }

    #[tokio::test]
    async fn manual_mode_holds_completions() {
        let mut driver = driver();
        driver.set_manual(true);
        driver.execute_request(RequestId(1), login(), None).unwrap();

        assert!(!driver.has_pending());
        assert!(driver.poll_event().await.unwrap().is_none());

        assert!(driver.release_completion());
        let event = driver.poll_event().await.unwrap();
        assert!(matches!(event, Some(AppEvent::Client(ClientEvent::ApiCompleted { request: RequestId(1), result: Ok(_) }))));
    }

    #[tokio::test]
    async fn lost_link_is_reported_once() {
        let mut driver = driver();
        driver.open_transport(Generation(1), &UserId::new("alice")).unwrap();
        driver.poll_event().await.unwrap();
        driver.emit(Generation(1), PushEvent::Join(UserId::new("alice")));

        driver.server.lock().unwrap().drop_connections(&UserId::new("alice"));

        let event = driver.poll_event().await.unwrap();
        assert!(matches!(
            event,
            Some(AppEvent::Client(ClientEvent::TransportClosed { generation: Generation(1), .. }))
        ));
        assert!(driver.poll_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refused_connection_closes_the_generation() {
        let mut driver = driver();
        driver.server.lock().unwrap().set_refuse_connections(true);
        driver.open_transport(Generation(1), &UserId::new("alice")).unwrap();

        let event = driver.poll_event().await.unwrap();
        assert!(matches!(event, Some(AppEvent::Client(ClientEvent::TransportClosed { .. }))));
        assert_eq!(driver.open_transports(), 0);
    }
}
