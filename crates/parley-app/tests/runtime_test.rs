//! Runtime orchestration against a scripted driver.
//!
//! The driver answers every persistence call and transport open by queueing
//! the completion it would report, so each test reads as a user session.

use std::{
    collections::VecDeque,
    convert::Infallible,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, TimeZone, Utc};
use parley_app::{AppEvent, Driver, Runtime, View};
use parley_client::{
    ApiError, ClientConfig, ClientEvent, ConnectionStatus, DeliveryState, Environment, MemoryCredentialStore,
    SessionStatus,
};
use parley_proto::{
    ApiRequest, ApiResponse, AuthResponse, Credentials, Generation, HistoryPage, PushEvent, RequestId, SentMessage,
    ServerMessageId, User, UserId, UserStatus,
};

#[derive(Clone)]
struct TestEnv {
    base: Instant,
    counter: Arc<AtomicU64>,
}

impl Environment for TestEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        self.base
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().unwrap()
    }

    async fn sleep(&self, _duration: Duration) {}

    fn random_bytes(&self, buffer: &mut [u8]) {
        let n = self.counter.fetch_add(1, Ordering::SeqCst).to_be_bytes();
        for (byte, value) in buffer.iter_mut().zip(n.iter().cycle()) {
            *byte = *value;
        }
    }
}

#[derive(Default)]
struct Log {
    requests: Vec<ApiRequest>,
    emitted: Vec<PushEvent>,
    opened: Vec<Generation>,
    closed: Vec<Generation>,
    renders: Vec<View>,
    stopped: bool,
}

struct ScriptedDriver {
    now: Instant,
    script: VecDeque<AppEvent>,
    completions: VecDeque<AppEvent>,
    fail_sends: bool,
    log: Arc<Mutex<Log>>,
}

impl ScriptedDriver {
    fn new(now: Instant, script: Vec<ClientEvent>) -> (Self, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut script: VecDeque<AppEvent> = script.into_iter().map(AppEvent::from).collect();
        script.push_back(AppEvent::Quit);
        let driver = Self { now, script, completions: VecDeque::new(), fail_sends: false, log: Arc::clone(&log) };
        (driver, log)
    }

    fn respond(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        match request {
            ApiRequest::Login(_) | ApiRequest::Signup(_) => {
                Ok(ApiResponse::Authenticated(AuthResponse { user: me(), token: "tok".into() }))
            },
            ApiRequest::FetchProfile | ApiRequest::UpdateProfile(_) => Ok(ApiResponse::Profile(me())),
            ApiRequest::Logout => Ok(ApiResponse::LoggedOut),
            ApiRequest::History { peer, page, .. } => Ok(ApiResponse::History(HistoryPage {
                peer: peer.clone(),
                page: *page,
                messages: Vec::new(),
                has_more: false,
            })),
            ApiRequest::SendMessage { .. } if self.fail_sends => Err(ApiError::Network("offline".into())),
            ApiRequest::SendMessage { client_message_id, .. } => Ok(ApiResponse::MessageSent(SentMessage {
                id: ServerMessageId::new(format!("srv-{client_message_id}")),
                created_at: None,
            })),
        }
    }
}

impl Driver for ScriptedDriver {
    type Error = Infallible;
    type Instant = Instant;

    async fn poll_event(&mut self) -> Result<Option<AppEvent>, Infallible> {
        // completions first, so the script observes settled state
        Ok(self.completions.pop_front().or_else(|| self.script.pop_front()))
    }

    fn execute_request(&mut self, id: RequestId, request: ApiRequest, _token: Option<String>) -> Result<(), Infallible> {
        let result = self.respond(&request);
        self.log.lock().unwrap().requests.push(request);
        self.completions.push_back(ClientEvent::ApiCompleted { request: id, result }.into());
        Ok(())
    }

    fn open_transport(&mut self, generation: Generation, _identity: &UserId) -> Result<(), Infallible> {
        self.log.lock().unwrap().opened.push(generation);
        self.completions.push_back(ClientEvent::TransportOpened { generation }.into());
        Ok(())
    }

    fn close_transport(&mut self, generation: Generation) {
        self.log.lock().unwrap().closed.push(generation);
    }

    fn emit(&mut self, _generation: Generation, event: PushEvent) {
        self.log.lock().unwrap().emitted.push(event);
    }

    fn now(&self) -> Instant {
        self.now
    }

    fn render(&mut self, view: &View) -> Result<(), Infallible> {
        self.log.lock().unwrap().renders.push(view.clone());
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().unwrap().stopped = true;
    }
}

fn me() -> User {
    User { id: UserId::new("me"), username: "Me".into(), email: None, status: UserStatus::Online }
}

fn runtime(script: Vec<ClientEvent>) -> (Runtime<ScriptedDriver, TestEnv, MemoryCredentialStore>, Arc<Mutex<Log>>) {
    let now = Instant::now();
    let env = TestEnv { base: now, counter: Arc::new(AtomicU64::new(1)) };
    let (driver, log) = ScriptedDriver::new(now, script);
    (Runtime::new(driver, env, MemoryCredentialStore::new(), ClientConfig::default()), log)
}

fn login() -> ClientEvent {
    ClientEvent::Login(Credentials { email: "me@x.io".into(), password: "secret".into() })
}

#[tokio::test]
async fn session_from_login_to_relay() {
    let (runtime, log) = runtime(vec![
        login(),
        ClientEvent::SelectPeer(UserId::new("peer")),
        ClientEvent::EditDraft("hello".into()),
        ClientEvent::SendDraft,
    ]);
    runtime.run().await.unwrap();

    let log = log.lock().unwrap();
    assert!(log.stopped);
    assert_eq!(log.opened.len(), 1);
    assert!(matches!(log.requests[..], [ApiRequest::Login(_), ApiRequest::History { .. }, ApiRequest::SendMessage { .. }]));
    assert!(matches!(
        log.emitted[..],
        [PushEvent::Join(_), PushEvent::Typing(_), PushEvent::Typing(_), PushEvent::SendMessage(_)]
    ));

    let last = log.renders.last().unwrap();
    assert_eq!(last.session, SessionStatus::Authenticated);
    assert_eq!(last.connection, ConnectionStatus::Connected);
    let conversation = last.conversation.as_ref().unwrap();
    assert_eq!(conversation.messages.len(), 1);
    assert!(conversation.messages[0].mine);
    assert_eq!(conversation.messages[0].delivery, DeliveryState::Confirmed);
}

#[tokio::test]
async fn refused_intent_becomes_status_message() {
    let (mut runtime, _log) = runtime(Vec::new());
    runtime.dispatch(ClientEvent::SelectPeer(UserId::new("peer"))).unwrap();

    let view = runtime.view();
    assert!(view.status_message.unwrap().contains("cannot open a conversation"));
    assert!(view.conversation.is_none());
}

#[tokio::test]
async fn failed_send_is_shown_and_draft_restored() {
    let (mut runtime, _log) = runtime(vec![
        login(),
        ClientEvent::SelectPeer(UserId::new("peer")),
        ClientEvent::EditDraft("hello".into()),
        ClientEvent::SendDraft,
    ]);
    runtime.driver_mut().fail_sends = true;
    while !runtime.process_cycle().await.unwrap() {}

    let view = runtime.view();
    let conversation = view.conversation.unwrap();
    assert_eq!(conversation.draft, "hello");
    assert_eq!(conversation.messages[0].delivery, DeliveryState::Failed);
    assert!(view.status_message.unwrap().starts_with("Error: network failure"));
}

#[tokio::test]
async fn logout_closes_the_transport() {
    let (runtime, log) = runtime(vec![login(), ClientEvent::Logout]);
    runtime.run().await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.closed, log.opened);
    let last = log.renders.last().unwrap();
    assert_eq!(last.session, SessionStatus::Anonymous);
    assert_eq!(last.connection, ConnectionStatus::Disconnected);
}
