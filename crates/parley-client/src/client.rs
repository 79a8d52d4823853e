//! Client facade.
//!
//! Owns one of each component and routes between them. Persistence calls are
//! correlated by [`RequestId`]; a completion nobody is waiting for any more is
//! dropped. Push deliveries are routed by subscription id: conversation
//! subscriptions go to the open conversation, session subscriptions feed the
//! presence map and the error stream.

use std::collections::HashMap;

use parley_core::{
    ConnectionAction, ConnectionManager, ConnectionStatus, Environment, Subscription, SubscriptionId, Topic,
};
use parley_proto::{
    ApiRequest, ApiResponse, EventKind, LocalId, PushEvent, RequestId, SendMessagePayload, ServerMessageId,
    TypingPayload, User, UserId,
};

use crate::{
    config::ClientConfig,
    conversation::{ConversationSync, HistoryOutcome, OutgoingMessage},
    credentials::CredentialStore,
    error::{ApiError, ClientError},
    event::{ClientAction, ClientEvent, Notice},
    presence::Presence,
    session::{SessionAction, SessionManager, SessionStatus},
    store::DedupeLedger,
};

/// What an outstanding persistence call belongs to.
#[derive(Debug, Clone)]
enum PendingCall {
    Session,
    Logout,
    History { peer: UserId },
    Send { peer: UserId, local_id: LocalId, content: String },
}

/// Chat client state machine.
pub struct Client<E: Environment, S> {
    /// Environment for time and randomness.
    env: E,

    config: ClientConfig,
    session: SessionManager<S>,
    connection: ConnectionManager<E::Instant>,

    /// Conversation with the selected peer.
    conversation: Option<ConversationSync<E::Instant>>,

    /// Self-sent server ids seen this session, shared by every conversation.
    ledger: DedupeLedger<E::Instant>,

    presence: Presence,

    /// Error stream and presence listeners, re-established after every
    /// connect since a disconnect discards all listeners.
    session_subscriptions: Vec<Subscription>,

    /// Outstanding persistence calls.
    pending: HashMap<RequestId, PendingCall>,

    next_request: u64,
}

impl<E: Environment, S: CredentialStore> Client<E, S> {
    /// Create an anonymous client.
    pub fn new(env: E, store: S, config: ClientConfig) -> Self {
        Self {
            env,
            session: SessionManager::new(store),
            connection: ConnectionManager::new(config.connection.clone()),
            ledger: DedupeLedger::new(config.dedupe_ttl),
            config,
            conversation: None,
            presence: Presence::new(),
            session_subscriptions: Vec::new(),
            pending: HashMap::new(),
            next_request: 1,
        }
    }

    /// Session manager.
    pub fn session(&self) -> &SessionManager<S> {
        &self.session
    }

    /// Session status.
    pub fn session_status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Authenticated account.
    pub fn user(&self) -> Option<&User> {
        self.session.user()
    }

    /// Push connection.
    pub fn connection(&self) -> &ConnectionManager<E::Instant> {
        &self.connection
    }

    /// Push connection status.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Open conversation, if a peer is selected.
    pub fn conversation(&self) -> Option<&ConversationSync<E::Instant>> {
        self.conversation.as_ref()
    }

    /// Self-sent id ledger of the session.
    pub fn ledger(&self) -> &DedupeLedger<E::Instant> {
        &self.ledger
    }

    /// Online status of other users.
    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Number of outstanding persistence calls.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Earliest instant at which a [`ClientEvent::Tick`] has work to do.
    pub fn next_deadline(&self) -> Option<E::Instant> {
        let conversation = self.conversation.as_ref().and_then(|c| c.next_deadline());
        match (self.connection.next_deadline(), conversation) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// Only intents that can be refused synchronously fail: validation errors
    /// and intents that make no sense in the current state. Failures of
    /// asynchronous work are reported as [`ClientAction::Notify`].
    pub fn handle(&mut self, event: ClientEvent<E::Instant>) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::Restore => {
                let id = self.request_id();
                let actions = self.session.restore(id)?;
                Ok(self.apply_session(actions))
            },
            ClientEvent::Login(credentials) => {
                let id = self.request_id();
                let actions = self.session.login(id, credentials)?;
                Ok(self.apply_session(actions))
            },
            ClientEvent::Signup(form) => {
                let id = self.request_id();
                let actions = self.session.signup(id, form)?;
                Ok(self.apply_session(actions))
            },
            ClientEvent::Logout => {
                let id = self.request_id();
                let actions = self.session.logout(id);
                Ok(self.apply_session(actions))
            },
            ClientEvent::UpdateProfile(update) => {
                let id = self.request_id();
                let actions = self.session.update_profile(id, update)?;
                Ok(self.apply_session(actions))
            },
            ClientEvent::SelectPeer(peer) => self.handle_select(peer),
            ClientEvent::ClosePeer => Ok(self.close_conversation()),
            ClientEvent::LoadOlder => self.handle_load_older(),
            ClientEvent::EditDraft(text) => self.handle_edit_draft(text),
            ClientEvent::SendDraft => self.handle_send_draft(),
            ClientEvent::Retry(local_id) => self.handle_retry(local_id),
            ClientEvent::Discard(local_id) => {
                self.open_conversation("discard a message")?.discard(local_id)?;
                Ok(Vec::new())
            },
            ClientEvent::Reconnect => {
                let actions = self.connection.reconnect();
                Ok(self.convert(actions))
            },
            ClientEvent::ApiCompleted { request, result } => Ok(self.handle_completion(request, result)),
            ClientEvent::TransportOpened { generation } => {
                let actions = self.connection.handle_opened(generation);
                Ok(self.convert(actions))
            },
            ClientEvent::TransportClosed { generation, reason } => {
                let now = self.env.now();
                let entropy = self.env.random_u64();
                let actions = self.connection.handle_closed(generation, &reason, now, entropy);
                Ok(self.convert(actions))
            },
            ClientEvent::PushReceived { generation, event } => {
                let actions = self.connection.handle_inbound(generation, event);
                Ok(self.convert(actions))
            },
            ClientEvent::Tick { now } => Ok(self.handle_tick(now)),
        }
    }

    fn handle_select(&mut self, peer: UserId) -> Result<Vec<ClientAction>, ClientError> {
        let Some(owner) = self.session.identity().cloned() else {
            return Err(ClientError::InvalidState { operation: "open a conversation", state: "logged out" });
        };

        // reselecting the open peer only retries a failed load
        if self.conversation.as_ref().is_some_and(|c| *c.peer() == peer) {
            return Ok(self.load_current());
        }

        let mut actions = self.close_conversation();
        let mut conversation = ConversationSync::new(owner.clone(), peer.clone(), &self.config);
        conversation.attach([
            self.connection.subscribe(Topic::Event(EventKind::ReceiveMessage), Some(peer.clone())),
            self.connection.subscribe(Topic::Event(EventKind::UserTyping), Some(peer.clone())),
            // self echoes carry our own id as the subject
            self.connection.subscribe(Topic::Event(EventKind::ReceiveMessage), Some(owner.clone())),
        ]);
        tracing::debug!(%peer, "conversation opened");
        self.conversation = Some(conversation);

        actions.extend(self.load_current());
        Ok(actions)
    }

    fn handle_load_older(&mut self) -> Result<Vec<ClientAction>, ClientError> {
        let id = self.request_id();
        let token = self.session.token().map(str::to_string);
        let conversation = self.open_conversation("load older messages")?;

        let Some(request) = conversation.load_older(id) else {
            return Ok(Vec::new());
        };
        let peer = conversation.peer().clone();
        self.pending.insert(id, PendingCall::History { peer });
        Ok(vec![ClientAction::Request { id, request, token }])
    }

    fn handle_edit_draft(&mut self, text: String) -> Result<Vec<ClientAction>, ClientError> {
        let now = self.env.now();
        let conversation = self.open_conversation("edit the draft")?;
        if !conversation.edit_draft(text, now) {
            return Ok(Vec::new());
        }
        let peer = conversation.peer().clone();
        Ok(self.publish_typing(peer, true))
    }

    fn handle_send_draft(&mut self) -> Result<Vec<ClientAction>, ClientError> {
        let local_id = LocalId(self.env.random_u64());
        let sent_at = self.env.wall_clock();
        let outgoing = self.open_conversation("send a message")?.send_draft(local_id, sent_at)?;
        Ok(self.submit(outgoing))
    }

    fn handle_retry(&mut self, local_id: LocalId) -> Result<Vec<ClientAction>, ClientError> {
        let outgoing = self.open_conversation("retry a message")?.retry(local_id)?;
        Ok(self.submit(outgoing))
    }

    fn submit(&mut self, outgoing: OutgoingMessage) -> Vec<ClientAction> {
        let OutgoingMessage { local_id, request, content, stop_typing } = outgoing;
        let ApiRequest::SendMessage { recipient, .. } = &request else {
            return Vec::new();
        };
        let peer = recipient.clone();

        let id = self.request_id();
        tracing::debug!(%id, %local_id, %peer, "sending message");
        self.pending.insert(id, PendingCall::Send { peer: peer.clone(), local_id, content });

        let token = self.session.token().map(str::to_string);
        let mut actions = vec![ClientAction::Request { id, request, token }];
        if stop_typing {
            actions.extend(self.publish_typing(peer, false));
        }
        actions
    }

    fn handle_completion(&mut self, request: RequestId, result: Result<ApiResponse, ApiError>) -> Vec<ClientAction> {
        let Some(call) = self.pending.remove(&request) else {
            tracing::debug!(%request, "dropping completion nobody is waiting for");
            return Vec::new();
        };

        match call {
            PendingCall::Session => {
                let actions = self.session.handle_response(request, result);
                self.apply_session(actions)
            },
            PendingCall::Logout => {
                if let Err(err) = result {
                    tracing::debug!(%err, "remote logout failed");
                }
                Vec::new()
            },
            PendingCall::History { peer } => self.handle_history(request, peer, result),
            PendingCall::Send { peer, local_id, content } => self.handle_sent(peer, local_id, content, result),
        }
    }

    fn handle_history(
        &mut self,
        request: RequestId,
        peer: UserId,
        result: Result<ApiResponse, ApiError>,
    ) -> Vec<ClientAction> {
        if matches!(&result, Err(err) if err.is_unauthorized()) {
            return self.expire();
        }
        let result = match result {
            Ok(ApiResponse::History(page)) => Ok(page),
            Ok(other) => Err(unexpected("history", &other)),
            Err(err) => Err(ClientError::from_api(err, false)),
        };

        let now = self.env.now();
        let Some(conversation) = self.conversation.as_mut().filter(|c| *c.peer() == peer) else {
            tracing::debug!(%peer, "history for a closed conversation");
            return Vec::new();
        };
        match conversation.handle_history(request, result, &mut self.ledger, now) {
            HistoryOutcome::Failed(err) => vec![ClientAction::Notify(Notice::Error(err))],
            HistoryOutcome::Loaded { .. } | HistoryOutcome::Stale => Vec::new(),
        }
    }

    fn handle_sent(
        &mut self,
        peer: UserId,
        local_id: LocalId,
        content: String,
        result: Result<ApiResponse, ApiError>,
    ) -> Vec<ClientAction> {
        let now = self.env.now();
        let error = match result {
            Ok(ApiResponse::MessageSent(sent)) => {
                if let Some(conversation) = self.conversation.as_mut().filter(|c| *c.peer() == peer) {
                    let outcome = conversation.handle_sent(local_id, &sent, &mut self.ledger, now);
                    tracing::debug!(%local_id, server_id = %sent.id, ?outcome, "message persisted");
                }
                return self.relay(peer, content, local_id, sent.id);
            },
            Ok(other) => unexpected("send", &other),
            Err(err) => ClientError::from_api(err, false),
        };

        tracing::warn!(%local_id, %error, "send failed");
        let mut actions = Vec::new();
        if let Some(conversation) = self.conversation.as_mut().filter(|c| *c.peer() == peer) {
            if let Some(text) = conversation.handle_send_failed(local_id) {
                actions.push(ClientAction::DraftRestored(text));
            }
        }
        if matches!(error, ClientError::Auth(_)) {
            actions.extend(self.expire());
        } else {
            actions.push(ClientAction::Notify(Notice::Error(error)));
        }
        actions
    }

    fn relay(&mut self, peer: UserId, content: String, local_id: LocalId, id: ServerMessageId) -> Vec<ClientAction> {
        let Some(sender) = self.session.identity().cloned() else {
            return Vec::new();
        };
        let event = PushEvent::SendMessage(SendMessagePayload {
            recipient_id: peer,
            message: content,
            sender_id: sender,
            message_id: Some(id),
            client_message_id: Some(local_id),
        });
        match self.connection.publish(event) {
            Ok(actions) => self.convert(actions),
            Err(err) => {
                tracing::warn!(%err, %local_id, "persisted message not relayed");
                vec![ClientAction::Notify(Notice::Error(err.into()))]
            },
        }
    }

    fn handle_tick(&mut self, now: E::Instant) -> Vec<ClientAction> {
        let connection = self.connection.tick(now);
        let mut actions = self.convert(connection);
        self.ledger.prune(now);

        let mut stop = None;
        if let Some(conversation) = self.conversation.as_mut() {
            if conversation.tick(now) {
                stop = Some(conversation.peer().clone());
            }
        }
        if let Some(peer) = stop {
            actions.extend(self.publish_typing(peer, false));
        }
        actions
    }

    fn apply_session(&mut self, actions: Vec<SessionAction>) -> Vec<ClientAction> {
        let mut out = Vec::new();
        for action in actions {
            match action {
                SessionAction::Request { id, request, token } => {
                    let call = if request == ApiRequest::Logout { PendingCall::Logout } else { PendingCall::Session };
                    self.pending.insert(id, call);
                    out.push(ClientAction::Request { id, request, token });
                },
                SessionAction::Connect(identity) => out.extend(self.bind(identity)),
                SessionAction::Disconnect => out.extend(self.teardown()),
                SessionAction::Changed(status) => out.push(ClientAction::SessionChanged(status)),
                SessionAction::Expired => out.push(ClientAction::SessionExpired),
                SessionAction::Failed(err) => out.push(ClientAction::Notify(Notice::Error(err))),
                SessionAction::Info(message) => out.push(ClientAction::Notify(Notice::Info(message))),
            }
        }
        out
    }

    fn bind(&mut self, identity: UserId) -> Vec<ClientAction> {
        let actions = self.connection.connect(identity);

        let connection = &self.connection;
        self.session_subscriptions.retain(|s| connection.is_subscribed(s.id()));
        if self.session_subscriptions.is_empty() {
            self.session_subscriptions = vec![
                self.connection.subscribe(Topic::ConnectionErrors, None),
                self.connection.subscribe(Topic::Event(EventKind::UserOnline), None),
                self.connection.subscribe(Topic::Event(EventKind::UserOffline), None),
            ];
        }
        self.convert(actions)
    }

    fn teardown(&mut self) -> Vec<ClientAction> {
        let mut actions = self.close_conversation();
        let connection = self.connection.disconnect();
        actions.extend(self.convert(connection));

        self.session_subscriptions.clear();
        self.pending.retain(|_, call| matches!(call, PendingCall::Logout));
        self.presence.clear();
        self.ledger.clear();
        actions
    }

    fn expire(&mut self) -> Vec<ClientAction> {
        let actions = self.session.expire();
        self.apply_session(actions)
    }

    fn close_conversation(&mut self) -> Vec<ClientAction> {
        let Some(conversation) = self.conversation.take() else {
            return Vec::new();
        };
        let peer = conversation.peer().clone();
        let (subscriptions, stop_typing) = conversation.close();
        for subscription in subscriptions {
            self.connection.unsubscribe(subscription);
        }
        self.pending.retain(|_, call| !matches!(call, PendingCall::History { .. }));

        if stop_typing { self.publish_typing(peer, false) } else { Vec::new() }
    }

    fn load_current(&mut self) -> Vec<ClientAction> {
        let id = self.request_id();
        let token = self.session.token().map(str::to_string);
        let Some(conversation) = self.conversation.as_mut() else {
            return Vec::new();
        };
        let Some(request) = conversation.load(id) else {
            return Vec::new();
        };
        self.pending.insert(id, PendingCall::History { peer: conversation.peer().clone() });
        vec![ClientAction::Request { id, request, token }]
    }

    fn publish_typing(&mut self, peer: UserId, is_typing: bool) -> Vec<ClientAction> {
        let event = PushEvent::Typing(TypingPayload { recipient_id: peer, is_typing });
        match self.connection.publish(event) {
            Ok(actions) => self.convert(actions),
            Err(err) => {
                tracing::debug!(%err, is_typing, "typing indicator not sent");
                Vec::new()
            },
        }
    }

    fn convert(&mut self, actions: Vec<ConnectionAction>) -> Vec<ClientAction> {
        let mut out = Vec::new();
        for action in actions {
            match action {
                ConnectionAction::Open { generation, identity } => {
                    out.push(ClientAction::OpenTransport { generation, identity });
                },
                ConnectionAction::Close { generation } => out.push(ClientAction::CloseTransport { generation }),
                ConnectionAction::Emit { generation, event } => out.push(ClientAction::Emit { generation, event }),
                ConnectionAction::Deliver { subscription, event } => self.deliver(subscription, event),
                ConnectionAction::DeliverError { subscription, error } => {
                    if self.is_session_subscription(subscription) {
                        out.push(ClientAction::Notify(Notice::Error(ClientError::Connection(error))));
                    }
                },
            }
        }
        out
    }

    fn deliver(&mut self, subscription: SubscriptionId, event: PushEvent) {
        let now = self.env.now();
        let received_at = self.env.wall_clock();
        if let Some(conversation) = self.conversation.as_mut().filter(|c| c.owns(subscription)) {
            conversation.handle_push(event, &mut self.ledger, now, received_at);
        } else if self.is_session_subscription(subscription) {
            self.presence.apply(&event);
        } else {
            tracing::debug!(?subscription, event = event.name(), "delivery for a released subscription");
        }
    }

    fn is_session_subscription(&self, id: SubscriptionId) -> bool {
        self.session_subscriptions.iter().any(|s| s.id() == id)
    }

    fn open_conversation(
        &mut self,
        operation: &'static str,
    ) -> Result<&mut ConversationSync<E::Instant>, ClientError> {
        self.conversation.as_mut().ok_or(ClientError::InvalidState { operation, state: "no conversation is open" })
    }

    fn request_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request);
        self.next_request += 1;
        id
    }
}

fn unexpected(call: &str, response: &ApiResponse) -> ClientError {
    tracing::warn!(call, ?response, "unexpected response");
    ClientError::Network(format!("unexpected response to {call}"))
}
