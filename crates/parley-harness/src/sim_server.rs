//! Scripted server for simulation.
//!
//! `SimServer` plays both collaborators of the client: the persistence API
//! (accounts, tokens, stored messages) and the push relay (connections,
//! presence, message and typing fan-out). State lives in memory and every
//! timestamp comes from the shared [`SimEnv`], so runs are reproducible.
//!
//! Tests reach into it to seed accounts, revoke tokens, cut connections or
//! take the persistence API offline.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use parley_client::{ApiError, Environment};
use parley_proto::{
    ApiRequest, ApiResponse, AuthResponse, HistoryPage, LocalId, PresencePayload, ProfileUpdate, PushEvent,
    ReceiveMessagePayload, SendMessagePayload, SentMessage, ServerMessageId, SignupForm, User, UserId, UserRef,
    UserStatus, UserTypingPayload, WireMessage,
};

use crate::SimEnv;

/// Server behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Deliver relayed messages back to the sender's own connections.
    pub echo_to_sender: bool,
    /// Carry `messageId`/`clientMessageId` on delivered messages. Without
    /// them recipients fall back to content matching.
    pub echo_idempotency_keys: bool,
    /// Push a message to both parties as soon as it is persisted, before
    /// the sender's client relays it.
    pub push_on_persist: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { echo_to_sender: true, echo_idempotency_keys: true, push_on_persist: false }
    }
}

struct Account {
    password: String,
    user: User,
}

struct Link {
    user: Option<UserId>,
    open: bool,
    outbox: VecDeque<PushEvent>,
}

/// In-memory persistence API and push relay.
pub struct SimServer {
    env: SimEnv,
    config: ServerConfig,
    accounts: BTreeMap<String, Account>,
    tokens: HashMap<String, UserId>,
    messages: Vec<WireMessage>,
    /// (sender, clientMessageId) → stored id
    idempotency: HashMap<(UserId, LocalId), ServerMessageId>,
    links: BTreeMap<u64, Link>,
    next_link: u64,
    next_id: u64,
    api_offline: bool,
    refuse_connections: bool,
}

/// Server shared by every simulated client.
pub type SharedSimServer = Arc<Mutex<SimServer>>;

/// Wrap a fresh server for sharing between drivers.
pub fn create_shared_server(env: SimEnv, config: ServerConfig) -> SharedSimServer {
    Arc::new(Mutex::new(SimServer::new(env, config)))
}

impl SimServer {
    /// Empty server.
    pub fn new(env: SimEnv, config: ServerConfig) -> Self {
        Self {
            env,
            config,
            accounts: BTreeMap::new(),
            tokens: HashMap::new(),
            messages: Vec::new(),
            idempotency: HashMap::new(),
            links: BTreeMap::new(),
            next_link: 1,
            next_id: 1,
            api_offline: false,
            refuse_connections: false,
        }
    }

    /// Create an account. The id is the username.
    pub fn register(&mut self, username: &str, email: &str, password: &str) -> User {
        let user = User {
            id: UserId::new(username),
            username: username.to_string(),
            email: Some(email.to_string()),
            status: UserStatus::Offline,
        };
        self.accounts.insert(email.to_string(), Account { password: password.to_string(), user: user.clone() });
        user
    }

    /// Issue a token for an existing account, as a previous login would
    /// have.
    pub fn issue_token(&mut self, user: &UserId) -> String {
        let token = format!("token-{}-{}", user, self.next_id);
        self.next_id += 1;
        self.tokens.insert(token.clone(), user.clone());
        token
    }

    /// Invalidate a token, as expiry would.
    pub fn revoke_token(&mut self, token: &str) {
        self.tokens.remove(token);
    }

    /// Make every persistence call fail with a network error.
    pub fn set_api_offline(&mut self, offline: bool) {
        self.api_offline = offline;
    }

    /// Refuse new push connections.
    pub fn set_refuse_connections(&mut self, refuse: bool) {
        self.refuse_connections = refuse;
    }

    /// Change behavior switches.
    pub fn set_config(&mut self, config: ServerConfig) {
        self.config = config;
    }

    /// Store a message directly, as if sent before the simulation started.
    pub fn seed_message(&mut self, sender: &UserId, recipient: &UserId, content: &str) -> ServerMessageId {
        let id = ServerMessageId::new(format!("m{}", self.next_id));
        self.next_id += 1;
        self.messages.push(WireMessage {
            id: id.clone(),
            sender: UserRef::Id(sender.clone()),
            recipient: UserRef::Id(recipient.clone()),
            content: content.to_string(),
            created_at: self.env.wall_clock(),
            client_message_id: None,
        });
        id
    }

    /// Every stored message, in persistence order.
    pub fn messages(&self) -> &[WireMessage] {
        &self.messages
    }

    /// Stored messages exchanged between `a` and `b`, oldest first.
    pub fn conversation(&self, a: &UserId, b: &UserId) -> Vec<&WireMessage> {
        let mut found: Vec<_> = self.messages.iter().filter(|m| between(m, a, b)).collect();
        found.sort_by_key(|m| m.created_at);
        found
    }

    /// Open push connections bound to `user`.
    pub fn open_connections(&self, user: &UserId) -> usize {
        self.links.values().filter(|l| l.open && l.user.as_ref() == Some(user)).count()
    }

    // Persistence API

    /// Execute one persistence call.
    ///
    /// # Errors
    ///
    /// `Network` while offline, `Unauthorized` for a missing or unknown
    /// token, `Rejected` for refused input.
    pub fn handle_request(&mut self, request: &ApiRequest, token: Option<&str>) -> Result<ApiResponse, ApiError> {
        if self.api_offline {
            return Err(ApiError::Network("connection refused".to_string()));
        }

        match request {
            ApiRequest::Login(credentials) => {
                let user = self
                    .accounts
                    .get(&credentials.email)
                    .filter(|account| account.password == credentials.password)
                    .map(|account| account.user.clone())
                    .ok_or_else(|| rejected(400, "Invalid email or password"))?;
                Ok(self.authenticated(user))
            },
            ApiRequest::Signup(form) => self.signup(form),
            ApiRequest::FetchProfile => {
                let me = self.authorize(token)?;
                self.user(&me).map(ApiResponse::Profile)
            },
            ApiRequest::Logout => {
                self.authorize(token)?;
                if let Some(token) = token {
                    self.tokens.remove(token);
                }
                Ok(ApiResponse::LoggedOut)
            },
            ApiRequest::UpdateProfile(update) => {
                let me = self.authorize(token)?;
                self.update_profile(&me, update).map(ApiResponse::Profile)
            },
            ApiRequest::History { peer, page, limit } => {
                let me = self.authorize(token)?;
                Ok(ApiResponse::History(self.history(&me, peer, *page, *limit)))
            },
            ApiRequest::SendMessage { recipient, content, client_message_id } => {
                let me = self.authorize(token)?;
                Ok(ApiResponse::MessageSent(self.persist(me, recipient.clone(), content, *client_message_id)))
            },
        }
    }

    fn authorize(&self, token: Option<&str>) -> Result<UserId, ApiError> {
        token
            .and_then(|token| self.tokens.get(token))
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Invalid or expired token".to_string()))
    }

    fn authenticated(&mut self, user: User) -> ApiResponse {
        let token = self.issue_token(&user.id);
        ApiResponse::Authenticated(AuthResponse { user, token })
    }

    fn signup(&mut self, form: &SignupForm) -> Result<ApiResponse, ApiError> {
        let taken = self.accounts.contains_key(&form.email)
            || self.accounts.values().any(|account| account.user.username == form.username);
        if taken {
            return Err(rejected(400, "User already exists"));
        }
        let user = self.register(&form.username, &form.email, &form.password);
        Ok(self.authenticated(user))
    }

    fn user(&self, id: &UserId) -> Result<User, ApiError> {
        self.accounts
            .values()
            .find(|account| account.user.id == *id)
            .map(|account| account.user.clone())
            .ok_or_else(|| rejected(404, "User not found"))
    }

    fn update_profile(&mut self, id: &UserId, update: &ProfileUpdate) -> Result<User, ApiError> {
        let account = self
            .accounts
            .values_mut()
            .find(|account| account.user.id == *id)
            .ok_or_else(|| rejected(404, "User not found"))?;
        if let Some(username) = &update.username {
            account.user.username.clone_from(username);
        }
        if let Some(status) = update.status {
            account.user.status = status;
        }
        Ok(account.user.clone())
    }

    /// Pages count back from the newest message; page 1 is the most recent.
    fn history(&self, me: &UserId, peer: &UserId, page: u32, limit: u32) -> HistoryPage {
        let all = self.conversation(me, peer);
        let limit = limit.max(1) as usize;
        let end = all.len().saturating_sub((page.max(1) as usize - 1) * limit);
        let start = end.saturating_sub(limit);
        HistoryPage {
            peer: peer.clone(),
            page,
            messages: all[start..end].iter().map(|m| (*m).clone()).collect(),
            has_more: start > 0,
        }
    }

    fn persist(&mut self, sender: UserId, recipient: UserId, content: &str, key: LocalId) -> SentMessage {
        if let Some(id) = self.idempotency.get(&(sender.clone(), key)) {
            let created_at = self.messages.iter().find(|m| m.id == *id).map(|m| m.created_at);
            tracing::debug!(%sender, %key, %id, "replayed send");
            return SentMessage { id: id.clone(), created_at };
        }

        let id = ServerMessageId::new(format!("m{}", self.next_id));
        self.next_id += 1;
        let message = WireMessage {
            id: id.clone(),
            sender: UserRef::Id(sender.clone()),
            recipient: UserRef::Id(recipient.clone()),
            content: content.to_string(),
            created_at: self.env.wall_clock(),
            client_message_id: Some(key),
        };
        let created_at = message.created_at;
        self.messages.push(message);
        self.idempotency.insert((sender.clone(), key), id.clone());

        if self.config.push_on_persist {
            self.fan_out(&SendMessagePayload {
                recipient_id: recipient,
                message: content.to_string(),
                sender_id: sender,
                message_id: Some(id.clone()),
                client_message_id: Some(key),
            });
        }
        SentMessage { id, created_at: Some(created_at) }
    }

    // Push relay

    /// Accept a push connection. `None` while refusing connections.
    pub fn connect(&mut self) -> Option<u64> {
        if self.refuse_connections {
            return None;
        }
        let link = self.next_link;
        self.next_link += 1;
        self.links.insert(link, Link { user: None, open: true, outbox: VecDeque::new() });
        Some(link)
    }

    /// Whether `link` is still open.
    pub fn is_open(&self, link: u64) -> bool {
        self.links.get(&link).is_some_and(|l| l.open)
    }

    /// Close `link` from either side.
    pub fn disconnect(&mut self, link: u64) {
        let Some(state) = self.links.get_mut(&link) else {
            return;
        };
        if !state.open {
            return;
        }
        state.open = false;
        state.outbox.clear();
        let user = state.user.clone();
        self.links.retain(|id, l| *id == link || l.open);

        if let Some(user) = user {
            if self.open_connections(&user) == 0 {
                self.broadcast(&user, &PushEvent::UserOffline(PresencePayload { user_id: user.clone() }));
            }
        }
    }

    /// Cut every connection of `user`, as a network partition would.
    pub fn drop_connections(&mut self, user: &UserId) {
        let links: Vec<_> =
            self.links.iter().filter(|(_, l)| l.open && l.user.as_ref() == Some(user)).map(|(id, _)| *id).collect();
        for link in links {
            self.disconnect(link);
        }
    }

    /// Next event queued for delivery on `link`.
    pub fn poll(&mut self, link: u64) -> Option<PushEvent> {
        self.links.get_mut(&link).filter(|l| l.open).and_then(|l| l.outbox.pop_front())
    }

    /// Whether events are waiting on `link`.
    pub fn has_queued(&self, link: u64) -> bool {
        self.links.get(&link).is_some_and(|l| l.open && !l.outbox.is_empty())
    }

    /// Handle an event written by the client on `link`.
    pub fn receive(&mut self, link: u64, event: PushEvent) {
        if !self.is_open(link) {
            tracing::warn!(link, "write on closed link");
            return;
        }

        match event {
            PushEvent::Join(user) => {
                let first = self.open_connections(&user) == 0;
                if let Some(state) = self.links.get_mut(&link) {
                    state.user = Some(user.clone());
                }
                if first {
                    self.broadcast(&user, &PushEvent::UserOnline(PresencePayload { user_id: user.clone() }));
                }
            },
            PushEvent::SendMessage(payload) => {
                if self.bound(link).as_ref() != Some(&payload.sender_id) {
                    tracing::warn!(link, sender = %payload.sender_id, "relay from unbound link");
                    return;
                }
                self.fan_out(&payload);
            },
            PushEvent::Typing(payload) => {
                let Some(user_id) = self.bound(link) else {
                    return;
                };
                let event = PushEvent::UserTyping(UserTypingPayload { user_id, is_typing: payload.is_typing });
                self.deliver(&payload.recipient_id, &event);
            },
            PushEvent::ReceiveMessage(_)
            | PushEvent::UserTyping(_)
            | PushEvent::UserOnline(_)
            | PushEvent::UserOffline(_) => {
                tracing::warn!(link, event = event.name(), "server-only event written by client");
            },
        }
    }

    fn bound(&self, link: u64) -> Option<UserId> {
        self.links.get(&link).and_then(|l| l.user.clone())
    }

    fn fan_out(&mut self, payload: &SendMessagePayload) {
        let stored = payload.message_id.as_ref().and_then(|id| self.messages.iter().find(|m| m.id == *id));
        let timestamp = stored.map_or_else(|| self.env.wall_clock(), |m| m.created_at);
        let keys = self.config.echo_idempotency_keys;

        let event = PushEvent::ReceiveMessage(ReceiveMessagePayload {
            sender_id: payload.sender_id.clone(),
            message: payload.message.clone(),
            timestamp: Some(timestamp),
            message_id: payload.message_id.clone().filter(|_| keys),
            client_message_id: payload.client_message_id.filter(|_| keys),
        });
        self.deliver(&payload.recipient_id, &event);
        if self.config.echo_to_sender && payload.sender_id != payload.recipient_id {
            self.deliver(&payload.sender_id, &event);
        }
    }

    fn deliver(&mut self, user: &UserId, event: &PushEvent) {
        for link in self.links.values_mut().filter(|l| l.open && l.user.as_ref() == Some(user)) {
            link.outbox.push_back(event.clone());
        }
    }

    fn broadcast(&mut self, subject: &UserId, event: &PushEvent) {
        for link in self.links.values_mut().filter(|l| l.open && l.user.as_ref().is_some_and(|u| u != subject)) {
            link.outbox.push_back(event.clone());
        }
    }
}

fn rejected(status: u16, message: &str) -> ApiError {
    ApiError::Rejected { status, message: message.to_string() }
}

fn between(message: &WireMessage, a: &UserId, b: &UserId) -> bool {
    let (from, to) = (message.sender.id(), message.recipient.id());
    (from == a && to == b) || (from == b && to == a)
}

#[cfg(test)]
mod tests {
    use parley_proto::{Credentials, TypingPayload};

    use super::*;

    fn server() -> SimServer {
        let mut server = SimServer::new(SimEnv::new(), ServerConfig::default());
        server.register("alice", "alice@example.com", "secret");
        server.register("bob", "bob@example.com", "secret");
        server
    }

    fn login(server: &mut SimServer, email: &str) -> String {
        let request = ApiRequest::Login(Credentials { email: email.into(), password: "secret".into() });
        match server.handle_request(&request, None) {
            Ok(ApiResponse::Authenticated(auth)) => auth.token,
            other => panic!("login failed: {other:?}"),
        }
    }

    fn send(server: &mut SimServer, token: &str, content: &str, key: u64) -> SentMessage {
        let request = ApiRequest::SendMessage {
            recipient: UserId::new("bob"),
            content: content.into(),
            client_message_id: LocalId(key),
        };
        match server.handle_request(&request, Some(token)) {
            Ok(ApiResponse::MessageSent(sent)) => sent,
            other => panic!("send failed: {other:?}"),
        }
    }

    fn joined(server: &mut SimServer, user: &str) -> u64 {
        let link = server.connect().unwrap();
        server.receive(link, PushEvent::Join(UserId::new(user)));
        link
    }

    #[test]
    fn wrong_password_is_rejected() {
        let mut server = server();
        let request = ApiRequest::Login(Credentials { email: "alice@example.com".into(), password: "nope".into() });
        assert!(matches!(server.handle_request(&request, None), Err(ApiError::Rejected { status: 400, .. })));
    }

    #[test]
    fn revoked_token_is_unauthorized() {
        let mut server = server();
        let token = login(&mut server, "alice@example.com");
        server.revoke_token(&token);

        let result = server.handle_request(&ApiRequest::FetchProfile, Some(&token));
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn replayed_send_returns_the_stored_id() {
        let mut server = server();
        let token = login(&mut server, "alice@example.com");

        let first = send(&mut server, &token, "hi", 7);
        let again = send(&mut server, &token, "hi", 7);

        assert_eq!(first.id, again.id);
        assert_eq!(server.messages().len(), 1);
    }

    #[test]
    fn history_pages_count_back_from_newest() {
        let mut server = server();
        let token = login(&mut server, "alice@example.com");
        for n in 0..5 {
            server.env.advance(std::time::Duration::from_secs(1));
            send(&mut server, &token, &format!("m{n}"), n);
        }

        let request = ApiRequest::History { peer: UserId::new("bob"), page: 1, limit: 2 };
        let Ok(ApiResponse::History(page)) = server.handle_request(&request, Some(&token)) else {
            panic!("history failed");
        };
        let contents: Vec<_> = page.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m3", "m4"]);
        assert!(page.has_more);

        let request = ApiRequest::History { peer: UserId::new("bob"), page: 3, limit: 2 };
        let Ok(ApiResponse::History(page)) = server.handle_request(&request, Some(&token)) else {
            panic!("history failed");
        };
        assert_eq!(page.messages.len(), 1);
        assert!(!page.has_more);
    }

    #[test]
    fn relay_reaches_recipient_and_echoes_to_sender() {
        let mut server = server();
        let alice = joined(&mut server, "alice");
        let bob = joined(&mut server, "bob");
        // alice saw bob come online
        assert!(matches!(server.poll(alice), Some(PushEvent::UserOnline(_))));

        server.receive(
            alice,
            PushEvent::SendMessage(SendMessagePayload {
                recipient_id: UserId::new("bob"),
                message: "hi".into(),
                sender_id: UserId::new("alice"),
                message_id: None,
                client_message_id: Some(LocalId(1)),
            }),
        );

        assert!(matches!(server.poll(bob), Some(PushEvent::ReceiveMessage(p)) if p.message == "hi"));
        assert!(matches!(server.poll(alice), Some(PushEvent::ReceiveMessage(p)) if p.client_message_id == Some(LocalId(1))));
    }

    #[test]
    fn typing_is_addressed_to_the_recipient() {
        let mut server = server();
        let alice = joined(&mut server, "alice");
        let bob = joined(&mut server, "bob");
        server.poll(alice);

        server.receive(alice, PushEvent::Typing(TypingPayload { recipient_id: UserId::new("bob"), is_typing: true }));

        assert!(matches!(server.poll(bob), Some(PushEvent::UserTyping(p)) if p.user_id.as_str() == "alice"));
        assert_eq!(server.poll(alice), None);
    }

    #[test]
    fn last_connection_closing_announces_offline() {
        let mut server = server();
        let alice = joined(&mut server, "alice");
        joined(&mut server, "bob");
        server.poll(alice);

        server.drop_connections(&UserId::new("bob"));

        assert_eq!(server.open_connections(&UserId::new("bob")), 0);
        assert!(matches!(server.poll(alice), Some(PushEvent::UserOffline(p)) if p.user_id.as_str() == "bob"));
    }
}
