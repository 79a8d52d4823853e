//! Push connection state machine.
//!
//! Owns the single live push connection for the authenticated identity:
//! binding, the `join` handshake, reconnect with backoff, the bounded outbound
//! queue, and scoped subscriptions. Uses the action pattern: methods take time
//! as input and return actions for the driver to execute.
//!
//! # State Machine
//!
//! ```text
//!                 connect(id)            TransportOpened
//! ┌──────────────┐──────────>┌────────────┐──────────────>┌───────────┐
//! │ Disconnected │           │ Connecting │               │ Connected │
//! └──────────────┘<──────────└────────────┘<──┐           └───────────┘
//!        ^        disconnect()      │         │ tick (due)      │
//!        │                          │ closed  │                 │ closed
//!        │ attempts exhausted       ↓         │                 ↓
//!        │                      ┌──────────────┐<────────────────┘
//!        └──────────────────────│ Reconnecting │
//!                               └──────────────┘
//! ```
//!
//! # Invariants
//!
//! - At most one transport generation is live. Opening a new one always
//!   follows a close of the previous one.
//! - Binding a different identity tears down the old transport, discards
//!   every subscription and drops the outbound queue first.
//! - Events tagged with a stale generation never reach a subscriber.

use std::{
    collections::VecDeque,
    ops::{Add, Sub},
    time::Duration,
};

use parley_proto::{EventKind, Generation, PushEvent, UserId};

use crate::{backoff::ReconnectPolicy, error::ConnectionError};

/// Default capacity of the outbound queue used during reconnects.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a transport and report `TransportOpened` for this generation.
    Open {
        /// Generation the driver must tag transport events with
        generation: Generation,
        /// Identity the transport is bound to
        identity: UserId,
    },

    /// Close the transport of this generation.
    Close {
        /// Generation to close
        generation: Generation,
    },

    /// Write an event on the live transport.
    Emit {
        /// Generation of the live transport
        generation: Generation,
        /// Event to write
        event: PushEvent,
    },

    /// Hand an inbound event to a subscriber.
    Deliver {
        /// Subscription the event matched
        subscription: SubscriptionId,
        /// The event
        event: PushEvent,
    },

    /// Hand a connection error to a subscriber of [`Topic::ConnectionErrors`].
    DeliverError {
        /// Subscription of the error stream
        subscription: SubscriptionId,
        /// The error
        error: ConnectionError,
    },
}

/// Observable connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No transport. An identity may still be bound after retries ran out.
    Disconnected,
    /// Transport requested, waiting for the driver to report it open.
    Connecting,
    /// Transport open and `join` sent.
    Connected,
    /// Transport lost, waiting to retry.
    Reconnecting {
        /// 0-based number of the next attempt
        attempt: u32,
    },
}

/// What a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Inbound push events of one kind.
    Event(EventKind),
    /// Transport errors.
    ConnectionErrors,
}

/// Identifies a live subscription in delivery actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Handle returned by [`ConnectionManager::subscribe`].
///
/// Not `Clone`: releasing it through [`ConnectionManager::unsubscribe`] is the
/// only way to detach the listener, so exactly one owner decides when.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "a subscription stays registered until passed to unsubscribe"]
pub struct Subscription {
    id: SubscriptionId,
}

impl Subscription {
    /// Id used in [`ConnectionAction::Deliver`].
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

#[derive(Debug, Clone)]
struct Listener {
    id: SubscriptionId,
    topic: Topic,
    filter: Option<UserId>,
}

impl Listener {
    fn matches(&self, kind: EventKind, subject: Option<&UserId>) -> bool {
        if self.topic != Topic::Event(kind) {
            return false;
        }
        match &self.filter {
            Some(peer) => subject == Some(peer),
            None => true,
        }
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Reconnect backoff.
    pub reconnect: ReconnectPolicy,
    /// Outbound queue capacity during reconnects.
    pub queue_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { reconnect: ReconnectPolicy::default(), queue_capacity: DEFAULT_QUEUE_CAPACITY }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase<I> {
    Disconnected,
    Connecting { reconnect: bool },
    Connected,
    Reconnecting { attempt: u32, retry_at: I },
}

/// Push connection state machine.
///
/// Pure: no I/O, no environment. Time and entropy are passed to the methods
/// that need them. Generic over `I` so simulation can drive it with virtual
/// time.
#[derive(Debug, Clone)]
pub struct ConnectionManager<I>
where
    I: Copy + Ord + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    config: ConnectionConfig,
    phase: Phase<I>,
    identity: Option<UserId>,
    generation: Generation,
    failures: u32,
    listeners: Vec<Listener>,
    next_subscription: u64,
    queue: VecDeque<PushEvent>,
}

impl<I> ConnectionManager<I>
where
    I: Copy + Ord + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    /// Create a manager with nothing bound.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            phase: Phase::Disconnected,
            identity: None,
            generation: Generation::default(),
            failures: 0,
            listeners: Vec::new(),
            next_subscription: 0,
            queue: VecDeque::new(),
        }
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        match self.phase {
            Phase::Disconnected => ConnectionStatus::Disconnected,
            Phase::Connecting { .. } => ConnectionStatus::Connecting,
            Phase::Connected => ConnectionStatus::Connected,
            Phase::Reconnecting { attempt, .. } => ConnectionStatus::Reconnecting { attempt },
        }
    }

    /// Identity the connection is bound to. `None` if unbound.
    pub fn identity(&self) -> Option<&UserId> {
        self.identity.as_ref()
    }

    /// Generation of the most recently opened transport.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Whether a transport of the current generation may be open.
    pub fn has_transport(&self) -> bool {
        matches!(self.phase, Phase::Connecting { .. } | Phase::Connected)
    }

    /// Number of registered subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.listeners.len()
    }

    /// Whether the subscription is still registered.
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.listeners.iter().any(|l| l.id == id)
    }

    /// Number of events waiting for a reconnect.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Next instant at which [`Self::tick`] has work. `None` if idle.
    pub fn next_deadline(&self) -> Option<I> {
        match self.phase {
            Phase::Reconnecting { retry_at, .. } => Some(retry_at),
            _ => None,
        }
    }

    /// Bind `identity` and open a transport.
    ///
    /// Idempotent for the identity already bound while a connection is live
    /// or being retried. A different identity is torn down first.
    pub fn connect(&mut self, identity: UserId) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if self.identity.as_ref() == Some(&identity) {
            if self.phase != Phase::Disconnected {
                tracing::debug!(%identity, status = ?self.status(), "connect ignored, already bound");
                return actions;
            }
        } else if self.identity.is_some() {
            tracing::info!(%identity, "rebinding connection to a new identity");
            actions.extend(self.disconnect());
        }

        self.identity = Some(identity);
        self.failures = 0;
        actions.extend(self.open(false));
        actions
    }

    /// Tear down the transport, discard every subscription and unbind.
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if self.has_transport() {
            actions.push(ConnectionAction::Close { generation: self.generation });
        }

        if !self.queue.is_empty() {
            tracing::warn!(dropped = self.queue.len(), "dropping queued events on disconnect");
        }

        self.phase = Phase::Disconnected;
        self.identity = None;
        self.failures = 0;
        self.listeners.clear();
        self.queue.clear();
        actions
    }

    /// Restart the reconnect cycle after retries ran out.
    ///
    /// No-op unless an identity is bound and the connection is
    /// [`ConnectionStatus::Disconnected`].
    pub fn reconnect(&mut self) -> Vec<ConnectionAction> {
        if self.identity.is_none() || self.phase != Phase::Disconnected {
            return Vec::new();
        }
        self.failures = 0;
        self.open(true)
    }

    /// The driver reports the transport of `generation` open.
    ///
    /// Sends `join` first, then flushes the outbound queue in order. A stale
    /// generation is closed again.
    pub fn handle_opened(&mut self, generation: Generation) -> Vec<ConnectionAction> {
        let expected = matches!(self.phase, Phase::Connecting { .. });
        if generation != self.generation || !expected {
            tracing::warn!(%generation, current = %self.generation, "closing stale transport");
            return vec![ConnectionAction::Close { generation }];
        }

        let Some(identity) = self.identity.clone() else {
            return vec![ConnectionAction::Close { generation }];
        };

        self.phase = Phase::Connected;
        self.failures = 0;
        tracing::debug!(%generation, %identity, flushed = self.queue.len(), "connected");

        let mut actions = vec![ConnectionAction::Emit { generation, event: PushEvent::Join(identity) }];
        actions.extend(
            self.queue.drain(..).map(|event| ConnectionAction::Emit { generation, event }),
        );
        actions
    }

    /// The driver reports the transport of `generation` closed or failed.
    ///
    /// Schedules a retry at `now + delay` (jitter drawn from `entropy`), or
    /// gives up once the policy's attempts are spent.
    pub fn handle_closed(
        &mut self,
        generation: Generation,
        reason: &str,
        now: I,
        entropy: u64,
    ) -> Vec<ConnectionAction> {
        if generation != self.generation || !self.has_transport() {
            tracing::debug!(%generation, current = %self.generation, "ignoring stale close");
            return Vec::new();
        }

        tracing::warn!(%generation, reason, "push transport closed");
        let mut actions = self.report(ConnectionError::TransportClosed {
            generation,
            reason: reason.to_string(),
        });

        if self.config.reconnect.allows(self.failures) {
            let attempt = self.failures;
            let delay = self.config.reconnect.delay(attempt, entropy);
            self.failures += 1;
            self.phase = Phase::Reconnecting { attempt, retry_at: now + delay };
            tracing::debug!(attempt, ?delay, "reconnect scheduled");
        } else {
            let dropped = self.queue.len();
            self.queue.clear();
            self.phase = Phase::Disconnected;
            actions.extend(
                self.report(ConnectionError::ReconnectExhausted { attempts: self.failures, dropped }),
            );
        }
        actions
    }

    /// Process periodic maintenance: open the next attempt when it is due.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        match self.phase {
            Phase::Reconnecting { retry_at, .. } if now >= retry_at => self.open(true),
            _ => Vec::new(),
        }
    }

    /// Publish an outbound event.
    ///
    /// Connected: emitted immediately. During a reconnect, queueable events
    /// wait in the bounded queue. Anything else fails fast.
    pub fn publish(&mut self, event: PushEvent) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let name = event.name();
        match self.phase {
            Phase::Connected => {
                Ok(vec![ConnectionAction::Emit { generation: self.generation, event }])
            },
            Phase::Reconnecting { .. } | Phase::Connecting { reconnect: true }
                if event.is_queueable() =>
            {
                if self.queue.len() >= self.config.queue_capacity {
                    return Err(ConnectionError::QueueFull {
                        capacity: self.config.queue_capacity,
                        event: name,
                    });
                }
                self.queue.push_back(event);
                tracing::debug!(queued = self.queue.len(), "queued {name} until reconnect");
                Ok(Vec::new())
            },
            _ => Err(ConnectionError::NotConnected { status: self.status(), event: name }),
        }
    }

    /// Register a listener. `filter` restricts delivery to events about
    /// one user.
    pub fn subscribe(&mut self, topic: Topic, filter: Option<UserId>) -> Subscription {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push(Listener { id, topic, filter });
        Subscription { id }
    }

    /// Release a listener. Returns `false` if it was already discarded by a
    /// disconnect.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.id != subscription.id);
        before != self.listeners.len()
    }

    /// Route an inbound event to matching subscriptions.
    pub fn handle_inbound(
        &mut self,
        generation: Generation,
        event: PushEvent,
    ) -> Vec<ConnectionAction> {
        if generation != self.generation || self.phase != Phase::Connected {
            tracing::warn!(%generation, event = event.name(), "dropping event from stale transport");
            return Vec::new();
        }

        let Some(kind) = event.kind() else {
            tracing::warn!(event = event.name(), "server sent an outbound-only event");
            return Vec::new();
        };

        let subject = event.subject();
        self.listeners
            .iter()
            .filter(|l| l.matches(kind, subject))
            .map(|l| ConnectionAction::Deliver { subscription: l.id, event: event.clone() })
            .collect()
    }

    fn open(&mut self, reconnect: bool) -> Vec<ConnectionAction> {
        let Some(identity) = self.identity.clone() else {
            return Vec::new();
        };

        self.generation = self.generation.next();
        self.phase = Phase::Connecting { reconnect };
        tracing::debug!(generation = %self.generation, %identity, reconnect, "opening transport");
        vec![ConnectionAction::Open { generation: self.generation, identity }]
    }

    fn report(&self, error: ConnectionError) -> Vec<ConnectionAction> {
        self.listeners
            .iter()
            .filter(|l| l.topic == Topic::ConnectionErrors)
            .map(|l| ConnectionAction::DeliverError { subscription: l.id, error: error.clone() })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use parley_proto::{ReceiveMessagePayload, SendMessagePayload, TypingPayload};

    use super::*;

    fn manager() -> ConnectionManager<Instant> {
        ConnectionManager::new(ConnectionConfig::default())
    }

    fn connected(identity: &str) -> ConnectionManager<Instant> {
        let mut conn = manager();
        let _ = conn.connect(UserId::new(identity));
        let _ = conn.handle_opened(conn.generation());
        conn
    }

    fn message_from(sender: &str) -> PushEvent {
        PushEvent::ReceiveMessage(ReceiveMessagePayload {
            sender_id: UserId::new(sender),
            message: "hi".into(),
            timestamp: None,
            message_id: None,
            client_message_id: None,
        })
    }

    fn relay(text: &str) -> PushEvent {
        PushEvent::SendMessage(SendMessagePayload {
            recipient_id: UserId::new("p42"),
            message: text.into(),
            sender_id: UserId::new("me"),
            message_id: None,
            client_message_id: None,
        })
    }

    #[test]
    fn connect_opens_then_joins() {
        let mut conn = manager();
        let actions = conn.connect(UserId::new("me"));
        assert!(matches!(actions.as_slice(), [ConnectionAction::Open { generation: Generation(1), .. }]));
        assert_eq!(conn.status(), ConnectionStatus::Connecting);

        let actions = conn.handle_opened(Generation(1));
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::Emit { event: PushEvent::Join(id), .. }] if id.as_str() == "me"
        ));
        assert_eq!(conn.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn connect_same_identity_is_idempotent() {
        let mut conn = connected("me");
        assert!(conn.connect(UserId::new("me")).is_empty());
        assert_eq!(conn.generation(), Generation(1));
    }

    #[test]
    fn connect_other_identity_closes_first() {
        let mut conn = connected("alice");
        let _sub = conn.subscribe(Topic::Event(EventKind::ReceiveMessage), None);

        let actions = conn.connect(UserId::new("bob"));
        assert!(matches!(actions.as_slice(), [
            ConnectionAction::Close { generation: Generation(1) },
            ConnectionAction::Open { generation: Generation(2), .. }
        ]));
        assert_eq!(conn.subscription_count(), 0);
    }

    #[test]
    fn stale_open_is_closed() {
        let mut conn = manager();
        let _ = conn.connect(UserId::new("alice"));
        let _ = conn.connect(UserId::new("bob"));

        let actions = conn.handle_opened(Generation(1));
        assert_eq!(actions, vec![ConnectionAction::Close { generation: Generation(1) }]);
        assert_eq!(conn.status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn disconnect_discards_listeners() {
        let mut conn = connected("me");
        let sub = conn.subscribe(Topic::Event(EventKind::ReceiveMessage), None);

        let actions = conn.disconnect();
        assert_eq!(actions, vec![ConnectionAction::Close { generation: Generation(1) }]);
        assert!(!conn.unsubscribe(sub));
        assert!(conn.identity().is_none());
    }

    #[test]
    fn publish_fails_fast_when_disconnected() {
        let mut conn = manager();
        let err = conn.publish(relay("hello")).unwrap_err();
        assert!(matches!(err, ConnectionError::NotConnected { event: "send_message", .. }));
    }

    #[test]
    fn inbound_is_filtered_by_peer() {
        let mut conn = connected("me");
        let a = conn.subscribe(Topic::Event(EventKind::ReceiveMessage), Some(UserId::new("a")));
        let b = conn.subscribe(Topic::Event(EventKind::ReceiveMessage), Some(UserId::new("b")));

        let actions = conn.handle_inbound(Generation(1), message_from("a"));
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::Deliver { subscription, .. }] if *subscription == a.id()
        ));

        assert!(conn.unsubscribe(b));
        assert!(conn.handle_inbound(Generation(1), message_from("b")).is_empty());
    }

    #[test]
    fn close_schedules_reconnect_and_reports() {
        let mut conn = connected("me");
        let errors = conn.subscribe(Topic::ConnectionErrors, None);
        let t0 = Instant::now();

        let actions = conn.handle_closed(Generation(1), "reset", t0, 0);
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::DeliverError { subscription, error: ConnectionError::TransportClosed { .. } }]
                if *subscription == errors.id()
        ));
        assert_eq!(conn.status(), ConnectionStatus::Reconnecting { attempt: 0 });

        assert!(conn.tick(t0 + Duration::from_millis(100)).is_empty());
        let actions = conn.tick(t0 + Duration::from_millis(500));
        assert!(matches!(actions.as_slice(), [ConnectionAction::Open { generation: Generation(2), .. }]));
    }

    #[test]
    fn queue_flushes_after_join() {
        let mut conn = connected("me");
        let t0 = Instant::now();
        let _ = conn.handle_closed(Generation(1), "reset", t0, 0);

        assert!(conn.publish(relay("one")).unwrap().is_empty());
        assert!(conn.publish(relay("two")).unwrap().is_empty());
        assert_eq!(conn.queued(), 2);

        let _ = conn.tick(t0 + Duration::from_secs(1));
        let actions = conn.handle_opened(Generation(2));

        let names: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                ConnectionAction::Emit { event, .. } => Some(event.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec![PushEvent::Join(UserId::new("me")), relay("one"), relay("two")]);
        assert_eq!(conn.queued(), 0);
    }

    #[test]
    fn typing_is_not_queued() {
        let mut conn = connected("me");
        let _ = conn.handle_closed(Generation(1), "reset", Instant::now(), 0);

        let typing = PushEvent::Typing(TypingPayload { recipient_id: UserId::new("p"), is_typing: true });
        assert!(matches!(conn.publish(typing), Err(ConnectionError::NotConnected { .. })));
    }

    #[test]
    fn queue_is_bounded() {
        let config = ConnectionConfig { queue_capacity: 1, ..Default::default() };
        let mut conn: ConnectionManager<Instant> = ConnectionManager::new(config);
        let _ = conn.connect(UserId::new("me"));
        let _ = conn.handle_opened(Generation(1));
        let _ = conn.handle_closed(Generation(1), "reset", Instant::now(), 0);

        assert!(conn.publish(relay("one")).is_ok());
        assert!(matches!(conn.publish(relay("two")), Err(ConnectionError::QueueFull { capacity: 1, .. })));
    }

    #[test]
    fn retries_are_bounded() {
        let config = ConnectionConfig {
            reconnect: ReconnectPolicy { max_attempts: 1, ..Default::default() },
            ..Default::default()
        };
        let mut conn: ConnectionManager<Instant> = ConnectionManager::new(config);
        let errors = conn.subscribe(Topic::ConnectionErrors, None);
        let _ = conn.connect(UserId::new("me"));
        let t0 = Instant::now();

        let _ = conn.handle_closed(Generation(1), "refused", t0, 0);
        let _ = conn.tick(t0 + Duration::from_secs(1));
        let actions = conn.handle_closed(Generation(2), "refused", t0 + Duration::from_secs(1), 0);

        assert!(actions.iter().any(|a| matches!(
            a,
            ConnectionAction::DeliverError { error: ConnectionError::ReconnectExhausted { .. }, .. }
        )));
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert_eq!(conn.identity().map(UserId::as_str), Some("me"));

        let actions = conn.reconnect();
        assert!(matches!(actions.as_slice(), [ConnectionAction::Open { generation: Generation(3), .. }]));
        assert!(conn.unsubscribe(errors));
    }

    #[test]
    fn stale_inbound_is_dropped() {
        let mut conn = connected("me");
        let _sub = conn.subscribe(Topic::Event(EventKind::ReceiveMessage), None);
        assert!(conn.handle_inbound(Generation(0), message_from("a")).is_empty());
    }
}
