//! Per-conversation message list.
//!
//! Messages are kept sorted by `(created_at, arrival)`, where `arrival` is a
//! counter bumped on every insert, so equal timestamps keep arrival order.
//!
//! Self-sent messages come back from the server at least once more: as the
//! persistence acknowledgement, in later history pages, and possibly as a push
//! echo. Each copy is matched against what is already stored, strongest key
//! first:
//!
//! 1. the server id against the list, and for push echoes `(sender, server id)`
//!    against the session's [`DedupeLedger`]
//! 2. the client message id against a local optimistic id
//! 3. same sender, same content, timestamps within the echo window, against an
//!    optimistic entry not yet matched. This last one is a fallback for servers
//!    that strip ids and is logged when it fires.
//!
//! The ledger outlives any one store. Echoes arrive on a subscription filtered
//! by our own id, so an echo of a message sent to a previous peer reaches
//! whichever conversation is open now.

use std::{collections::HashMap, marker::PhantomData, time::Duration};

use chrono::{DateTime, Utc};
use parley_proto::{LocalId, ReceiveMessagePayload, SentMessage, ServerMessageId, UserId, WireMessage};

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Optimistically shown, persistence call in flight.
    Pending,
    /// Persisted by the server.
    Confirmed,
    /// Persistence call failed.
    Failed,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Optimistic id, for messages sent from this client.
    pub local_id: Option<LocalId>,
    /// Canonical id, once known.
    pub server_id: Option<ServerMessageId>,
    /// Author.
    pub sender: UserId,
    /// Addressee.
    pub recipient: UserId,
    /// Message text.
    pub content: String,
    /// Server timestamp, or the local clock for optimistic entries.
    pub created_at: DateTime<Utc>,
    /// Delivery state.
    pub delivery: DeliveryState,
    arrival: u64,
    echoed: bool,
}

impl Message {
    /// Insertion counter, the tie-breaker for equal timestamps.
    pub fn arrival(&self) -> u64 {
        self.arrival
    }

    fn sort_key(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.arrival)
    }
}

/// A message arriving from the server, from history or the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Canonical id, if present.
    pub server_id: Option<ServerMessageId>,
    /// Client message id, if the server kept it.
    pub client_id: Option<LocalId>,
    /// Author.
    pub sender: UserId,
    /// Addressee.
    pub recipient: UserId,
    /// Message text.
    pub content: String,
    /// Server timestamp.
    pub created_at: DateTime<Utc>,
}

impl IncomingMessage {
    /// From a history record.
    pub fn from_wire(message: WireMessage) -> Self {
        Self {
            server_id: Some(message.id),
            client_id: message.client_message_id,
            sender: message.sender.id().clone(),
            recipient: message.recipient.id().clone(),
            content: message.content,
            created_at: message.created_at,
        }
    }

    /// From a push delivery addressed to `recipient`. A missing timestamp is
    /// replaced by `received_at`.
    pub fn from_push(payload: ReceiveMessagePayload, recipient: UserId, received_at: DateTime<Utc>) -> Self {
        Self {
            server_id: payload.message_id,
            client_id: payload.client_message_id,
            sender: payload.sender_id,
            recipient,
            content: payload.message,
            created_at: payload.timestamp.unwrap_or(received_at),
        }
    }
}

/// What happened to an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Stored as a new entry.
    Appended,
    /// Matched an existing entry and confirmed it.
    Confirmed,
    /// Already stored.
    Duplicate,
}

/// Outcome of a persistence acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The entry moved to `Confirmed`.
    Confirmed,
    /// An echo already confirmed it.
    AlreadyConfirmed,
    /// No entry with that local id.
    Unknown,
}

/// Record of recently seen self-sent server ids, each with an expiry.
///
/// One per session.
#[derive(Debug, Clone)]
pub struct DedupeLedger<I> {
    ttl: Duration,
    entries: HashMap<(UserId, ServerMessageId), I>,
}

impl<I> DedupeLedger<I>
where
    I: Copy + Ord + std::ops::Add<Duration, Output = I>,
{
    /// Empty ledger whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: HashMap::new() }
    }

    /// Remember `(sender, id)` until `now + ttl`.
    pub fn record(&mut self, sender: UserId, id: ServerMessageId, now: I) {
        self.entries.insert((sender, id), now + self.ttl);
    }

    /// Whether `(sender, id)` is recorded and not yet expired.
    pub fn contains(&self, sender: &UserId, id: &ServerMessageId, now: I) -> bool {
        self.entries.get(&(sender.clone(), id.clone())).is_some_and(|expires| now < *expires)
    }

    /// Drop expired entries.
    pub fn prune(&mut self, now: I) {
        self.entries.retain(|_, expires| now < *expires);
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Messages of one conversation, seen from `owner`.
#[derive(Debug, Clone)]
pub struct MessageStore<I> {
    owner: UserId,
    echo_window: Duration,
    messages: Vec<Message>,
    next_arrival: u64,
    _instant: PhantomData<I>,
}

impl<I> MessageStore<I>
where
    I: Copy + Ord + std::ops::Add<Duration, Output = I>,
{
    /// Empty store for messages seen by `owner`.
    pub fn new(owner: UserId, echo_window: Duration) -> Self {
        Self { owner, echo_window, messages: Vec::new(), next_arrival: 0, _instant: PhantomData }
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Entry with optimistic id `local_id`.
    pub fn get(&self, local_id: LocalId) -> Option<&Message> {
        self.messages.iter().find(|m| m.local_id == Some(local_id))
    }

    /// Show an outgoing message before the server has persisted it.
    pub fn insert_pending(
        &mut self,
        local_id: LocalId,
        recipient: UserId,
        content: String,
        created_at: DateTime<Utc>,
    ) {
        let message = Message {
            local_id: Some(local_id),
            server_id: None,
            sender: self.owner.clone(),
            recipient,
            content,
            created_at,
            delivery: DeliveryState::Pending,
            arrival: 0,
            echoed: false,
        };
        self.insert(message);
    }

    /// The persistence call for `local_id` succeeded.
    ///
    /// If a copy with the same server id was already stored as a separate
    /// entry, that copy is folded into this one. The acknowledged id always
    /// wins over one an echo assigned earlier.
    pub fn confirm(
        &mut self,
        local_id: LocalId,
        sent: &SentMessage,
        ledger: &mut DedupeLedger<I>,
        now: I,
    ) -> ConfirmOutcome {
        let Some(index) = self.position_local(local_id) else {
            return ConfirmOutcome::Unknown;
        };
        let existing = &self.messages[index];
        if existing.delivery == DeliveryState::Confirmed {
            ledger.record(existing.sender.clone(), sent.id.clone(), now);
            if existing.server_id.as_ref() == Some(&sent.id) {
                return ConfirmOutcome::AlreadyConfirmed;
            }
            tracing::warn!(
                %local_id,
                echoed = ?existing.server_id,
                acknowledged = %sent.id,
                "echo matched under another id, keeping the acknowledged one"
            );
        }

        let duplicate = self.messages.iter().position(|m| m.local_id.is_none() && m.server_id.as_ref() == Some(&sent.id));
        let mut index = index;
        if let Some(dup) = duplicate {
            tracing::debug!(server_id = %sent.id, "folding early echo into optimistic entry");
            let echo = self.messages.remove(dup);
            if dup < index {
                index -= 1;
            }
            if sent.created_at.is_none() {
                self.messages[index].created_at = echo.created_at;
            }
        }

        let mut message = self.messages.remove(index);
        message.server_id = Some(sent.id.clone());
        message.delivery = DeliveryState::Confirmed;
        if let Some(created_at) = sent.created_at {
            message.created_at = created_at;
        }
        ledger.record(message.sender.clone(), sent.id.clone(), now);
        self.reinsert(message);
        ConfirmOutcome::Confirmed
    }

    /// The persistence call for `local_id` failed.
    ///
    /// Returns the content to restore when the entry was still pending. A
    /// failure for an entry an echo already confirmed is ignored.
    pub fn fail(&mut self, local_id: LocalId) -> Option<String> {
        let message = self.messages.iter_mut().find(|m| m.local_id == Some(local_id))?;
        match message.delivery {
            DeliveryState::Pending => {
                message.delivery = DeliveryState::Failed;
                Some(message.content.clone())
            },
            DeliveryState::Confirmed => {
                tracing::debug!(%local_id, "ignoring failure for a message already confirmed");
                None
            },
            DeliveryState::Failed => None,
        }
    }

    /// Move a failed entry back to pending. Returns its addressee and content.
    pub fn retry(&mut self, local_id: LocalId) -> Option<(UserId, String)> {
        let message = self.messages.iter_mut().find(|m| m.local_id == Some(local_id))?;
        if message.delivery != DeliveryState::Failed {
            return None;
        }
        message.delivery = DeliveryState::Pending;
        Some((message.recipient.clone(), message.content.clone()))
    }

    /// Drop a failed entry. Returns whether one was removed.
    pub fn discard(&mut self, local_id: LocalId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| !(m.local_id == Some(local_id) && m.delivery == DeliveryState::Failed));
        before != self.messages.len()
    }

    /// Merge a message from history or from the peer's push channel.
    ///
    /// Both are scoped to this conversation, so the ledger is only written,
    /// never consulted: an own message recorded while an earlier instance of
    /// this conversation was open still belongs here.
    pub fn merge(&mut self, incoming: IncomingMessage, ledger: &mut DedupeLedger<I>, now: I) -> MergeOutcome {
        if let Some(outcome) = self.known(&incoming) {
            return outcome;
        }
        if let Some(outcome) = self.reconcile_own(&incoming, ledger, now) {
            return outcome;
        }

        if let Some(server_id) = &incoming.server_id {
            if incoming.sender == self.owner {
                ledger.record(incoming.sender.clone(), server_id.clone(), now);
            }
        }
        self.insert(Message {
            local_id: None,
            server_id: incoming.server_id,
            sender: incoming.sender,
            recipient: incoming.recipient,
            content: incoming.content,
            created_at: incoming.created_at,
            delivery: DeliveryState::Confirmed,
            arrival: 0,
            echoed: false,
        });
        MergeOutcome::Appended
    }

    /// Match a push echo of a self-sent message against stored entries.
    ///
    /// Never appends: an echo carries no addressee, so one that matches
    /// nothing may belong to another conversation. Returns `None` then. An
    /// echo whose server id is in `ledger` but not in this store was sent to
    /// another peer and is dropped before the content fallback can claim it.
    pub fn absorb_echo(
        &mut self,
        incoming: &IncomingMessage,
        ledger: &mut DedupeLedger<I>,
        now: I,
    ) -> Option<MergeOutcome> {
        if incoming.sender != self.owner {
            return None;
        }
        if let Some(outcome) = self.known(incoming) {
            return Some(outcome);
        }
        if let Some(server_id) = &incoming.server_id {
            if ledger.contains(&incoming.sender, server_id, now) {
                tracing::debug!(%server_id, "echo of a message confirmed in another conversation");
                return Some(MergeOutcome::Duplicate);
            }
        }
        self.reconcile_own(incoming, ledger, now)
    }

    fn known(&mut self, incoming: &IncomingMessage) -> Option<MergeOutcome> {
        let server_id = incoming.server_id.as_ref()?;
        let existing = self.messages.iter_mut().find(|m| m.server_id.as_ref() == Some(server_id))?;
        existing.echoed = true;
        Some(MergeOutcome::Duplicate)
    }

    fn reconcile_own(
        &mut self,
        incoming: &IncomingMessage,
        ledger: &mut DedupeLedger<I>,
        now: I,
    ) -> Option<MergeOutcome> {
        if incoming.sender != self.owner {
            return None;
        }
        let index = self.match_own(incoming)?;
        Some(self.absorb(index, incoming, ledger, now))
    }

    fn match_own(&self, incoming: &IncomingMessage) -> Option<usize> {
        if let Some(client_id) = incoming.client_id {
            // a client id that matches nothing here was minted for another peer
            return self.position_local(client_id);
        }

        let index = self.messages.iter().position(|m| {
            m.local_id.is_some()
                && !m.echoed
                && m.content == incoming.content
                && (m.created_at - incoming.created_at).abs().to_std().is_ok_and(|d| d <= self.echo_window)
                && match (&m.server_id, &incoming.server_id) {
                    (Some(mine), Some(theirs)) => mine == theirs,
                    _ => true,
                }
        })?;
        tracing::debug!(content_len = incoming.content.len(), "matched self-echo by content");
        Some(index)
    }

    fn absorb(&mut self, index: usize, incoming: &IncomingMessage, ledger: &mut DedupeLedger<I>, now: I) -> MergeOutcome {
        let message = &mut self.messages[index];
        message.echoed = true;

        let Some(server_id) = incoming.server_id.clone() else {
            return MergeOutcome::Duplicate;
        };
        if message.server_id.is_some() && message.delivery == DeliveryState::Confirmed {
            return MergeOutcome::Duplicate;
        }

        message.server_id = Some(server_id.clone());
        message.delivery = DeliveryState::Confirmed;
        ledger.record(message.sender.clone(), server_id, now);
        MergeOutcome::Confirmed
    }

    fn position_local(&self, local_id: LocalId) -> Option<usize> {
        self.messages.iter().position(|m| m.local_id == Some(local_id))
    }

    fn insert(&mut self, mut message: Message) {
        message.arrival = self.next_arrival;
        self.next_arrival += 1;
        self.reinsert(message);
    }

    fn reinsert(&mut self, message: Message) {
        let key = message.sort_key();
        let at = self.messages.partition_point(|m| m.sort_key() <= key);
        self.messages.insert(at, message);
    }
}
