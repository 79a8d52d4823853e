//! Synchronization of the conversation with one peer.
//!
//! Created when a peer is selected. Push subscriptions are attached first and
//! history is requested second, so no message delivered in between is lost:
//! pushes merged during loading and the history page go through the same
//! dedupe path.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parley_core::{Subscription, SubscriptionId};
use parley_proto::{ApiRequest, HistoryPage, LocalId, PushEvent, RequestId, SentMessage, UserId};

use crate::{
    config::ClientConfig,
    error::ClientError,
    store::{ConfirmOutcome, DedupeLedger, IncomingMessage, Message, MessageStore},
    typing::{OutgoingTyping, TypingState},
    validation,
};

/// Loading state of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing requested yet.
    Idle,
    /// First history page requested but not merged. A failed request leaves
    /// the conversation here until it is reissued.
    Loading,
    /// First page merged.
    Ready,
}

/// Result of a history completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// Not the outstanding request. Dropped.
    Stale,
    /// Page merged.
    Loaded {
        /// Messages that were not already present
        appended: usize,
    },
    /// Load failed. The conversation stays `Loading`; selecting the peer
    /// again retries.
    Failed(ClientError),
}

/// An optimistic send ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Optimistic id.
    pub local_id: LocalId,
    /// Persistence call.
    pub request: ApiRequest,
    /// Trimmed message text.
    pub content: String,
    /// Whether `typing:false` must be published.
    pub stop_typing: bool,
}

/// Conversation with one peer.
#[derive(Debug)]
pub struct ConversationSync<I> {
    owner: UserId,
    peer: UserId,
    state: SyncState,
    history_request: Option<RequestId>,
    older_request: Option<RequestId>,
    page: u32,
    page_size: u32,
    has_more: bool,
    subscriptions: Vec<Subscription>,
    store: MessageStore<I>,
    typing: TypingState<I>,
    outgoing: OutgoingTyping<I>,
    remote_expiry: Duration,
    draft: String,
}

impl<I> ConversationSync<I>
where
    I: Copy + Ord + std::ops::Add<Duration, Output = I>,
{
    /// Idle conversation between `owner` and `peer`.
    pub fn new(owner: UserId, peer: UserId, config: &ClientConfig) -> Self {
        Self {
            store: MessageStore::new(owner.clone(), config.echo_window),
            owner,
            peer,
            state: SyncState::Idle,
            history_request: None,
            older_request: None,
            page: 0,
            page_size: config.history_page_size,
            has_more: false,
            subscriptions: Vec::new(),
            typing: TypingState::Idle,
            outgoing: OutgoingTyping::new(config.typing_timeout),
            remote_expiry: config.remote_typing_expiry,
            draft: String::new(),
        }
    }

    /// The peer.
    pub fn peer(&self) -> &UserId {
        &self.peer
    }

    /// Loading state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    /// Message store.
    pub fn store(&self) -> &MessageStore<I> {
        &self.store
    }

    /// The peer's typing indicator.
    pub fn typing(&self) -> TypingState<I> {
        self.typing
    }

    /// Whether the local typing indicator is on.
    pub fn is_typing(&self) -> bool {
        self.outgoing.is_active()
    }

    /// Current draft text.
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Whether an older page exists.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Number of history pages merged.
    pub fn pages_loaded(&self) -> u32 {
        self.page
    }

    /// Whether a history request is in flight.
    pub fn is_fetching(&self) -> bool {
        self.history_request.is_some() || self.older_request.is_some()
    }

    /// Whether the first page was requested, failed and not yet reissued.
    pub fn load_failed(&self) -> bool {
        self.state == SyncState::Loading && self.history_request.is_none()
    }

    /// Take ownership of this conversation's push subscriptions.
    pub fn attach(&mut self, subscriptions: impl IntoIterator<Item = Subscription>) {
        self.subscriptions.extend(subscriptions);
    }

    /// Whether `id` is one of this conversation's subscriptions.
    pub fn owns(&self, id: SubscriptionId) -> bool {
        self.subscriptions.iter().any(|s| s.id() == id)
    }

    /// Request the first history page. `None` if already loaded or a request
    /// is in flight.
    pub fn load(&mut self, request: RequestId) -> Option<ApiRequest> {
        if self.state == SyncState::Ready || self.history_request.is_some() {
            return None;
        }
        self.state = SyncState::Loading;
        self.history_request = Some(request);
        tracing::debug!(peer = %self.peer, %request, "loading history");
        Some(ApiRequest::History { peer: self.peer.clone(), page: 1, limit: self.page_size })
    }

    /// Request the next older page. `None` unless ready with more to fetch.
    pub fn load_older(&mut self, request: RequestId) -> Option<ApiRequest> {
        if self.state != SyncState::Ready || !self.has_more || self.older_request.is_some() {
            return None;
        }
        self.older_request = Some(request);
        Some(ApiRequest::History { peer: self.peer.clone(), page: self.page + 1, limit: self.page_size })
    }

    /// Completion of a history request.
    pub fn handle_history(
        &mut self,
        request: RequestId,
        result: Result<HistoryPage, ClientError>,
        ledger: &mut DedupeLedger<I>,
        now: I,
    ) -> HistoryOutcome {
        let initial = self.history_request == Some(request);
        if !initial && self.older_request != Some(request) {
            tracing::debug!(peer = %self.peer, %request, "dropping stale history page");
            return HistoryOutcome::Stale;
        }
        if initial {
            self.history_request = None;
        } else {
            self.older_request = None;
        }

        let page = match result {
            Ok(page) if page.peer == self.peer => page,
            Ok(page) => {
                tracing::warn!(expected = %self.peer, got = %page.peer, "history page for another peer");
                return HistoryOutcome::Stale;
            },
            Err(err) => {
                tracing::warn!(peer = %self.peer, %err, initial, "history load failed");
                return HistoryOutcome::Failed(err);
            },
        };

        let appended = page
            .messages
            .into_iter()
            .map(|m| self.store.merge(IncomingMessage::from_wire(m), ledger, now))
            .filter(|o| *o == crate::store::MergeOutcome::Appended)
            .count();

        self.page = self.page.max(page.page);
        self.has_more = page.has_more;
        self.state = SyncState::Ready;
        tracing::debug!(peer = %self.peer, page = page.page, appended, has_more = self.has_more, "history merged");
        HistoryOutcome::Loaded { appended }
    }

    /// A push event delivered to one of this conversation's subscriptions.
    /// Returns `true` if anything visible changed.
    pub fn handle_push(
        &mut self,
        event: PushEvent,
        ledger: &mut DedupeLedger<I>,
        now: I,
        received_at: DateTime<Utc>,
    ) -> bool {
        match event {
            PushEvent::ReceiveMessage(payload) if payload.sender_id == self.owner => {
                let echo = IncomingMessage::from_push(payload, self.peer.clone(), received_at);
                let outcome = self.store.absorb_echo(&echo, ledger, now);
                tracing::debug!(peer = %self.peer, ?outcome, "self echo");
                outcome == Some(crate::store::MergeOutcome::Confirmed)
            },
            PushEvent::ReceiveMessage(payload) if payload.sender_id == self.peer => {
                let incoming = IncomingMessage::from_push(payload, self.owner.clone(), received_at);
                self.store.merge(incoming, ledger, now);
                self.typing.clear();
                true
            },
            PushEvent::UserTyping(payload) if payload.user_id == self.peer => {
                self.typing.apply(payload.is_typing, now, self.remote_expiry)
            },
            other => {
                tracing::debug!(peer = %self.peer, event = other.name(), "event not for this conversation");
                false
            },
        }
    }

    /// The draft changed. Returns `true` if `typing:true` must be published.
    pub fn edit_draft(&mut self, text: String, now: I) -> bool {
        self.draft = text;
        self.outgoing.keystroke(now)
    }

    /// Turn the draft into an optimistic pending entry.
    ///
    /// # Errors
    ///
    /// `Validation` if the draft is blank. The draft is left untouched.
    pub fn send_draft(&mut self, local_id: LocalId, sent_at: DateTime<Utc>) -> Result<OutgoingMessage, ClientError> {
        let content = validation::check_message(&self.draft)?.to_string();
        self.draft.clear();
        self.store.insert_pending(local_id, self.peer.clone(), content.clone(), sent_at);

        Ok(OutgoingMessage {
            local_id,
            request: ApiRequest::SendMessage {
                recipient: self.peer.clone(),
                content: content.clone(),
                client_message_id: local_id,
            },
            content,
            stop_typing: self.outgoing.stop(),
        })
    }

    /// Resend a failed entry.
    ///
    /// # Errors
    ///
    /// `InvalidState` if `local_id` is not a failed entry.
    pub fn retry(&mut self, local_id: LocalId) -> Result<OutgoingMessage, ClientError> {
        let Some((recipient, content)) = self.store.retry(local_id) else {
            return Err(ClientError::InvalidState { operation: "retry", state: "the message is not failed" });
        };
        Ok(OutgoingMessage {
            local_id,
            request: ApiRequest::SendMessage { recipient, content: content.clone(), client_message_id: local_id },
            content,
            stop_typing: false,
        })
    }

    /// Drop a failed entry.
    ///
    /// # Errors
    ///
    /// `InvalidState` if `local_id` is not a failed entry.
    pub fn discard(&mut self, local_id: LocalId) -> Result<(), ClientError> {
        if !self.store.discard(local_id) {
            return Err(ClientError::InvalidState { operation: "discard", state: "the message is not failed" });
        }
        tracing::debug!(peer = %self.peer, %local_id, "failed message discarded");
        Ok(())
    }

    /// The persistence call for `local_id` succeeded.
    pub fn handle_sent(
        &mut self,
        local_id: LocalId,
        sent: &SentMessage,
        ledger: &mut DedupeLedger<I>,
        now: I,
    ) -> ConfirmOutcome {
        self.store.confirm(local_id, sent, ledger, now)
    }

    /// The persistence call for `local_id` failed.
    ///
    /// Returns the text put back into the draft. The draft is only restored
    /// while empty; otherwise the failed entry keeps the text for a retry.
    pub fn handle_send_failed(&mut self, local_id: LocalId) -> Option<String> {
        let content = self.store.fail(local_id)?;
        if !self.draft.is_empty() {
            return None;
        }
        self.draft.clone_from(&content);
        Some(content)
    }

    /// Advance timers. Returns `true` if `typing:false` must be published.
    pub fn tick(&mut self, now: I) -> bool {
        self.typing.tick(now);
        self.outgoing.tick(now)
    }

    /// Earliest timer deadline.
    pub fn next_deadline(&self) -> Option<I> {
        match (self.outgoing.deadline(), self.typing.expires_at()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Tear down. Returns the subscriptions to release and whether
    /// `typing:false` must be published.
    pub fn close(mut self) -> (Vec<Subscription>, bool) {
        tracing::debug!(peer = %self.peer, "closing conversation");
        let stop = self.outgoing.stop();
        (std::mem::take(&mut self.subscriptions), stop)
    }
}
