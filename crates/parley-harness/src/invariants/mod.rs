//! Invariants checked against every client after each simulation step.
//!
//! [`SimWorld`](crate::SimWorld) captures a [`SystemSnapshot`] and runs the
//! [`InvariantRegistry`] over it. A [`Violation`] names the client and, for
//! conversation checks, the peer whose timeline broke.

mod checks;
mod snapshot;

use std::fmt;

use parley_proto::UserId;

pub use checks::{ChronologicalOrder, ConfirmedHaveServerIds, NoDuplicateMessages, PeerIsolation, SingleConnection};
pub use snapshot::{ClientSnapshot, ConversationSnapshot, MessageSnapshot, SystemSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// A broken invariant on one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Simulation index of the offending client.
    pub client: u64,
    /// Peer of the open conversation, if one was open.
    pub peer: Option<UserId>,
    /// What was observed.
    pub message: String,
}

impl Violation {
    /// Violation of `invariant` on `client`, attributed to its open
    /// conversation if any.
    pub fn on(invariant: &'static str, client: &ClientSnapshot, message: impl Into<String>) -> Self {
        Self {
            invariant,
            client: client.id,
            peer: client.conversation.as_ref().map(|c| c.peer.clone()),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.peer {
            Some(peer) => write!(f, "{} on client {} (with {peer}): {}", self.invariant, self.client, self.message),
            None => write!(f, "{} on client {}: {}", self.invariant, self.client, self.message),
        }
    }
}

impl std::error::Error for Violation {}

/// A property of client state.
pub trait Invariant: Send + Sync {
    /// Name used in reports.
    fn name(&self) -> &'static str;

    /// First violation found in `state`, if any.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Set of invariants run together.
#[derive(Default)]
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordering, dedupe, connection count, peer isolation and confirmed ids.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(ChronologicalOrder);
        registry.add(NoDuplicateMessages);
        registry.add(SingleConnection);
        registry.add(PeerIsolation);
        registry.add(ConfirmedHaveServerIds);
        registry
    }

    /// Register `invariant`.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Every violation in `state`, sorted by client.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let mut violations: Vec<_> = self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();
        if violations.is_empty() {
            return Ok(());
        }
        violations.sort_by_key(|v| v.client);
        Err(violations)
    }

    /// Panic listing every violation, one client per line, prefixed by
    /// `context`.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let lines: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("{context}: {} invariant(s) broken\n  {}", violations.len(), lines.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
