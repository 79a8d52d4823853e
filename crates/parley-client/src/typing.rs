//! Typing indicators.
//!
//! [`OutgoingTyping`] turns keystrokes into at most one `typing:true` per
//! burst and a `typing:false` after the idle timeout. [`TypingState`] tracks
//! the peer's indicator, which expires locally if the peer never sends its
//! `typing:false`.

use std::time::Duration;

/// Local typing indicator.
#[derive(Debug, Clone)]
pub struct OutgoingTyping<I> {
    timeout: Duration,
    deadline: Option<I>,
}

impl<I> OutgoingTyping<I>
where
    I: Copy + Ord + std::ops::Add<Duration, Output = I>,
{
    /// Idle indicator with the given timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, deadline: None }
    }

    /// Whether `typing:true` was sent and not yet withdrawn.
    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    /// When `typing:false` is due.
    pub fn deadline(&self) -> Option<I> {
        self.deadline
    }

    /// A keystroke. Returns `true` if `typing:true` must be sent.
    pub fn keystroke(&mut self, now: I) -> bool {
        let started = self.deadline.is_none();
        self.deadline = Some(now + self.timeout);
        started
    }

    /// Returns `true` if the timeout elapsed and `typing:false` must be sent.
    pub fn tick(&mut self, now: I) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            },
            _ => false,
        }
    }

    /// Sending or leaving. Returns `true` if `typing:false` must be sent.
    pub fn stop(&mut self) -> bool {
        self.deadline.take().is_some()
    }
}

/// The peer's typing indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState<I> {
    /// Not typing.
    Idle,
    /// Typing, until `expires_at` at the latest.
    PeerTyping {
        /// Local expiry
        expires_at: I,
    },
}

impl<I> TypingState<I>
where
    I: Copy + Ord + std::ops::Add<Duration, Output = I>,
{
    /// Whether the peer is shown as typing.
    pub fn is_typing(&self) -> bool {
        matches!(self, Self::PeerTyping { .. })
    }

    /// Local expiry, if typing.
    pub fn expires_at(&self) -> Option<I> {
        match self {
            Self::PeerTyping { expires_at } => Some(*expires_at),
            Self::Idle => None,
        }
    }

    /// Apply a `user_typing` event. Returns `true` if the display changed.
    pub fn apply(&mut self, is_typing: bool, now: I, expiry: Duration) -> bool {
        let was = self.is_typing();
        *self = if is_typing { Self::PeerTyping { expires_at: now + expiry } } else { Self::Idle };
        was != is_typing
    }

    /// Expire a stale indicator. Returns `true` if it was cleared.
    pub fn tick(&mut self, now: I) -> bool {
        match *self {
            Self::PeerTyping { expires_at } if now >= expires_at => {
                *self = Self::Idle;
                true
            },
            _ => false,
        }
    }

    /// Clear the indicator. Returns `true` if it was shown.
    pub fn clear(&mut self) -> bool {
        let was = self.is_typing();
        *self = Self::Idle;
        was
    }
}
