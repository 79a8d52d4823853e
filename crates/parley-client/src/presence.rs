//! Online status of other users, as reported by the push channel.

use std::collections::HashMap;

use parley_proto::{PushEvent, UserId, UserStatus};

/// Last known status of each user seen in a presence event.
#[derive(Debug, Clone, Default)]
pub struct Presence {
    statuses: HashMap<UserId, UserStatus>,
}

impl Presence {
    /// Empty presence map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a `user_online` or `user_offline` event. Returns `true` if the
    /// user's status changed.
    pub fn apply(&mut self, event: &PushEvent) -> bool {
        let (user, status) = match event {
            PushEvent::UserOnline(p) => (&p.user_id, UserStatus::Online),
            PushEvent::UserOffline(p) => (&p.user_id, UserStatus::Offline),
            _ => return false,
        };
        self.statuses.insert(user.clone(), status) != Some(status)
    }

    /// Status of `user`. Users never seen are offline.
    pub fn status(&self, user: &UserId) -> UserStatus {
        self.statuses.get(user).copied().unwrap_or_default()
    }

    /// Users currently online.
    pub fn online(&self) -> impl Iterator<Item = &UserId> {
        self.statuses.iter().filter(|(_, s)| **s == UserStatus::Online).map(|(u, _)| u)
    }

    /// Forget everything, on logout.
    pub fn clear(&mut self) {
        self.statuses.clear();
    }
}
