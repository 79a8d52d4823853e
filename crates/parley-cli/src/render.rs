//! Line-oriented rendering.
//!
//! The terminal is append-only, so instead of redrawing a frame the driver
//! prints what changed between two [`View`]s.

use parley_app::{ConversationView, MessageView, View};
use parley_client::{ConnectionStatus, DeliveryState, SessionStatus, SyncState};

/// Lines describing the change from `previous` to `view`.
///
/// With no previous view everything visible is reported.
pub fn diff(previous: Option<&View>, view: &View) -> Vec<String> {
    let mut lines = Vec::new();

    if previous.is_none_or(|p| p.session != view.session || p.username != view.username) {
        lines.push(session_line(view));
    }
    if previous.is_none_or(|p| p.connection != view.connection) {
        lines.push(format!("-- connection: {}", connection_label(view.connection)));
    }
    if previous.is_some_and(|p| p.online != view.online) {
        lines.push(online_line(view));
    }

    let before = previous.and_then(|p| p.conversation.as_ref());
    match (before, view.conversation.as_ref()) {
        (None, None) => {},
        (Some(old), None) => lines.push(format!("-- closed conversation with {}", old.peer)),
        (old, Some(new)) => {
            let same_peer = old.filter(|o| o.peer == new.peer);
            if same_peer.is_none() {
                lines.push(format!("-- conversation with {}", new.peer));
            }
            conversation_lines(same_peer, new, &mut lines);
        },
    }

    if previous.is_none_or(|p| p.status_message != view.status_message) {
        lines.extend(view.status_message.iter().map(|message| format!("!! {message}")));
    }

    lines
}

fn conversation_lines(old: Option<&ConversationView>, new: &ConversationView, lines: &mut Vec<String>) {
    let was_failed = old.is_some_and(|o| o.load_failed);
    if new.load_failed {
        if !was_failed {
            lines.push("-- history unavailable, /open again to retry".to_string());
        }
    } else if new.state == SyncState::Loading && (was_failed || old.is_none_or(|o| o.state != SyncState::Loading)) {
        lines.push("-- loading history".to_string());
    }

    let old_messages = old.map_or(&[][..], |o| o.messages.as_slice());
    let mut failed = false;
    for message in &new.messages {
        match old_messages.iter().find(|m| same_message(m, message)) {
            None => lines.push(message_line(&new.peer, message)),
            Some(prior) if prior.delivery != message.delivery && message.delivery == DeliveryState::Failed => {
                failed = true;
                lines.push(message_line(&new.peer, message));
            },
            Some(_) => {},
        }
    }

    if failed && !new.draft.is_empty() {
        lines.push(format!("-- draft restored: {}", new.draft));
    }
    let had_more = old.is_some_and(|o| o.has_more && o.state == SyncState::Ready);
    if new.has_more && new.state == SyncState::Ready && !had_more {
        lines.push("-- /older for earlier messages".to_string());
    }
    if new.peer_typing && !old.is_some_and(|o| o.peer_typing) {
        lines.push(format!("-- {} is typing...", new.peer));
    }
}

fn same_message(a: &MessageView, b: &MessageView) -> bool {
    a.mine == b.mine && a.content == b.content && a.created_at == b.created_at && a.local_id == b.local_id
}

fn message_line(peer: &impl std::fmt::Display, message: &MessageView) -> String {
    let time = message.created_at.format("%H:%M");
    let author = if message.mine { "me".to_string() } else { peer.to_string() };
    let suffix = match (message.delivery, message.local_id) {
        (DeliveryState::Pending, _) => " (sending)".to_string(),
        (DeliveryState::Failed, Some(id)) => format!(" (failed, /retry or /discard {id})"),
        (DeliveryState::Failed, None) => " (failed)".to_string(),
        (DeliveryState::Confirmed, _) => String::new(),
    };
    format!("[{time}] {author}: {}{suffix}", message.content)
}

fn session_line(view: &View) -> String {
    match (view.session, &view.username) {
        (SessionStatus::Authenticated, Some(name)) => format!("-- logged in as {name}"),
        (SessionStatus::Authenticated, None) => "-- logged in".to_string(),
        (SessionStatus::Anonymous, _) => "-- not logged in, /login or /signup".to_string(),
        (SessionStatus::Restoring, _) => "-- restoring session".to_string(),
        (SessionStatus::Authenticating, _) => "-- logging in".to_string(),
        (SessionStatus::Failed, _) => "-- session check failed, /login to retry".to_string(),
    }
}

fn connection_label(status: ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Disconnected => "offline".to_string(),
        ConnectionStatus::Connecting => "connecting".to_string(),
        ConnectionStatus::Connected => "online".to_string(),
        ConnectionStatus::Reconnecting { attempt } => format!("reconnecting (attempt {})", attempt + 1),
    }
}

fn online_line(view: &View) -> String {
    if view.online.is_empty() {
        return "-- nobody else online".to_string();
    }
    let names: Vec<_> = view.online.iter().map(ToString::to_string).collect();
    format!("-- online: {}", names.join(", "))
}
