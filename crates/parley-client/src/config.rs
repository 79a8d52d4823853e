//! Client configuration.

use std::time::Duration;

use parley_core::ConnectionConfig;

/// Idle time after the last keystroke before `typing:false` is sent.
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_millis(1000);

/// Time after which a remote `typing:true` is considered stale.
pub const DEFAULT_REMOTE_TYPING_EXPIRY: Duration = Duration::from_secs(5);

/// Maximum timestamp distance for the content-matching echo fallback.
pub const DEFAULT_ECHO_WINDOW: Duration = Duration::from_secs(10);

/// Lifetime of a dedupe ledger entry.
pub const DEFAULT_DEDUPE_TTL: Duration = Duration::from_secs(60);

/// Messages per history page.
pub const DEFAULT_HISTORY_PAGE_SIZE: u32 = 50;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Outgoing typing indicator timeout.
    pub typing_timeout: Duration,
    /// Local expiry of a remote typing indicator.
    pub remote_typing_expiry: Duration,
    /// Window for the degraded echo match.
    pub echo_window: Duration,
    /// Dedupe ledger entry lifetime.
    pub dedupe_ttl: Duration,
    /// History page size.
    pub history_page_size: u32,
    /// Push connection settings.
    pub connection: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            remote_typing_expiry: DEFAULT_REMOTE_TYPING_EXPIRY,
            echo_window: DEFAULT_ECHO_WINDOW,
            dedupe_ttl: DEFAULT_DEDUPE_TTL,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            connection: ConnectionConfig::default(),
        }
    }
}
