//! Client events and actions.

use parley_proto::{
    ApiRequest, ApiResponse, Credentials, Generation, LocalId, ProfileUpdate, PushEvent, RequestId, SignupForm,
    UserId,
};

use crate::{
    error::{ApiError, ClientError},
    session::SessionStatus,
};

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Forwarding user intents
/// - Reporting completions of the persistence calls it was asked to make
/// - Reporting transport lifecycle and inbound push events, tagged with the
///   generation they belong to
/// - Driving time forward via ticks
///
/// Generic over `I` (Instant type) so simulation can use virtual time.
#[derive(Debug, Clone)]
pub enum ClientEvent<I = std::time::Instant> {
    /// Validate a stored credential, if any.
    Restore,

    /// Log in.
    Login(Credentials),

    /// Create an account.
    Signup(SignupForm),

    /// End the session.
    Logout,

    /// Change display name or status.
    UpdateProfile(ProfileUpdate),

    /// Open the conversation with a peer.
    SelectPeer(UserId),

    /// Close the open conversation.
    ClosePeer,

    /// Fetch the next older history page.
    LoadOlder,

    /// The draft of the open conversation changed.
    EditDraft(String),

    /// Send the draft of the open conversation.
    SendDraft,

    /// Resend a failed message.
    Retry(LocalId),

    /// Drop a failed message instead of resending it.
    Discard(LocalId),

    /// Try the push connection again after retries ran out.
    Reconnect,

    /// A persistence call finished.
    ApiCompleted {
        /// Id from the originating [`ClientAction::Request`].
        request: RequestId,
        /// Decoded response or failure.
        result: Result<ApiResponse, ApiError>,
    },

    /// The transport of `generation` is open.
    TransportOpened {
        /// Generation from [`ClientAction::OpenTransport`].
        generation: Generation,
    },

    /// The transport of `generation` closed or failed to open.
    TransportClosed {
        /// Generation of the transport.
        generation: Generation,
        /// Human-readable cause.
        reason: String,
    },

    /// An event arrived on the transport of `generation`.
    PushReceived {
        /// Generation of the transport.
        generation: Generation,
        /// Decoded event.
        event: PushEvent,
    },

    /// Time tick for timers.
    Tick {
        /// Current time from the environment.
        now: I,
    },
}

/// User-visible notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Success message.
    Info(String),
    /// Recoverable failure.
    Error(ClientError),
}

/// Actions the caller must execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Issue a persistence call and report it as [`ClientEvent::ApiCompleted`].
    Request {
        /// Correlation id.
        id: RequestId,
        /// The call.
        request: ApiRequest,
        /// Bearer token, if the call is authenticated.
        token: Option<String>,
    },

    /// Open a push transport bound to `identity`.
    OpenTransport {
        /// Generation to tag transport events with.
        generation: Generation,
        /// Identity to announce.
        identity: UserId,
    },

    /// Close the push transport of `generation`.
    CloseTransport {
        /// Generation to close.
        generation: Generation,
    },

    /// Write an event on the push transport of `generation`.
    Emit {
        /// Live generation.
        generation: Generation,
        /// Event to write.
        event: PushEvent,
    },

    /// Session status changed.
    SessionChanged(SessionStatus),

    /// The server rejected the session token. Show the login screen.
    SessionExpired,

    /// Text of a failed send was put back into the draft.
    DraftRestored(String),

    /// Show a notification.
    Notify(Notice),
}
