//! Slash command parsing.
//!
//! Each input line is either a `/command` or message text for the open
//! conversation. Parsing never fails; malformed input becomes
//! [`Command::Unknown`] or [`Command::InvalidArgs`] so the driver can print a
//! hint.

use parley_app::AppEvent;
use parley_client::ClientEvent;
use parley_proto::{Credentials, LocalId, ProfileUpdate, SignupForm, UserId, UserStatus};

/// Usage text printed by `/help`.
pub const HELP: &str = "\
/login <email> <password>               log in
/signup <user> <email> <pass> <confirm> create an account
/logout                                 end the session
/open <peer>                            open the conversation with <peer>
/close                                  close the conversation
/older                                  load older messages
/retry <id>                             resend a failed message
/discard <id>                           drop a failed message
/reconnect                              retry the push connection
/name <username>                        change display name
/status online|away|offline             change status
/quit                                   exit
anything else is sent to the open conversation";

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/login`
    Login(Credentials),
    /// `/signup`
    Signup(SignupForm),
    /// `/logout`
    Logout,
    /// `/open`
    Open {
        /// Peer to talk to.
        peer: UserId,
    },
    /// `/close`
    Close,
    /// `/older`
    Older,
    /// `/retry`
    Retry {
        /// Message to resend.
        local_id: LocalId,
    },
    /// `/discard`
    Discard {
        /// Message to drop.
        local_id: LocalId,
    },
    /// `/reconnect`
    Reconnect,
    /// `/name` and `/status`
    Profile(ProfileUpdate),
    /// `/quit`
    Quit,
    /// `/help`
    Help,
    /// Text for the open conversation.
    Message {
        /// Message text.
        content: String,
    },
    /// Unrecognized `/command`.
    Unknown {
        /// The command word.
        input: String,
    },
    /// Known command with bad arguments.
    InvalidArgs {
        /// The command word.
        command: &'static str,
        /// What was wrong.
        error: String,
    },
}

impl Command {
    /// Events that carry out the command. Empty for commands the driver
    /// answers itself.
    pub fn into_events(self) -> Vec<AppEvent> {
        let event = match self {
            Self::Login(credentials) => ClientEvent::Login(credentials),
            Self::Signup(form) => ClientEvent::Signup(form),
            Self::Logout => ClientEvent::Logout,
            Self::Open { peer } => ClientEvent::SelectPeer(peer),
            Self::Close => ClientEvent::ClosePeer,
            Self::Older => ClientEvent::LoadOlder,
            Self::Retry { local_id } => ClientEvent::Retry(local_id),
            Self::Discard { local_id } => ClientEvent::Discard(local_id),
            Self::Reconnect => ClientEvent::Reconnect,
            Self::Profile(update) => ClientEvent::UpdateProfile(update),
            Self::Quit => return vec![AppEvent::Quit],
            Self::Message { content } => {
                return vec![ClientEvent::EditDraft(content).into(), ClientEvent::SendDraft.into()];
            },
            Self::Help | Self::Unknown { .. } | Self::InvalidArgs { .. } => return Vec::new(),
        };
        vec![event.into()]
    }
}

/// Parse one input line.
pub fn parse(line: &str) -> Command {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Message { content: line.to_string() };
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    match name {
        "login" => match args.as_slice() {
            [email, password] => {
                Command::Login(Credentials { email: (*email).to_string(), password: (*password).to_string() })
            },
            _ => invalid("login", "expected <email> <password>"),
        },
        "signup" => match args.as_slice() {
            [username, email, password, confirm] => Command::Signup(SignupForm {
                username: (*username).to_string(),
                email: (*email).to_string(),
                password: (*password).to_string(),
                confirm_password: (*confirm).to_string(),
            }),
            _ => invalid("signup", "expected <user> <email> <password> <confirm>"),
        },
        "logout" => Command::Logout,
        "open" => match args.as_slice() {
            [peer] => Command::Open { peer: UserId::new(*peer) },
            _ => invalid("open", "expected <peer>"),
        },
        "close" => Command::Close,
        "older" => Command::Older,
        "retry" => match failed_id("retry", &args) {
            Ok(local_id) => Command::Retry { local_id },
            Err(command) => command,
        },
        "discard" => match failed_id("discard", &args) {
            Ok(local_id) => Command::Discard { local_id },
            Err(command) => command,
        },
        "reconnect" => Command::Reconnect,
        "name" if args.is_empty() => invalid("name", "expected <username>"),
        "name" => Command::Profile(ProfileUpdate { username: Some(args.join(" ")), status: None }),
        "status" => match args.as_slice() {
            [status] => match parse_status(status) {
                Some(status) => Command::Profile(ProfileUpdate { username: None, status: Some(status) }),
                None => invalid("status", "expected online, away or offline"),
            },
            _ => invalid("status", "expected online, away or offline"),
        },
        "quit" | "exit" => Command::Quit,
        "help" => Command::Help,
        _ => Command::Unknown { input: name.to_string() },
    }
}

fn invalid(command: &'static str, error: &str) -> Command {
    Command::InvalidArgs { command, error: error.to_string() }
}

fn failed_id(command: &'static str, args: &[&str]) -> Result<LocalId, Command> {
    let [id] = args else {
        return Err(invalid(command, "expected <id>"));
    };
    u64::from_str_radix(id, 16)
        .map(LocalId)
        .map_err(|_| invalid(command, "id must be the hex id shown next to the failed message"))
}

fn parse_status(word: &str) -> Option<UserStatus> {
    match word.to_ascii_lowercase().as_str() {
        "online" => Some(UserStatus::Online),
        "away" => Some(UserStatus::Away),
        "offline" => Some(UserStatus::Offline),
        _ => None,
    }
}
