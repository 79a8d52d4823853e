//! Typed lines through the parser, the client and the line renderer.

use parley_app::{AppEvent, View};
use parley_cli::{SystemEnv, command, render};
use parley_client::{
    Client, ClientAction, ClientConfig, ClientError, ErrorKind, MemoryCredentialStore, SessionStatus,
};
use parley_proto::ApiRequest;

type TestClient = Client<SystemEnv, MemoryCredentialStore>;

fn client() -> TestClient {
    Client::new(SystemEnv::new(), MemoryCredentialStore::new(), ClientConfig::default())
}

fn feed(client: &mut TestClient, line: &str) -> Result<Vec<ClientAction>, ClientError> {
    let mut actions = Vec::new();
    for event in command::parse(line).into_events() {
        if let AppEvent::Client(event) = event {
            actions.extend(client.handle(event)?);
        }
    }
    Ok(actions)
}

#[test]
fn login_line_issues_the_call_and_prints_progress() {
    let mut client = client();
    let before = View::capture(&client, None);

    let actions = feed(&mut client, "/login ana@example.com secret1").unwrap();

    assert!(actions.iter().any(|action| matches!(
        action,
        ClientAction::Request { request: ApiRequest::Login(credentials), .. }
            if credentials.email == "ana@example.com"
    )));
    assert_eq!(client.session_status(), SessionStatus::Authenticating);

    let after = View::capture(&client, None);
    assert_eq!(render::diff(Some(&before), &after), vec!["-- logging in"]);
}

#[test]
fn invalid_signup_never_reaches_the_network() {
    let mut client = client();

    let err = feed(&mut client, "/signup al al@example.com 123 123").unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.session_status(), SessionStatus::Anonymous);
}

#[test]
fn message_without_a_conversation_is_refused() {
    let mut client = client();

    let err = feed(&mut client, "hello").unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidState);
}
