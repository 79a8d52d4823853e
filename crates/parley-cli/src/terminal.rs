//! Terminal driver for the CLI.
//!
//! Implements the [`Driver`] trait with line-based stdin input, reqwest for
//! persistence calls and a WebSocket per push transport. Every network call
//! runs in its own task and reports back through one completion channel, so
//! the runtime never waits on the network.

use std::{
    collections::{HashMap, VecDeque},
    io::{self, Stdout, Write, stdout},
    sync::Arc,
    time::{Duration, Instant},
};

use parley_app::{AppEvent, Driver, View};
use parley_client::{
    ClientEvent,
    transport::{HttpApi, PushInbound, TransportError, connect_push},
};
use parley_proto::{ApiRequest, Generation, PushEvent, RequestId, UserId};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
    task::AbortHandle,
};

use crate::{command, render};

/// Longest wait in [`Driver::poll_event`] before the runtime gets to tick.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outbound push events buffered per transport.
const OUTBOUND_CAPACITY: usize = 64;

/// Terminal driver errors.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// I/O error from terminal operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

struct Transport {
    to_server: mpsc::Sender<PushEvent>,
    task: AbortHandle,
}

/// Terminal driver implementing the [`Driver`] trait.
pub struct TerminalDriver {
    api: Arc<HttpApi>,
    push_url: String,
    completions_tx: mpsc::UnboundedSender<AppEvent>,
    completions: mpsc::UnboundedReceiver<AppEvent>,
    lines: mpsc::Receiver<String>,
    stdin_task: AbortHandle,
    stdin_closed: bool,
    pending: VecDeque<AppEvent>,
    transports: HashMap<Generation, Transport>,
    last_view: Option<View>,
    out: Stdout,
}

impl TerminalDriver {
    /// Create a driver talking to the persistence API at `api_url` and
    /// opening push transports at `push_url`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(api_url: &str, push_url: impl Into<String>) -> Result<Self, TerminalError> {
        let api = Arc::new(HttpApi::new(api_url)?);
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (lines_tx, lines) = mpsc::channel(16);

        let stdin_task = tokio::spawn(async move {
            let mut reader = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => {
                        if lines_tx.send(line).await.is_err() {
                            break;
                        }
                    },
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(%err, "stdin read failed");
                        break;
                    },
                }
            }
        })
        .abort_handle();

        let driver = Self {
            api,
            push_url: push_url.into(),
            completions_tx,
            completions,
            lines,
            stdin_task,
            stdin_closed: false,
            pending: VecDeque::new(),
            transports: HashMap::new(),
            last_view: None,
            out: stdout(),
        };
        driver.print(&["Parley. Type /help for commands.".to_string()])?;
        Ok(driver)
    }

    fn handle_line(&mut self, line: &str) -> io::Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        match command::parse(line) {
            command::Command::Help => self.print(&[command::HELP.to_string()]),
            command::Command::Unknown { input } => {
                self.print(&[format!("unknown command /{input}, try /help")])
            },
            command::Command::InvalidArgs { command, error } => self.print(&[format!("/{command}: {error}")]),
            other => {
                self.pending.extend(other.into_events());
                Ok(())
            },
        }
    }

    fn print(&self, lines: &[String]) -> io::Result<()> {
        let mut out = self.out.lock();
        for line in lines {
            writeln!(out, "{line}")?;
        }
        out.flush()
    }
}

impl Driver for TerminalDriver {
    type Error = TerminalError;
    type Instant = Instant;

    async fn poll_event(&mut self) -> Result<Option<AppEvent>, Self::Error> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        tokio::select! {
            biased;

            // Network completions
            Some(event) = self.completions.recv() => {
                forget_ended(&mut self.transports, &event);
                Ok(Some(event))
            },

            // User input
            line = self.lines.recv(), if !self.stdin_closed => match line {
                Some(line) => {
                    self.handle_line(&line)?;
                    Ok(self.pending.pop_front())
                },
                None => {
                    self.stdin_closed = true;
                    Ok(Some(AppEvent::Quit))
                },
            },

            // Tick timeout
            () = tokio::time::sleep(POLL_INTERVAL) => Ok(None),
        }
    }

    fn execute_request(&mut self, id: RequestId, request: ApiRequest, token: Option<String>) -> Result<(), Self::Error> {
        let api = Arc::clone(&self.api);
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = api.execute(&request, token.as_deref()).await;
            if let Err(err) = &result {
                tracing::debug!(request_id = %id, %err, "api call failed");
            }
            let _ = tx.send(ClientEvent::ApiCompleted { request: id, result }.into());
        });
        Ok(())
    }

    fn open_transport(&mut self, generation: Generation, identity: &UserId) -> Result<(), Self::Error> {
        tracing::debug!(%generation, %identity, url = %self.push_url, "opening push transport");

        let url = self.push_url.clone();
        let tx = self.completions_tx.clone();
        let (to_server, mut outbound) = mpsc::channel::<PushEvent>(OUTBOUND_CAPACITY);

        let task = tokio::spawn(async move {
            let mut connection = match connect_push(&url).await {
                Ok(connection) => connection,
                Err(err) => {
                    let _ = tx.send(ClientEvent::TransportClosed { generation, reason: err.to_string() }.into());
                    return;
                },
            };
            if tx.send(ClientEvent::TransportOpened { generation }.into()).is_err() {
                return;
            }

            let reason = loop {
                tokio::select! {
                    event = outbound.recv() => match event {
                        Some(event) => {
                            // A dead socket reports itself as Closed on the inbound side.
                            if connection.to_server.send(event).await.is_err() {
                                tracing::debug!(%generation, "push writer gone");
                            }
                        },
                        None => return,
                    },
                    inbound = connection.from_server.recv() => match inbound {
                        Some(PushInbound::Event(event)) => {
                            let _ = tx.send(ClientEvent::PushReceived { generation, event }.into());
                        },
                        Some(PushInbound::Closed(reason)) => break reason,
                        None => break "connection task ended".to_string(),
                    },
                }
            };
            let _ = tx.send(ClientEvent::TransportClosed { generation, reason }.into());
        })
        .abort_handle();

        self.transports.insert(generation, Transport { to_server, task });
        Ok(())
    }

    fn close_transport(&mut self, generation: Generation) {
        if let Some(transport) = self.transports.remove(&generation) {
            tracing::debug!(%generation, "closing push transport");
            transport.task.abort();
        }
    }

    fn emit(&mut self, generation: Generation, event: PushEvent) {
        let Some(transport) = self.transports.get(&generation) else {
            tracing::warn!(%generation, "emit on unknown transport dropped");
            return;
        };
        if let Err(err) = transport.to_server.try_send(event) {
            tracing::warn!(%generation, %err, "outbound push event dropped");
        }
    }

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn render(&mut self, view: &View) -> Result<(), Self::Error> {
        let lines = render::diff(self.last_view.as_ref(), view);
        if !lines.is_empty() {
            self.print(&lines)?;
        }
        self.last_view = Some(view.clone());
        Ok(())
    }

    fn stop(&mut self) {
        for (_, transport) in self.transports.drain() {
            transport.task.abort();
        }
        self.stdin_task.abort();
    }
}

impl Drop for TerminalDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Forget a transport whose task reported its own end. The client sends no
/// close for a generation it was told has ended.
fn forget_ended<T>(transports: &mut HashMap<Generation, T>, event: &AppEvent) {
    if let AppEvent::Client(ClientEvent::TransportClosed { generation, .. }) = event {
        if transports.remove(generation).is_some() {
            tracing::debug!(%generation, "push transport ended");
        }
    }
}
