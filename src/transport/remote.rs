//! Remote session server
//!
//! One websocket client at a time drives the session: its text frames become
//! commands and captured standard output is streamed back line by line.
//! Further connection attempts are turned away with 429 before the upgrade.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};

use crate::common::config::RemoteConfig;
use crate::common::{Error, Result};
use crate::session::channel::{Command, CommandSender};
use crate::session::history::History;
use crate::session::shutdown::{Terminate, Trigger};

/// Admission control for the single remote client
#[derive(Debug, Default)]
pub struct ConnectionSlot {
    attempts: StdMutex<u32>,
}

impl ConnectionSlot {
    /// Count an attempt; only the first one since the last release is admitted
    pub fn admit(&self) -> bool {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        *attempts = attempts.saturating_add(1);
        *attempts <= 1
    }

    pub fn release(&self) {
        *self.attempts.lock().unwrap_or_else(PoisonError::into_inner) = 0;
    }
}

/// How a remote connection ended
#[derive(Debug)]
pub enum TransportOutcome {
    /// The client went away cleanly
    Disconnected,
    /// This connection failed; the session may continue
    ConnectionFailed(Error),
    /// The session must end
    ProcessFatal(Error),
}

/// Classify the end of a connection under the configured policy
pub fn classify(result: Result<()>, fatal: bool) -> TransportOutcome {
    let outcome = match result {
        Ok(()) | Err(Error::ChannelClosed) => TransportOutcome::Disconnected,
        Err(e) => TransportOutcome::ConnectionFailed(e),
    };
    if !fatal {
        return outcome;
    }
    match outcome {
        TransportOutcome::Disconnected => {
            TransportOutcome::ProcessFatal(Error::Transport("client disconnected".to_string()))
        }
        TransportOutcome::ConnectionFailed(e) | TransportOutcome::ProcessFatal(e) => {
            TransportOutcome::ProcessFatal(e)
        }
    }
}

/// Everything a connection needs, shared with the router
#[derive(Clone)]
pub struct RemoteState {
    slot: Arc<ConnectionSlot>,
    output: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    commands: CommandSender,
    history: Arc<History>,
    terminate: Arc<dyn Terminate>,
    config: RemoteConfig,
}

impl RemoteState {
    pub fn new(
        output: mpsc::UnboundedReceiver<String>,
        commands: CommandSender,
        history: Arc<History>,
        terminate: Arc<dyn Terminate>,
        config: RemoteConfig,
    ) -> Self {
        Self {
            slot: Arc::new(ConnectionSlot::default()),
            output: Arc::new(Mutex::new(output)),
            commands,
            history,
            terminate,
            config,
        }
    }

    pub fn slot(&self) -> Arc<ConnectionSlot> {
        self.slot.clone()
    }
}

pub fn router(state: RemoteState) -> Router {
    Router::new().route("/", get(upgrade)).with_state(state)
}

/// Admission runs before the websocket handshake
async fn upgrade(State(state): State<RemoteState>, request: Request) -> Response {
    if !state.slot.admit() {
        tracing::info!("Rejecting remote connection, a client is already attached");
        return (StatusCode::TOO_MANY_REQUESTS, "Too many connections").into_response();
    }

    let (mut parts, _body) = request.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::warn!("Remote connection is not a websocket upgrade");
            let error = Error::Transport(format!(
                "websocket upgrade failed: {}",
                rejection.body_text()
            ));
            settle(&state, Err(error)).await;
            return rejection.into_response();
        }
    };

    tracing::info!("Remote client connected");
    ws.on_upgrade(move |socket| async move {
        let result = relay(socket, &state).await;
        settle(&state, result).await;
    })
}

/// How a relay finished without a transport error
#[derive(Debug, PartialEq, Eq)]
enum Ending {
    Closed,
    /// The client queued `exit` before leaving; the dispatcher runs the shutdown
    AfterExit,
}

/// Apply the transport policy to a finished or failed connection
async fn settle(state: &RemoteState, result: Result<Ending>) {
    if matches!(result, Ok(Ending::AfterExit)) {
        tracing::info!("Remote client left after exit");
        return;
    }

    match classify(result.map(|_| ()), state.config.fatal_transport_errors) {
        TransportOutcome::Disconnected => {
            tracing::info!("Remote client disconnected");
            if state.config.release_slot_on_disconnect {
                state.slot.release();
            }
        }
        TransportOutcome::ConnectionFailed(e) => {
            tracing::warn!(error = %e, "Remote connection failed");
            if state.config.release_slot_on_disconnect {
                state.slot.release();
            }
        }
        TransportOutcome::ProcessFatal(e) => {
            tracing::error!(error = %e, "Remote transport ended the session");
            state.terminate.terminate(Trigger::TransportFailure).await;
        }
    }
}

/// Greet, then run output relay and command intake until either ends
async fn relay(socket: WebSocket, state: &RemoteState) -> Result<Ending> {
    let (mut sink, mut stream) = socket.split();

    sink.send(Message::Text(state.config.greeting.clone().into()))
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;

    let outbound = async {
        let mut output = state.output.lock().await;
        while let Some(line) = output.recv().await {
            sink.send(Message::Text(format!("{}\n", line).into()))
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
        }
        tracing::debug!("Captured output ended");
        Ok(Ending::Closed)
    };

    let inbound = async {
        let mut exit_queued = false;
        while let Some(message) = stream.next().await {
            let line = match message.map_err(|e| Error::Transport(e.to_string()))? {
                Message::Text(text) => text.as_str().to_string(),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping binary frame that is not UTF-8");
                        continue;
                    }
                },
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            state.history.record(&line);
            let command = Command::parse(&line);
            exit_queued |= command.is_exit();
            state.commands.push(command)?;
        }
        Ok(if exit_queued {
            Ending::AfterExit
        } else {
            Ending::Closed
        })
    };

    tokio::select! {
        result = outbound => result,
        result = inbound => result,
    }
}

/// Serve the websocket endpoint until the process exits
///
/// A listener failure ends the session.
pub async fn serve(listener: TcpListener, state: RemoteState) {
    let terminate = state.terminate.clone();
    if let Err(e) = axum::serve(listener, router(state)).await {
        eprintln!("Remote server failed: {}", e);
        tracing::error!(error = %e, "Remote server failed");
        terminate.terminate(Trigger::TransportFailure).await;
    }
}
