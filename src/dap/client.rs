//! DAP client for communicating with debug adapters
//!
//! Requests and responses are decoupled: a background reader task routes each
//! response to the waiting request by `request_seq` and forwards events on a
//! channel. Any number of callers can therefore have requests in flight, which
//! is what lets the interrupter send `pause` while a `continue` is pending.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::common::{Error, Result};

use super::codec;
use super::types::*;

type Pending = Arc<StdMutex<HashMap<i64, oneshot::Sender<ResponseMessage>>>>;
type Writer = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Serialize request arguments
pub fn arguments<T: Serialize>(args: &T) -> Result<Option<Value>> {
    Ok(Some(serde_json::to_value(args)?))
}

/// Cloneable handle for issuing requests to the adapter
#[derive(Clone)]
pub struct DapRequester {
    writer: Writer,
    seq: Arc<AtomicI64>,
    pending: Pending,
    timeout: Duration,
}

impl DapRequester {
    /// Send a request and wait for its response body
    pub async fn request<T: DeserializeOwned>(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<T> {
        self.request_with_timeout(command, arguments, self.timeout)
            .await
    }

    /// Send a request whose response body is not needed
    pub async fn execute(&self, command: &str, arguments: Option<Value>) -> Result<()> {
        self.request::<Value>(command, arguments).await.map(|_| ())
    }

    pub async fn request_with_timeout<T: DeserializeOwned>(
        &self,
        command: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> Result<T> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(seq, tx);

        let json = serde_json::to_string(&RequestMessage::new(seq, command, arguments))?;
        tracing::debug!("DAP >>> {}", json);

        let written = {
            let mut writer = self.writer.lock().await;
            codec::write_frame(&mut *writer, &json).await
        };
        if let Err(e) = written {
            self.forget(seq);
            return Err(match e {
                Error::Io(io) if io.kind() == std::io::ErrorKind::BrokenPipe => {
                    Error::AdapterClosed
                }
                other => other,
            });
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(Error::AdapterClosed),
            Err(_) => {
                self.forget(seq);
                return Err(Error::Timeout {
                    command: command.to_string(),
                    secs: timeout.as_secs(),
                });
            }
        };

        if !response.success {
            return Err(Error::dap_request_failed(
                command,
                response.message.as_deref().unwrap_or("Unknown error"),
            ));
        }

        serde_json::from_value(response.body.unwrap_or(Value::Null)).map_err(|e| {
            Error::DapProtocol(format!("Failed to parse {} response: {}", command, e))
        })
    }

    fn forget(&self, seq: i64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&seq);
    }
}

/// Read frames until the adapter's stream ends
///
/// Responses complete their pending request, events go to `events`. When the
/// stream ends every request still waiting observes `Error::AdapterClosed`.
async fn pump<R: AsyncBufRead + Unpin>(
    mut reader: R,
    pending: Pending,
    events: mpsc::UnboundedSender<Event>,
) {
    loop {
        let json = match codec::read_frame(&mut reader).await {
            Ok(Some(json)) => json,
            Ok(None) => {
                tracing::debug!("Debug adapter closed its output");
                break;
            }
            Err(e) => {
                tracing::warn!("Reading from debug adapter failed: {}", e);
                break;
            }
        };
        tracing::debug!("DAP <<< {}", json);

        match serde_json::from_str::<IncomingMessage>(&json) {
            Ok(IncomingMessage::Response(response)) => {
                let waiter = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&response.request_seq);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!(
                        "Dropping response to {} (seq {}), nobody is waiting",
                        response.command,
                        response.request_seq
                    ),
                }
            }
            Ok(IncomingMessage::Event(event)) => {
                let _ = events.send(Event::from_message(event));
            }
            Ok(IncomingMessage::Request(request)) => {
                tracing::warn!(
                    "Ignoring reverse request '{}' (seq {})",
                    request.command,
                    request.seq
                );
            }
            Err(e) => tracing::warn!("Unparseable DAP message: {}", e),
        }
    }

    pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

/// DAP client owning the adapter subprocess and its reader task
pub struct DapClient {
    adapter: Option<Child>,
    requester: DapRequester,
    events: Option<mpsc::UnboundedReceiver<Event>>,
    reader: JoinHandle<()>,
    /// Adapter capabilities (populated after initialize)
    pub capabilities: Capabilities,
}

impl DapClient {
    /// Spawn a new DAP adapter and create a client
    pub async fn spawn(adapter_path: &Path, args: &[String], timeout: Duration) -> Result<Self> {
        let mut cmd = Command::new(adapter_path);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut adapter = cmd.spawn().map_err(|e| {
            Error::AdapterStartFailed(format!(
                "Failed to start {}: {}",
                adapter_path.display(),
                e
            ))
        })?;

        let stdin = adapter
            .stdin
            .take()
            .ok_or_else(|| Error::AdapterStartFailed("Failed to get adapter stdin".to_string()))?;
        let stdout = adapter.stdout.take().ok_or_else(|| {
            Error::AdapterStartFailed("Failed to get adapter stdout".to_string())
        })?;

        let mut client = Self::from_streams(BufReader::new(stdout), stdin, timeout);
        client.adapter = Some(adapter);
        Ok(client)
    }

    /// Build a client over an already connected pair of streams
    pub fn from_streams<R, W>(reader: R, writer: W, timeout: Duration) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: Pending = Arc::new(StdMutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(pump(reader, pending.clone(), event_tx));

        let requester = DapRequester {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            seq: Arc::new(AtomicI64::new(1)),
            pending,
            timeout,
        };

        Self {
            adapter: None,
            requester,
            events: Some(event_rx),
            reader,
            capabilities: Capabilities::default(),
        }
    }

    pub fn requester(&self) -> DapRequester {
        self.requester.clone()
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.events.take()
    }

    /// Initialize the debug adapter
    pub async fn initialize(&mut self, adapter_id: &str, timeout: Duration) -> Result<()> {
        let caps: Capabilities = self
            .requester
            .request_with_timeout(
                "initialize",
                arguments(&InitializeArguments::new(adapter_id))?,
                timeout,
            )
            .await?;
        self.capabilities = caps;
        Ok(())
    }

    /// Check if the adapter is still running
    pub fn is_running(&mut self) -> bool {
        match self.adapter.as_mut() {
            Some(adapter) => adapter.try_wait().ok().flatten().is_none(),
            None => !self.reader.is_finished(),
        }
    }
}

impl Drop for DapClient {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(adapter) = self.adapter.as_mut() {
            let _ = adapter.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{duplex, DuplexStream};

    /// Adapter end of the two pipes
    struct FakeAdapter {
        reader: BufReader<DuplexStream>,
        writer: DuplexStream,
    }

    impl FakeAdapter {
        async fn next_request(&mut self) -> Value {
            let json = codec::read_frame(&mut self.reader).await.unwrap().unwrap();
            serde_json::from_str(&json).unwrap()
        }

        async fn send(&mut self, message: Value) {
            codec::write_frame(&mut self.writer, &message.to_string())
                .await
                .unwrap();
        }
    }

    fn connect(timeout: Duration) -> (DapClient, FakeAdapter) {
        let (client_out, adapter_in) = duplex(64 * 1024);
        let (adapter_out, client_in) = duplex(64 * 1024);
        let client = DapClient::from_streams(BufReader::new(client_in), client_out, timeout);
        let adapter = FakeAdapter {
            reader: BufReader::new(adapter_in),
            writer: adapter_out,
        };
        (client, adapter)
    }

    #[tokio::test]
    async fn test_out_of_order_responses_reach_their_requests() {
        let (client, mut adapter) = connect(Duration::from_secs(5));
        let requester = client.requester();

        let first = tokio::spawn({
            let requester = requester.clone();
            async move { requester.request::<ThreadsResponseBody>("threads", None).await }
        });
        let first_req = adapter.next_request().await;
        let second = tokio::spawn({
            let requester = requester.clone();
            async move { requester.execute("pause", None).await }
        });
        let second_req = adapter.next_request().await;

        assert_eq!(first_req["command"], "threads");
        assert_eq!(second_req["command"], "pause");

        adapter
            .send(json!({"seq": 1, "type": "response", "request_seq": second_req["seq"],
                "success": true, "command": "pause"}))
            .await;
        adapter
            .send(json!({"seq": 2, "type": "event", "event": "stopped",
                "body": {"reason": "pause", "threadId": 1}}))
            .await;
        adapter
            .send(json!({"seq": 3, "type": "response", "request_seq": first_req["seq"],
                "success": true, "command": "threads",
                "body": {"threads": [{"id": 1, "name": "main"}]}}))
            .await;

        second.await.unwrap().unwrap();
        let threads = first.await.unwrap().unwrap();
        assert_eq!(threads.threads.len(), 1);
        assert_eq!(threads.threads[0].name, "main");
    }

    #[tokio::test]
    async fn test_events_are_forwarded() {
        let (mut client, mut adapter) = connect(Duration::from_secs(5));
        let mut events = client.take_event_receiver().unwrap();
        assert!(client.take_event_receiver().is_none());

        adapter
            .send(json!({"seq": 1, "type": "event", "event": "initialized"}))
            .await;
        assert!(matches!(events.recv().await, Some(Event::Initialized)));
    }

    #[tokio::test]
    async fn test_failed_response_is_request_error() {
        let (client, mut adapter) = connect(Duration::from_secs(5));
        let requester = client.requester();

        let pending = tokio::spawn(async move { requester.execute("next", None).await });
        let req = adapter.next_request().await;
        adapter
            .send(json!({"seq": 1, "type": "response", "request_seq": req["seq"],
                "success": false, "command": "next", "message": "not stopped"}))
            .await;

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "DAP request 'next' failed: not stopped");
    }

    #[tokio::test]
    async fn test_adapter_exit_fails_pending_requests() {
        let (client, mut adapter) = connect(Duration::from_secs(5));
        let requester = client.requester();

        let pending = tokio::spawn(async move { requester.execute("disconnect", None).await });
        adapter.next_request().await;
        drop(adapter);

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_adapter_closed());
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let (client, _adapter) = connect(Duration::from_millis(50));
        let err = client.requester().execute("threads", None).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { ref command, .. } if command == "threads"));
    }
}
