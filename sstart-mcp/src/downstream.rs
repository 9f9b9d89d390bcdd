//! One child MCP server: process lifecycle, request correlation, and
//! primitive fetches.
//!
//! Each downstream owns a pending map (`request id -> oneshot sender`), a
//! single reader task draining the child's stdout, and a reaper task that
//! waits on the process. Requests go out in submission order through one
//! writer; responses correlate by normalized id and may arrive in any
//! order. Exactly one caller awaits each pending entry, and delivery
//! removes the entry atomically.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use sstart_types::Secrets;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;

use crate::PROTOCOL_VERSION;
use crate::error::McpError;
use crate::transport::{MessageReader, MessageWriter};
use crate::types::{Implementation, JsonRpcMessage, RequestId, ServerCapabilities};

/// How to launch one downstream server.
#[derive(Debug, Clone)]
pub struct DownstreamConfig {
    /// Unique id; namespace prefix for every primitive.
    pub id: String,
    /// Executable to spawn.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
}

/// Lifecycle state of a downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not running.
    Stopped,
    /// Spawn in progress.
    Starting,
    /// Process up, transport wired.
    Running,
    /// Shutdown signalled, reap pending.
    Stopping,
    /// Failed; routes to this id answer Internal until restart.
    Error,
}

type PendingMap = Arc<StdMutex<HashMap<RequestId, oneshot::Sender<JsonRpcMessage>>>>;

/// Lock a std mutex, recovering from poisoning: the protected maps stay
/// usable even if a task panicked mid-update.
fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Remove the pending entry for a response's id and deliver the message.
/// Returns false for stray messages (no id, or nothing waiting).
fn deliver_response(pending: &PendingMap, message: JsonRpcMessage) -> bool {
    let Some(id) = message.id.clone() else {
        return false;
    };
    let sender = lock(pending).remove(&id);
    match sender {
        Some(sender) => sender.send(message).is_ok(),
        None => false,
    }
}

/// A managed child MCP server.
pub struct Downstream {
    config: DownstreamConfig,
    secrets: Secrets,
    inherit: bool,
    state: Arc<StdMutex<ServerState>>,
    writer: Mutex<Option<MessageWriter<tokio::process::ChildStdin>>>,
    pending: PendingMap,
    next_id: AtomicI64,
    capabilities: StdMutex<Option<ServerCapabilities>>,
    server_info: StdMutex<Option<Implementation>>,
    initialized: AtomicBool,
    start_lock: Mutex<()>,
    cancel: CancellationToken,
}

impl Downstream {
    /// Create a downstream bound to `parent`'s lifetime. `secrets` are the
    /// environment entries assigned to this server; with `inherit` the
    /// parent environment is kept underneath them.
    pub fn new(
        config: DownstreamConfig,
        secrets: Secrets,
        inherit: bool,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            config,
            secrets,
            inherit,
            state: Arc::new(StdMutex::new(ServerState::Stopped)),
            writer: Mutex::new(None),
            pending: Arc::new(StdMutex::new(HashMap::new())),
            next_id: AtomicI64::new(1),
            capabilities: StdMutex::new(None),
            server_info: StdMutex::new(None),
            initialized: AtomicBool::new(false),
            start_lock: Mutex::new(()),
            cancel: parent.child_token(),
        }
    }

    /// The downstream id.
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        *lock(&self.state)
    }

    /// Capabilities reported by the child's initialize response.
    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        lock(&self.capabilities).clone()
    }

    /// The child's implementation info.
    pub fn server_info(&self) -> Option<Implementation> {
        lock(&self.server_info).clone()
    }

    /// Mark this downstream failed. Routes answer Internal until restart.
    pub fn mark_error(&self) {
        *lock(&self.state) = ServerState::Error;
    }

    /// Signal shutdown: the reaper kills and reaps the child, pending
    /// callers unblock via cancellation.
    pub fn stop(&self) {
        if self.state() == ServerState::Running {
            *lock(&self.state) = ServerState::Stopping;
        }
        self.cancel.cancel();
    }

    fn downstream_err(&self, message: impl Into<String>) -> McpError {
        McpError::Downstream {
            id: self.config.id.clone(),
            message: message.into(),
        }
    }

    /// Start and initialize lazily. `client_capabilities` are relayed from
    /// the upstream peer's own initialize request.
    pub async fn ensure_ready(
        &self,
        client_capabilities: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let _guard = self.start_lock.lock().await;
        match self.state() {
            ServerState::Running => {}
            ServerState::Stopped => self.start().await?,
            state => {
                return Err(self.downstream_err(format!("not routable in state {state:?}")));
            }
        }
        if !self.initialized.load(Ordering::Acquire) {
            self.initialize(client_capabilities).await?;
        }
        Ok(())
    }

    /// Spawn the child and wire up reader and reaper tasks.
    async fn start(&self) -> Result<(), McpError> {
        *lock(&self.state) = ServerState::Starting;
        tracing::debug!(downstream = %self.config.id, command = %self.config.command, "starting");

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // The child's diagnostics join the proxy's own stderr stream.
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if !self.inherit {
            command.env_clear();
        }
        command.envs(self.secrets.iter());

        let mut child = command.spawn().map_err(|e| {
            *lock(&self.state) = ServerState::Error;
            self.downstream_err(format!("cannot spawn {}: {e}", self.config.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.downstream_err("child stdin not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.downstream_err("child stdout not piped"))?;

        *self.writer.lock().await = Some(MessageWriter::new(stdin));
        *lock(&self.state) = ServerState::Running;

        tokio::spawn(reader_loop(
            self.config.id.clone(),
            MessageReader::new(stdout),
            Arc::clone(&self.pending),
            self.cancel.clone(),
        ));
        tokio::spawn(reaper_loop(
            self.config.id.clone(),
            child,
            Arc::clone(&self.state),
            self.cancel.clone(),
        ));

        Ok(())
    }

    /// MCP handshake: `initialize` with the proxy's client info and the
    /// upstream peer's capabilities, then `notifications/initialized`.
    async fn initialize(
        &self,
        client_capabilities: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": client_capabilities.unwrap_or_else(|| serde_json::json!({})),
            "clientInfo": {
                "name": "sstart",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let response = self.send_request("initialize", Some(params)).await?;
        if let Some(error) = &response.error {
            self.mark_error();
            return Err(self.downstream_err(format!("initialize failed: {}", error.message)));
        }
        let result = response
            .result
            .ok_or_else(|| self.downstream_err("initialize response missing result"))?;

        if let Some(capabilities) = result.get("capabilities") {
            match serde_json::from_value::<ServerCapabilities>(capabilities.clone()) {
                Ok(capabilities) => *lock(&self.capabilities) = Some(capabilities),
                Err(err) => {
                    tracing::warn!(downstream = %self.config.id, error = %err,
                        "unreadable capabilities; treating as none");
                }
            }
        }
        if let Some(info) = result.get("serverInfo") {
            if let Ok(info) = serde_json::from_value::<Implementation>(info.clone()) {
                *lock(&self.server_info) = Some(info);
            }
        }

        self.send_notification("notifications/initialized", None)
            .await?;
        self.initialized.store(true, Ordering::Release);
        tracing::debug!(downstream = %self.config.id, "initialized");
        Ok(())
    }

    /// Send a request with a fresh id and await its response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcMessage, McpError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let message = JsonRpcMessage::request(id.clone(), method, params);
        self.dispatch(message, Some(id)).await?.ok_or_else(|| {
            self.downstream_err("request produced no response")
        })
    }

    /// Send a notification (no correlation).
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.write(JsonRpcMessage::notification(method, params)).await
    }

    /// Forward a prebuilt message. Notifications are written and forgotten;
    /// requests install a pending entry under their (already normalized)
    /// id and await the matching response.
    pub async fn forward_request(
        &self,
        message: JsonRpcMessage,
    ) -> Result<Option<JsonRpcMessage>, McpError> {
        if message.is_notification() {
            self.write(message).await?;
            return Ok(None);
        }
        let id = message
            .id
            .clone()
            .ok_or_else(|| McpError::Protocol("cannot forward a message without an id".into()))?;
        self.dispatch(message, Some(id)).await
    }

    async fn dispatch(
        &self,
        message: JsonRpcMessage,
        correlate: Option<RequestId>,
    ) -> Result<Option<JsonRpcMessage>, McpError> {
        let waiter = correlate.map(|id| {
            let (sender, receiver) = oneshot::channel();
            lock(&self.pending).insert(id.clone(), sender);
            (id, receiver)
        });

        if let Err(err) = self.write(message).await {
            if let Some((id, _)) = &waiter {
                lock(&self.pending).remove(id);
            }
            return Err(err);
        }

        let Some((id, receiver)) = waiter else {
            return Ok(None);
        };

        tokio::select! {
            _ = self.cancel.cancelled() => {
                lock(&self.pending).remove(&id);
                Err(McpError::Cancelled)
            }
            response = receiver => match response {
                Ok(message) => Ok(Some(message)),
                Err(_) => Err(self.downstream_err("response channel closed")),
            }
        }
    }

    async fn write(&self, message: JsonRpcMessage) -> Result<(), McpError> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| self.downstream_err("not started"))?;
        writer.write_message(&message).await
    }

    /// Tools advertised by the child; empty when the capability is absent.
    pub async fn fetch_tools(&self) -> Result<Vec<serde_json::Value>, McpError> {
        if self.capabilities().and_then(|c| c.tools).is_none() {
            return Ok(Vec::new());
        }
        self.fetch_list("tools/list", "tools").await
    }

    /// Resources advertised by the child.
    pub async fn fetch_resources(&self) -> Result<Vec<serde_json::Value>, McpError> {
        if self.capabilities().and_then(|c| c.resources).is_none() {
            return Ok(Vec::new());
        }
        self.fetch_list("resources/list", "resources").await
    }

    /// Resource templates advertised by the child.
    pub async fn fetch_resource_templates(&self) -> Result<Vec<serde_json::Value>, McpError> {
        if self.capabilities().and_then(|c| c.resources).is_none() {
            return Ok(Vec::new());
        }
        self.fetch_list("resources/templates/list", "resourceTemplates")
            .await
    }

    /// Prompts advertised by the child.
    pub async fn fetch_prompts(&self) -> Result<Vec<serde_json::Value>, McpError> {
        if self.capabilities().and_then(|c| c.prompts).is_none() {
            return Ok(Vec::new());
        }
        self.fetch_list("prompts/list", "prompts").await
    }

    /// Call a `*/list` method and pull out the named array. The first page
    /// is treated as definitive.
    async fn fetch_list(
        &self,
        method: &str,
        field: &str,
    ) -> Result<Vec<serde_json::Value>, McpError> {
        let response = self
            .send_request(method, Some(serde_json::json!({})))
            .await?;
        if let Some(error) = &response.error {
            return Err(self.downstream_err(format!("{method} failed: {}", error.message)));
        }
        Ok(response
            .result
            .as_ref()
            .and_then(|r| r.get(field))
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

/// Drain the child's stdout, delivering responses to pending callers.
/// Stray messages (server-initiated requests, unknown ids) are ignored.
async fn reader_loop(
    id: String,
    mut reader: MessageReader<ChildStdout>,
    pending: PendingMap,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = reader.read_message() => match message {
                Ok(Some(message)) => {
                    if message.is_response() {
                        if !deliver_response(&pending, message) {
                            tracing::debug!(downstream = %id, "stray response ignored");
                        }
                    } else {
                        tracing::debug!(downstream = %id, method = ?message.method,
                            "ignoring message from downstream");
                    }
                }
                Ok(None) => {
                    tracing::debug!(downstream = %id, "stdout closed");
                    break;
                }
                Err(McpError::Protocol(err)) => {
                    tracing::warn!(downstream = %id, error = %err, "skipping unreadable line");
                }
                Err(err) => {
                    tracing::warn!(downstream = %id, error = %err, "read failed");
                    break;
                }
            }
        }
    }
}

/// Wait for the child to exit (or kill it on cancellation) and record the
/// final state.
async fn reaper_loop(
    id: String,
    mut child: Child,
    state: Arc<StdMutex<ServerState>>,
    cancel: CancellationToken,
) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => tracing::debug!(downstream = %id, %status, "exited"),
                Err(err) => tracing::warn!(downstream = %id, error = %err, "wait failed"),
            }
            *lock(&state) = ServerState::Stopped;
        }
        _ = cancel.cancelled() => {
            *lock(&state) = ServerState::Stopping;
            if let Err(err) = child.kill().await {
                tracing::debug!(downstream = %id, error = %err, "kill failed");
            }
            *lock(&state) = ServerState::Stopped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: RequestId) -> JsonRpcMessage {
        JsonRpcMessage::response(Some(id), serde_json::json!({"ok": true}))
    }

    #[test]
    fn deliver_matches_by_normalized_id() {
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let (sender, mut receiver) = oneshot::channel();
        lock(&pending).insert(RequestId::Number(1), sender);

        // A float id on the wire normalizes to the same integer key.
        let wire: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1.0,"result":{"ok":true}}"#).unwrap();
        assert!(deliver_response(&pending, wire));
        assert!(receiver.try_recv().is_ok());
        assert!(lock(&pending).is_empty());
    }

    #[test]
    fn stray_response_is_not_delivered() {
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        assert!(!deliver_response(&pending, response(RequestId::Number(42))));
    }

    #[test]
    fn delivery_removes_exactly_one_entry() {
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let (sender_a, _recv_a) = oneshot::channel();
        let (sender_b, _recv_b) = oneshot::channel();
        lock(&pending).insert(RequestId::Number(1), sender_a);
        lock(&pending).insert(RequestId::String("x".into()), sender_b);

        deliver_response(&pending, response(RequestId::Number(1)));
        let remaining = lock(&pending);
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains_key(&RequestId::String("x".into())));
    }

    #[cfg(unix)]
    fn stub_downstream(id: &str, cancel: &CancellationToken) -> Downstream {
        Downstream::new(crate::test_stub::stub_config(id), Secrets::new(), true, cancel)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_initialize_and_list_against_stub() {
        let cancel = CancellationToken::new();
        let downstream = stub_downstream("stub", &cancel);

        downstream.ensure_ready(None).await.unwrap();
        assert_eq!(downstream.state(), ServerState::Running);
        assert!(downstream.capabilities().and_then(|c| c.tools).is_some());
        assert_eq!(downstream.server_info().map(|i| i.name), Some("stub".into()));

        let tools = downstream.fetch_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "foo");

        // No prompts capability: fetched without touching the wire.
        assert!(downstream.fetch_prompts().await.unwrap().is_empty());

        downstream.stop();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn forward_request_preserves_the_upstream_id() {
        let cancel = CancellationToken::new();
        let downstream = stub_downstream("stub", &cancel);
        downstream.ensure_ready(None).await.unwrap();

        let request = JsonRpcMessage::request(
            RequestId::Number(99),
            "tools/call",
            Some(serde_json::json!({"name": "foo", "arguments": {}})),
        );
        let reply = downstream.forward_request(request).await.unwrap().unwrap();
        assert_eq!(reply.id, Some(RequestId::Number(99)));
        assert_eq!(reply.result.as_ref().unwrap()["content"][0]["text"], "ok-from-stub");

        downstream.stop();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_request_unblocks_the_caller() {
        let cancel = CancellationToken::new();
        // `cat` consumes requests and never answers.
        let downstream = Downstream::new(
            DownstreamConfig {
                id: "silent".into(),
                command: "cat".into(),
                args: vec![],
            },
            Secrets::new(),
            true,
            &cancel,
        );
        // Start without the handshake; send_request directly.
        downstream.start().await.unwrap();

        let request = downstream.send_request("ping", None);
        let cancel_after = async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(request, cancel_after);
        assert!(matches!(result, Err(McpError::Cancelled)));
    }
}
