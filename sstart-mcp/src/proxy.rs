//! The upstream-facing proxy loop.
//!
//! One reader loop serves the upstream peer. `initialize` is answered
//! locally and downstream children start lazily, on the first aggregated
//! list or routed call that needs them. Aggregated list handlers hold a
//! write lock while fanning out, so concurrent list requests from the
//! upstream are serialized; per-downstream failures degrade to warnings to
//! keep the remaining children available.

use std::sync::{Arc, Mutex as StdMutex};

use sstart_types::Secrets;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::PROTOCOL_VERSION;
use crate::downstream::{Downstream, DownstreamConfig};
use crate::error::McpError;
use crate::transport::PipeTransport;
use crate::types::{
    INTERNAL_ERROR, INVALID_PARAMS, Implementation, InitializeResult, JsonRpcMessage,
    METHOD_NOT_FOUND, PARSE_ERROR, PromptsCapability, RequestId, ResourcesCapability,
    ServerCapabilities, ToolsCapability,
};

/// Which primitive category an aggregated list serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Tools,
    Resources,
    ResourceTemplates,
    Prompts,
}

impl ListKind {
    /// The result field carrying the items.
    fn field(self) -> &'static str {
        match self {
            ListKind::Tools => "tools",
            ListKind::Resources => "resources",
            ListKind::ResourceTemplates => "resourceTemplates",
            ListKind::Prompts => "prompts",
        }
    }
}

/// Split `<downstream_id>/<original>` on the first slash. Both halves must
/// be non-empty.
fn split_namespaced(value: &str) -> Result<(&str, &str), McpError> {
    match value.split_once('/') {
        Some((prefix, rest)) if !prefix.is_empty() && !rest.is_empty() => Ok((prefix, rest)),
        _ => Err(McpError::Route(format!(
            "expected <downstream_id>/<name>, got '{value}'"
        ))),
    }
}

/// Prefix a string field in place; non-string or absent fields are left
/// alone.
fn prefix_field(
    object: &mut serde_json::Map<String, serde_json::Value>,
    field: &str,
    prefix: &str,
) {
    if let Some(serde_json::Value::String(value)) = object.get_mut(field) {
        *value = format!("{prefix}/{value}");
    }
}

/// Namespace one listed primitive under its downstream's id.
fn namespace_item(
    prefix: &str,
    kind: ListKind,
    mut item: serde_json::Value,
) -> serde_json::Value {
    if let Some(object) = item.as_object_mut() {
        match kind {
            ListKind::Tools | ListKind::Prompts => prefix_field(object, "name", prefix),
            ListKind::Resources => {
                prefix_field(object, "uri", prefix);
                prefix_field(object, "name", prefix);
            }
            ListKind::ResourceTemplates => {
                prefix_field(object, "uriTemplate", prefix);
                prefix_field(object, "name", prefix);
            }
        }
    }
    item
}

/// The capabilities this proxy advertises upstream: static, since the
/// aggregate never signals list changes or subscriptions.
fn aggregated_capabilities() -> ServerCapabilities {
    ServerCapabilities {
        tools: Some(ToolsCapability {
            list_changed: Some(false),
        }),
        resources: Some(ResourcesCapability {
            subscribe: Some(false),
            list_changed: Some(false),
        }),
        prompts: Some(PromptsCapability {
            list_changed: Some(false),
        }),
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Single stdio MCP endpoint aggregating multiple child MCP servers.
pub struct McpProxy {
    info: Implementation,
    downstreams: Vec<Arc<Downstream>>,
    client_info: StdMutex<Option<serde_json::Value>>,
    client_capabilities: StdMutex<Option<serde_json::Value>>,
    list_lock: Mutex<()>,
    cancel: CancellationToken,
}

impl McpProxy {
    /// Create a proxy identifying itself as `info` upstream.
    pub fn new(info: Implementation) -> Self {
        Self {
            info,
            downstreams: Vec::new(),
            client_info: StdMutex::new(None),
            client_capabilities: StdMutex::new(None),
            list_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    /// Add a downstream with its assigned secret environment.
    #[must_use]
    pub fn with_downstream(
        mut self,
        config: DownstreamConfig,
        secrets: Secrets,
        inherit: bool,
    ) -> Self {
        self.downstreams
            .push(Arc::new(Downstream::new(config, secrets, inherit, &self.cancel)));
        self
    }

    /// The root cancellation token; cancelling it is equivalent to
    /// [`stop`](McpProxy::stop).
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn downstream(&self, id: &str) -> Option<&Arc<Downstream>> {
        self.downstreams.iter().find(|d| d.id() == id)
    }

    /// Serve the upstream peer until EOF, fatal transport error, or
    /// [`stop`](McpProxy::stop).
    pub async fn run<R, W>(&self, transport: &mut PipeTransport<R, W>) -> Result<(), McpError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.stop();
                    return Ok(());
                }
                message = transport.read_message() => match message {
                    Ok(Some(message)) => {
                        if let Some(reply) = self.handle(message).await {
                            transport.write_message(&reply).await?;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("upstream closed; shutting down");
                        self.stop();
                        return Ok(());
                    }
                    Err(McpError::Protocol(err)) => {
                        tracing::warn!(error = %err, "unparseable upstream message");
                        let reply = JsonRpcMessage::error_response(
                            Some(RequestId::Null),
                            PARSE_ERROR,
                            err,
                        );
                        transport.write_message(&reply).await?;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "upstream read failed");
                        self.stop();
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Signal every downstream and cancel the root context. Pending
    /// request channels unblock via cancellation.
    pub fn stop(&self) {
        for downstream in &self.downstreams {
            downstream.stop();
        }
        self.cancel.cancel();
    }

    /// Dispatch one upstream message; `None` means nothing goes back.
    async fn handle(&self, message: JsonRpcMessage) -> Option<JsonRpcMessage> {
        let method = message.method.clone()?;
        match method.as_str() {
            "initialize" => Some(self.handle_initialize(message)),
            "notifications/initialized"
            | "notifications/cancelled"
            | "notifications/progress" => None,
            "ping" => message
                .is_request()
                .then(|| JsonRpcMessage::response(message.id, serde_json::json!({}))),
            "tools/list" => self.handle_list(message, ListKind::Tools).await,
            "resources/list" => self.handle_list(message, ListKind::Resources).await,
            "resources/templates/list" => {
                self.handle_list(message, ListKind::ResourceTemplates).await
            }
            "prompts/list" => self.handle_list(message, ListKind::Prompts).await,
            "tools/call" => self.route(message, "name").await,
            "resources/read" => self.route(message, "uri").await,
            "prompts/get" => self.route(message, "name").await,
            other => {
                if message.is_request() {
                    Some(JsonRpcMessage::error_response(
                        message.id,
                        METHOD_NOT_FOUND,
                        format!("unknown method: {other}"),
                    ))
                } else {
                    tracing::debug!(method = %other, "dropping unknown notification");
                    None
                }
            }
        }
    }

    /// Record the peer's identity and answer with the aggregate's info.
    /// Children are not started here; initialization stays lazy.
    fn handle_initialize(&self, message: JsonRpcMessage) -> JsonRpcMessage {
        if let Some(params) = &message.params {
            *lock(&self.client_info) = params.get("clientInfo").cloned();
            *lock(&self.client_capabilities) = params.get("capabilities").cloned();
        }
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: aggregated_capabilities(),
            server_info: self.info.clone(),
        };
        let payload = serde_json::to_value(result).unwrap_or_default();
        JsonRpcMessage::response(message.id, payload)
    }

    /// Aggregated fan-out for a `*/list` method. Per-downstream failures
    /// are warnings; the remaining downstreams still contribute.
    async fn handle_list(
        &self,
        message: JsonRpcMessage,
        kind: ListKind,
    ) -> Option<JsonRpcMessage> {
        if !message.is_request() {
            return None;
        }
        let _guard = self.list_lock.lock().await;
        let client_capabilities = lock(&self.client_capabilities).clone();

        let mut items = Vec::new();
        for downstream in &self.downstreams {
            if let Err(err) = downstream.ensure_ready(client_capabilities.clone()).await {
                tracing::warn!(downstream = %downstream.id(), error = %err,
                    "skipping downstream in aggregation");
                continue;
            }
            let fetched = match kind {
                ListKind::Tools => downstream.fetch_tools().await,
                ListKind::Resources => downstream.fetch_resources().await,
                ListKind::ResourceTemplates => downstream.fetch_resource_templates().await,
                ListKind::Prompts => downstream.fetch_prompts().await,
            };
            match fetched {
                Ok(list) => items.extend(
                    list.into_iter()
                        .map(|item| namespace_item(downstream.id(), kind, item)),
                ),
                Err(err) => {
                    tracing::warn!(downstream = %downstream.id(), error = %err,
                        "list fetch failed; continuing with the rest");
                }
            }
        }

        Some(JsonRpcMessage::response(
            message.id,
            serde_json::json!({ kind.field(): items }),
        ))
    }

    /// Route a namespaced call to its downstream and relay the response.
    async fn route(&self, message: JsonRpcMessage, field: &str) -> Option<JsonRpcMessage> {
        if !message.is_request() {
            return None;
        }
        let id = message.id.clone();
        match self.route_inner(message, field).await {
            Ok(reply) => reply,
            Err(McpError::Route(err)) => {
                Some(JsonRpcMessage::error_response(id, INVALID_PARAMS, err))
            }
            Err(err) => Some(JsonRpcMessage::error_response(
                id,
                INTERNAL_ERROR,
                err.to_string(),
            )),
        }
    }

    async fn route_inner(
        &self,
        mut message: JsonRpcMessage,
        field: &str,
    ) -> Result<Option<JsonRpcMessage>, McpError> {
        let params = message
            .params
            .as_mut()
            .and_then(serde_json::Value::as_object_mut)
            .ok_or_else(|| McpError::Route(format!("missing params.{field}")))?;
        let namespaced = params
            .get(field)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| McpError::Route(format!("missing params.{field}")))?
            .to_string();

        let (prefix, original) = split_namespaced(&namespaced)?;
        let downstream = self
            .downstream(prefix)
            .ok_or_else(|| McpError::Route(format!("unknown downstream: {prefix}")))?;

        params.insert(
            field.to_string(),
            serde_json::Value::String(original.to_string()),
        );

        let client_capabilities = lock(&self.client_capabilities).clone();
        downstream.ensure_ready(client_capabilities).await?;
        downstream.forward_request(message).await.map_err(|err| {
            downstream.mark_error();
            err
        })
    }
}
