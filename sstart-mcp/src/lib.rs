#![deny(missing_docs)]
//! Aggregating MCP proxy.
//!
//! [`McpProxy`] serves the Model Context Protocol (JSON-RPC 2.0 over
//! stdio, protocol version `2024-11-05`) to one upstream peer and fans out
//! to any number of child MCP servers, each spawned with its own secret
//! environment.
//!
//! Aggregated primitives are namespaced `<downstream_id>/<original_name>`
//! so that two children advertising the same tool never collide; calls are
//! routed back by splitting on the first `/`.
//!
//! ## Layout
//!
//! - [`types`]: the JSON-RPC message model and id normalization;
//! - [`transport`]: newline-delimited JSON framing over any byte pipe;
//! - [`downstream`]: child process lifecycle and request correlation;
//! - [`proxy`]: the upstream-facing server loop.

pub mod downstream;
mod error;
pub mod proxy;
#[cfg(test)]
mod test_stub;
pub mod transport;
pub mod types;

pub use downstream::{Downstream, DownstreamConfig, ServerState};
pub use error::McpError;
pub use proxy::McpProxy;
pub use transport::{MessageReader, MessageWriter, PipeTransport, stdio};
pub use types::{JsonRpcError, JsonRpcMessage, RequestId};

/// MCP protocol version spoken on both sides of the proxy.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
