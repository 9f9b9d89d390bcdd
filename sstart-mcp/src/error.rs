//! Error type for the MCP layer.

use thiserror::Error;

/// Errors from transports, downstreams, and routing.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum McpError {
    /// Read/write failure on a stdio pipe.
    #[error("transport error: {0}")]
    Transport(String),

    /// A peer violated the JSON-RPC or MCP protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A specific downstream failed.
    #[error("downstream '{id}': {message}")]
    Downstream {
        /// The downstream id.
        id: String,
        /// What went wrong.
        message: String,
    },

    /// A namespaced identifier could not be routed.
    #[error("invalid namespaced identifier: {0}")]
    Route(String),

    /// The operation was cancelled by shutdown.
    #[error("cancelled")]
    Cancelled,

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
