//! Newline-delimited JSON framing over byte pipes.
//!
//! One JSON-RPC message per line, which is what MCP stdio servers speak.
//! [`PipeTransport`] owns both halves; [`PipeTransport::into_split`] hands
//! the read half to a reader task and the write half to whoever sends.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::McpError;
use crate::types::JsonRpcMessage;

/// Reads framed messages from a byte stream.
pub struct MessageReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin + Send> MessageReader<R> {
    /// Wrap a read half.
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Read the next message. `Ok(None)` is clean EOF. A line that is not
    /// valid JSON-RPC is a [`McpError::Protocol`]; the stream itself is
    /// still usable afterwards.
    pub async fn read_message(&mut self) -> Result<Option<JsonRpcMessage>, McpError> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .inner
                .read_line(&mut line)
                .await
                .map_err(|e| McpError::Transport(e.to_string()))?;
            if read == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_str(trimmed)
                .map(Some)
                .map_err(|e| McpError::Protocol(format!("invalid JSON-RPC message: {e}")));
        }
    }
}

/// Writes framed messages to a byte stream.
pub struct MessageWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> MessageWriter<W> {
    /// Wrap a write half.
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    /// Serialize and write one message, newline-terminated, flushed.
    pub async fn write_message(&mut self, message: &JsonRpcMessage) -> Result<(), McpError> {
        let mut json = serde_json::to_string(message)
            .map_err(|e| McpError::Protocol(format!("cannot serialize message: {e}")))?;
        json.push('\n');
        self.inner
            .write_all(json.as_bytes())
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;
        self.inner
            .flush()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))
    }
}

/// Both halves of a framed connection.
pub struct PipeTransport<R, W> {
    reader: MessageReader<R>,
    writer: MessageWriter<W>,
}

impl<R: AsyncRead + Unpin + Send, W: AsyncWrite + Unpin + Send> PipeTransport<R, W> {
    /// Wrap a read/write pair.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: MessageReader::new(reader),
            writer: MessageWriter::new(writer),
        }
    }

    /// Read the next message. See [`MessageReader::read_message`].
    pub async fn read_message(&mut self) -> Result<Option<JsonRpcMessage>, McpError> {
        self.reader.read_message().await
    }

    /// Write one message. See [`MessageWriter::write_message`].
    pub async fn write_message(&mut self, message: &JsonRpcMessage) -> Result<(), McpError> {
        self.writer.write_message(message).await
    }

    /// Split into independently owned halves.
    pub fn into_split(self) -> (MessageReader<R>, MessageWriter<W>) {
        (self.reader, self.writer)
    }
}

/// The proxy's upstream transport: this process's stdin/stdout.
pub fn stdio() -> PipeTransport<tokio::io::Stdin, tokio::io::Stdout> {
    PipeTransport::new(tokio::io::stdin(), tokio::io::stdout())
}
