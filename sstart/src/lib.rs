#![deny(missing_docs)]
//! Secrets aggregation runtime and MCP proxy.
//!
//! `sstart` turns a declarative provider graph into a consistent set of
//! key/value secrets, then either launches a child process with those
//! secrets in its environment (`run` mode) or serves an aggregating MCP
//! proxy whose child servers each get a tailored secret environment
//! (`mcp` mode).
//!
//! This crate composes the workspace: config file loading, the default
//! provider registry, and the two run modes. The moving parts live in
//! their own crates (`sstart-collector`, `sstart-mcp`, `sstart-sso`,
//! `sstart-cache`, and one crate per provider backend).

pub mod config_file;
pub mod mcp_mode;
pub mod registry;
pub mod run;

pub use config_file::load_config;
pub use registry::default_registry;

pub use sstart_collector::{CollectError, Collector};
pub use sstart_types::{Config, Secrets, mask, redact};
