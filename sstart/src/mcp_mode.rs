//! `mcp` mode: collect per-server secrets, then serve the proxy on stdio.

use sstart_collector::Collector;
use sstart_mcp::downstream::DownstreamConfig;
use sstart_mcp::types::Implementation;
use sstart_mcp::{McpProxy, transport};
use sstart_types::Config;

/// Build the proxy: one collect per configured server, restricted to that
/// server's provider selection (empty selection means all providers).
pub async fn build_proxy(config: &Config, collector: &Collector) -> anyhow::Result<McpProxy> {
    let Some(mcp) = &config.mcp else {
        anyhow::bail!("config has no mcp.servers section; nothing to serve");
    };
    if mcp.servers.is_empty() {
        anyhow::bail!("mcp.servers is empty; nothing to serve");
    }

    let mut proxy = McpProxy::new(Implementation {
        name: "sstart".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    });

    for server in &mcp.servers {
        let secrets = collector.collect(&server.providers).await?;
        tracing::debug!(server = %server.id, secrets = secrets.len(), "assigned secrets");
        proxy = proxy.with_downstream(
            DownstreamConfig {
                id: server.id.clone(),
                command: server.command.clone(),
                args: server.args.clone(),
            },
            secrets,
            config.inherit,
        );
    }

    Ok(proxy)
}

/// Serve the proxy over this process's stdin/stdout until the upstream
/// peer disconnects or Ctrl-C arrives.
pub async fn serve(proxy: McpProxy) -> anyhow::Result<()> {
    let mut upstream = transport::stdio();

    let cancel = proxy.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupt received; stopping proxy");
            cancel.cancel();
        }
    });

    proxy.run(&mut upstream).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sstart_provider::ProviderRegistry;
    use std::sync::Arc;

    #[tokio::test]
    async fn config_without_mcp_section_is_rejected() {
        let config: Config = serde_yaml::from_str("providers: []").unwrap();
        let collector =
            Collector::new(config.clone(), Arc::new(ProviderRegistry::new())).unwrap();
        assert!(build_proxy(&config, &collector).await.is_err());
    }

    #[tokio::test]
    async fn builds_one_downstream_per_server() {
        let yaml = r#"
providers: []
mcp:
  servers:
    - id: a
      command: mcp-a
    - id: b
      command: mcp-b
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let collector =
            Collector::new(config.clone(), Arc::new(ProviderRegistry::new())).unwrap();
        // Children are not spawned at build time; lazy startup means this
        // succeeds even though mcp-a/mcp-b do not exist.
        let proxy = build_proxy(&config, &collector).await.unwrap();
        drop(proxy);
    }
}
