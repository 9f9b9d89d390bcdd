//! The sstart command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sstart::{default_registry, load_config, mcp_mode, run};
use sstart_cache::SecretCache;
use sstart_collector::Collector;
use sstart_sso::SsoClient;
use sstart_types::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sstart",
    version,
    about = "Launch commands and MCP servers with secrets injected from your providers"
)]
struct Cli {
    /// Config file (default: ./sstart.yaml, then the XDG config dir).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Collect only these provider ids (repeatable; default: all).
    #[arg(long = "provider", global = true, value_name = "ID")]
    providers: Vec<String>,

    /// Re-run the SSO flow even when already authenticated.
    #[arg(long, global = true)]
    force_auth: bool,

    /// Skip the secret cache for this invocation.
    #[arg(long, global = true)]
    no_cache: bool,

    /// Debug logging on stderr (same as SSTART_LOG=debug).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Launch a command with the collected secrets in its environment.
    Run {
        /// The command and its arguments (use `--` before flags).
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Serve the aggregating MCP proxy on stdio.
    Mcp,
    /// Run the SSO flow and persist the tokens.
    Login,
    /// Clear persisted SSO tokens.
    Logout,
    /// Inspect or clear the secret cache.
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Print entry counts.
    Stats,
    /// Drop every cached entry.
    Clear,
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("SSTART_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    // stdout belongs to the MCP wire in `mcp` mode; logs always go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_collector(config: &Config, cli: &Cli) -> anyhow::Result<Collector> {
    let mut collector = Collector::new(config.clone(), default_registry())?;
    if config.cache.enabled && !cli.no_cache {
        collector = collector.with_cache(SecretCache::with_keyring(config.cache.ttl()));
    }
    if let Some(sso) = &config.sso {
        collector = collector
            .with_sso(SsoClient::new(sso.clone()))
            .with_force_auth(cli.force_auth);
    }
    Ok(collector)
}

async fn execute(cli: Cli) -> anyhow::Result<i32> {
    match &cli.command {
        CliCommand::Run { command } => {
            let config = load_config(cli.config.as_deref())?;
            let collector = build_collector(&config, &cli)?;
            let secrets = collector.collect(&cli.providers).await?;

            let (program, args) = command
                .split_first()
                .ok_or_else(|| anyhow::anyhow!("run needs a command"))?;
            run::run_command(program, args, &secrets, config.inherit).await
        }
        CliCommand::Mcp => {
            let config = load_config(cli.config.as_deref())?;
            let collector = build_collector(&config, &cli)?;
            let proxy = mcp_mode::build_proxy(&config, &collector).await?;
            mcp_mode::serve(proxy).await?;
            Ok(0)
        }
        CliCommand::Login => {
            let config = load_config(cli.config.as_deref())?;
            let sso = config
                .sso
                .clone()
                .ok_or_else(|| anyhow::anyhow!("config has no sso section"))?;
            let client = SsoClient::new(sso);
            client.authenticate(cli.force_auth).await?;
            tracing::info!("signed in");
            Ok(0)
        }
        CliCommand::Logout => {
            let config = load_config(cli.config.as_deref())?;
            let sso = config
                .sso
                .clone()
                .ok_or_else(|| anyhow::anyhow!("config has no sso section"))?;
            SsoClient::new(sso).logout()?;
            tracing::info!("signed out");
            Ok(0)
        }
        CliCommand::Cache { command } => {
            let config = load_config(cli.config.as_deref())?;
            let cache = SecretCache::with_keyring(config.cache.ttl());
            match command {
                CacheCommand::Stats => {
                    let stats = cache.stats();
                    println!(
                        "total: {}  valid: {}  expired: {}",
                        stats.total, stats.valid, stats.expired
                    );
                }
                CacheCommand::Clear => {
                    cache.clear();
                    println!("cache cleared");
                }
            }
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!("{err:#}");
            std::process::exit(1);
        }
    }
}
