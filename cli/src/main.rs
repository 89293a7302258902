//! chainprovider CLI: talk to a node through the provider from the terminal.
//!
//! Usage:
//! ```bash
//! # Send a single call
//! chainprovider call --url wss://ethereum-rpc.publicnode.com --method eth_blockNumber
//!
//! # Follow new block headers
//! chainprovider subscribe --url wss://ethereum-rpc.publicnode.com --topic newHeads --count 3
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tokio::time;
use tracing_subscriber::EnvFilter;

use chainprovider_core::{
    DenyAll, Provider, ProviderConfig, ProviderEvent, SubscriptionKind, Topic,
};
use chainprovider_ws::WsTransportConfig;

#[derive(Parser)]
#[command(
    name = "chainprovider",
    about = "Call methods and follow subscriptions through a ChainProvider",
    version
)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// WebSocket endpoint of the node
    #[arg(long, global = true, env = "CHAINPROVIDER_URL")]
    url: Option<String>,

    /// Accounts to treat as already authorized
    #[arg(long = "account", global = true)]
    accounts: Vec<String>,

    /// Seconds to wait for the connection and for each response
    #[arg(long, global = true, default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one JSON-RPC call and print its result
    Call {
        /// Method name, e.g. eth_blockNumber
        #[arg(long)]
        method: String,
        /// Params as a JSON array
        #[arg(long, default_value = "[]")]
        params: String,
    },

    /// Subscribe and print push notifications
    Subscribe {
        /// Subscription family
        #[arg(long, value_enum, default_value_t = Kind::Eth)]
        kind: Kind,
        /// Subscription topic, e.g. newHeads or logs
        #[arg(long)]
        topic: String,
        /// Extra params as a JSON array
        #[arg(long, default_value = "[]")]
        params: String,
        /// Stop after this many notifications
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Eth,
    Shh,
}

impl From<Kind> for SubscriptionKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Eth => SubscriptionKind::Eth,
            Kind::Shh => SubscriptionKind::Shh,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let url = cli
        .url
        .clone()
        .ok_or_else(|| anyhow!("--url is required (or set CHAINPROVIDER_URL)"))?;
    let timeout = Duration::from_secs(cli.timeout);
    let config = ProviderConfig::default().with_accounts(cli.accounts.clone());

    let (provider, _event_loop) =
        chainprovider_ws::connect(url.as_str(), WsTransportConfig::default(), Arc::new(DenyAll), config);
    wait_connected(&provider, timeout)
        .await
        .with_context(|| format!("connecting to {url}"))?;

    match cli.command {
        Commands::Call { method, params } => cmd_call(&provider, &method, &params, timeout).await,
        Commands::Subscribe {
            kind,
            topic,
            params,
            count,
        } => cmd_subscribe(&provider, kind.into(), &topic, &params, count, timeout).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn wait_connected(provider: &Provider, timeout: Duration) -> Result<()> {
    let mut connects = provider.listen(Topic::Connect);
    if provider.is_connected() {
        return Ok(());
    }
    time::timeout(timeout, connects.recv())
        .await
        .context("timed out waiting for the connection")?
        .context("provider stopped before connecting")?;
    Ok(())
}

fn parse_params(raw: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(raw).context("params must be valid JSON")? {
        Value::Array(params) => Ok(params),
        other => bail!("params must be a JSON array, got {other}"),
    }
}

async fn cmd_call(provider: &Provider, method: &str, params: &str, timeout: Duration) -> Result<()> {
    let params = parse_params(params)?;
    let result = time::timeout(timeout, provider.send(method, params))
        .await
        .with_context(|| format!("no response to {method} within {timeout:?}"))??;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_subscribe(
    provider: &Provider,
    kind: SubscriptionKind,
    topic: &str,
    params: &str,
    count: usize,
    timeout: Duration,
) -> Result<()> {
    let params = parse_params(params)?;
    let subs = provider
        .subscriptions()
        .context("transport does not support subscriptions")?;

    let id = time::timeout(timeout, subs.subscribe(kind, topic, params))
        .await
        .context("no response to subscribe")??;
    tracing::info!(subscription = %id, "subscribed");

    let mut pushes = provider.listen(Topic::Subscription(id.clone()));
    for _ in 0..count {
        match pushes.recv().await {
            Some(ProviderEvent::Subscription(Ok(value))) => {
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            Some(ProviderEvent::Subscription(Err(e))) => return Err(e.into()),
            Some(_) => {}
            None => break,
        }
    }

    let removed = time::timeout(timeout, subs.unsubscribe(kind, &id))
        .await
        .context("no response to unsubscribe")??;
    tracing::info!(subscription = %id, removed, "unsubscribed");
    Ok(())
}
