//! Utility binary for checking a single backend by hand
//!
//! Launches (or reaches) one backend, prints the operations it exposes and
//! optionally calls one of them. Not part of the dispatcher itself.

use agent_dispatch::dispatcher::{
    BackendClient, BackendConnector, BackendDescriptor, Lifecycle, TransportConnector,
};
use clap::Parser;
use std::time::Instant;
use tokio::time::timeout;

#[derive(Parser)]
#[command(name = "probe_backend", about = "Connect to one backend and list its operations")]
struct Cli {
    /// Launcher command, or base URL with --network
    target: String,

    /// Launcher arguments
    args: Vec<String>,

    /// Treat TARGET as the base URL of a network backend
    #[arg(long)]
    network: bool,

    /// Spawn a fresh process per request
    #[arg(long)]
    ephemeral: bool,

    /// Timeout per request in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Operation to call after discovery
    #[arg(long)]
    call: Option<String>,

    /// Arguments for --call as a JSON object
    #[arg(long, default_value = "{}")]
    call_args: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut descriptor = if cli.network {
        BackendDescriptor::network("probe", cli.target.clone())
    } else {
        BackendDescriptor::process("probe", cli.target.clone(), cli.args.clone())
    };
    descriptor.timeout_seconds = cli.timeout;
    if cli.ephemeral {
        descriptor.lifecycle = Lifecycle::Ephemeral;
    }
    descriptor
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid backend: {}", e))?;

    println!("1. Connecting to {}...", cli.target);
    let mut client = TransportConnector::new().client_for(&descriptor);
    let start = Instant::now();
    timeout(descriptor.timeout(), client.connect())
        .await
        .map_err(|_| anyhow::anyhow!("Connect timed out after {}s", cli.timeout))??;
    println!("   ✓ Connected in {:?}", start.elapsed());

    println!("\n2. Listing operations...");
    let operations = timeout(descriptor.timeout(), client.list_operations())
        .await
        .map_err(|_| anyhow::anyhow!("Discovery timed out after {}s", cli.timeout))??;
    for op in &operations {
        println!("   - {}: {}", op.name, op.description);
    }
    if operations.is_empty() {
        println!("   (none)");
    }

    if let Some(name) = &cli.call {
        println!("\n3. Calling {}...", name);
        let args: serde_json::Value = serde_json::from_str(&cli.call_args)?;
        match timeout(descriptor.timeout(), client.call(name, args)).await {
            Ok(Ok(result)) => println!("   ✓ {}", serde_json::to_string_pretty(&result)?),
            Ok(Err(e)) => eprintln!("   ✗ {}", e),
            Err(_) => eprintln!("   ✗ Timed out after {}s", cli.timeout),
        }
    }

    client.close().await?;
    println!("\nDone.");
    Ok(())
}
