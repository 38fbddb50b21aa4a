use anyhow::Result;
use clap::Parser;
use pve_inventory::{
    client::PveClient, config::Settings, export, inventory::InventoryCollector,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// PVE Inventory - CSV inventory exporter for Proxmox VE guest configurations
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Load configuration
    let settings = Settings::load(args.config.as_deref())?;

    // Initialize logging
    init_logging(&settings.export.log_level)?;

    info!("Starting PVE inventory export");
    info!("PVE endpoint: {}", settings.pve.endpoint);
    info!("Output: {}", settings.export.output);

    // Authenticate up front; an invalid ticket aborts the run
    let client = PveClient::new(settings.pve.clone())?;
    client.login().await?;

    // Walk the cluster and buffer normalized rows
    let collector = InventoryCollector::new(client, settings.export.clone());
    let (table, summary) = collector.collect().await?;

    // Emit the CSV with the frozen schema
    export::write_output(&settings.export.output, &table)?;

    if summary.failed > 0 {
        warn!(
            "Exported {} guests, {} failed (see error column)",
            summary.guests, summary.failed
        );
    } else {
        info!("Exported {} guests", summary.guests);
    }

    Ok(())
}

/// Initialize structured logging with tracing.
fn init_logging(log_level: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
