//! chainscan - Main entry point
//!
//! Scans the debug targets described by server topology files and prints the
//! correlated device list or a snapshot of a single view.

mod config;

use anyhow::{Context, Result};
use chainscan_core::{Server, StaticServer};
use chainscan_discovery::{
    get_chipscope_view_snapshot, get_debugcore_view_snapshot, get_jtag_view_snapshot,
    get_memory_view_snapshot, DeviceScanner,
};
use chrono::SecondsFormat;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "chainscan")]
#[command(about = "Correlate debug targets across hardware and chipscope server views")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "chainscan.toml")]
    config: PathBuf,

    /// Hardware server topology file (overrides configuration)
    #[arg(long)]
    hw: Option<PathBuf>,

    /// Chipscope server topology file (overrides configuration)
    #[arg(long)]
    cs: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan all views and list the devices found
    Scan {
        /// Print compact JSON instead of the device table
        #[arg(long)]
        json: bool,
    },
    /// Print a full snapshot of one view
    Snapshot {
        #[arg(value_enum)]
        view: SnapshotView,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SnapshotView {
    Jtag,
    Memory,
    Debugcore,
    Chipscope,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so stdout stays machine-readable
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("chainscan v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;
    if let Some(hw) = args.hw {
        config.topology.hw_server = hw;
    }
    if args.cs.is_some() {
        config.topology.cs_server = args.cs;
    }

    let hw_server = StaticServer::from_file("hw_server", &config.topology.hw_server)
        .with_context(|| format!("loading {}", config.topology.hw_server.display()))?;
    let cs_server = match &config.topology.cs_server {
        Some(path) => Some(
            StaticServer::from_file("cs_server", path)
                .with_context(|| format!("loading {}", path.display()))?,
        ),
        None => None,
    };

    match args.command {
        Command::Scan { json } => {
            let scanner = DeviceScanner::with_config(
                Arc::new(hw_server),
                cs_server.map(|s| Arc::new(s) as Arc<dyn Server>),
                config.scanner,
            );
            let results = scanner.get_scan_results().await?;

            if json {
                println!("{}", results.to_json()?);
                return Ok(());
            }

            println!(
                "Discovered {} devices (scanned {}):",
                results.len(),
                results.scanned_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            );
            for device in results.iter() {
                let dna = device
                    .dna
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  - {} [{}] dna {}",
                    device.family.as_deref().unwrap_or("unknown"),
                    device
                        .node_identification
                        .first()
                        .map(|id| id.name.as_str())
                        .unwrap_or("?"),
                    dna
                );
                if let Some(cable) = &device.cable_name {
                    println!("    Cable: {} (index {})", cable, device.jtag_index.unwrap_or(-1));
                }
                for id in &device.node_identification {
                    println!("    {} {} ({})", id.server_type, id.hier_name, id.context);
                }
            }
        }
        Command::Snapshot { view } => match view {
            SnapshotView::Jtag => print_json(&get_jtag_view_snapshot(&hw_server).await?)?,
            SnapshotView::Memory => print_json(&get_memory_view_snapshot(&hw_server).await?)?,
            SnapshotView::Debugcore => {
                print_json(&get_debugcore_view_snapshot(&hw_server).await?)?
            }
            SnapshotView::Chipscope => {
                let cs_server = cs_server
                    .context("chipscope snapshot needs a chipscope server topology (--cs)")?;
                print_json(&get_chipscope_view_snapshot(&cs_server).await?)?
            }
        },
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
