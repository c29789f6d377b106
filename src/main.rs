//! Beacon Tracker CLI
//!
//! Real-time RSSI multilateration service.

use beacon_tracker::{
    config::Config, AggregatedSample, AnchorRegistry, PositionEstimator, VERSION,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "beacon-tracker")]
#[command(version = VERSION)]
#[command(about = "Real-time RSSI multilateration service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion, aggregation and streaming service
    Serve {
        /// Address to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long)]
        port: Option<u16>,

        /// Anchor layout file
        #[arg(long)]
        anchors: Option<PathBuf>,
    },

    /// Show the anchor layout and the default position
    Anchors {
        /// Anchor layout file
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Solve one position from averaged readings given as ANCHOR=RSSI
    Locate {
        /// Anchor layout file
        #[arg(long)]
        anchors: Option<PathBuf>,

        /// Readings, e.g. A1=-72.5 A2=-80 A3=-77
        #[arg(required = true)]
        readings: Vec<String>,
    },

    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            anchors,
        } => {
            cmd_serve(host, port, anchors).await;
        }
        Commands::Anchors { path } => {
            cmd_anchors(path);
        }
        Commands::Locate { anchors, readings } => {
            cmd_locate(anchors, &readings);
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config, using defaults: {e}");
            Config::default()
        }
    }
}

#[cfg(feature = "server")]
async fn cmd_serve(host: Option<String>, port: Option<u16>, anchors: Option<PathBuf>) {
    use beacon_tracker::server::{run, ServerConfig};

    let mut config = load_config();
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(anchors) = anchors {
        config.anchors_path = anchors;
    }

    let registry = AnchorRegistry::load_or_empty(&config.anchors_path);
    let server_config = ServerConfig::from_config(&config, registry);

    let (addr, shutdown_tx) = match run(server_config).await {
        Ok(started) => started,
        Err(e) => {
            eprintln!("Error starting server: {e}");
            std::process::exit(1);
        }
    };

    println!("Beacon Tracker v{VERSION}");
    println!("  Readings:  POST http://{addr}/api/reading/ble");
    println!("  Positions: ws://{addr}/ws/position");
    println!();
    println!("Press Ctrl+C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Error waiting for Ctrl+C: {e}");
    }
    let _ = shutdown_tx.send(());

    // Let the server and scheduler wind down.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
}

#[cfg(not(feature = "server"))]
async fn cmd_serve(_host: Option<String>, _port: Option<u16>, _anchors: Option<PathBuf>) {
    eprintln!("Error: serve requires the server feature");
    std::process::exit(1);
}

fn cmd_anchors(path: Option<PathBuf>) {
    let path = path.unwrap_or_else(|| load_config().anchors_path);

    let registry = match AnchorRegistry::load(&path) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error loading {path:?}: {e}");
            std::process::exit(1);
        }
    };

    println!("Anchor layout ({path:?})");
    println!("=============");
    for anchor in registry.iter() {
        println!(
            "  {:<10} x={:>8.2}  y={:>8.2}",
            anchor.id, anchor.position.x, anchor.position.y
        );
    }
    let initial = registry.initial_position();
    println!();
    println!("Initial position: ({:.2}, {:.2})", initial.x, initial.y);
}

fn cmd_locate(anchors: Option<PathBuf>, readings: &[String]) {
    let path = anchors.unwrap_or_else(|| load_config().anchors_path);
    let registry = AnchorRegistry::load_or_empty(&path);

    let mut samples = Vec::new();
    for raw in readings {
        match parse_sample(raw) {
            Some(sample) => samples.push(sample),
            None => {
                eprintln!("Error: expected ANCHOR=RSSI, got '{raw}'");
                std::process::exit(1);
            }
        }
    }

    for sample in &samples {
        if !registry.contains(&sample.anchor_id) {
            eprintln!("Warning: anchor '{}' is not in the layout", sample.anchor_id);
        }
    }

    match PositionEstimator::default().estimate(&registry, &samples) {
        Some(estimate) => {
            println!("{}: ({:.3}, {:.3})", estimate.id, estimate.pos.x, estimate.pos.y);
        }
        None => {
            eprintln!("Not enough known anchors for a fix (need at least 3)");
            std::process::exit(2);
        }
    }
}

/// Parse `ANCHOR=RSSI`.
fn parse_sample(raw: &str) -> Option<AggregatedSample> {
    let (anchor, rssi) = raw.split_once('=')?;
    let anchor = anchor.trim();
    if anchor.is_empty() {
        return None;
    }
    let rssi: f64 = rssi.trim().parse().ok()?;
    Some(AggregatedSample::new(anchor, rssi))
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}
