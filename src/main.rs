use anyhow::Result;
use clap::Parser;
use fabric_monitor::config::AppConfig;
use fabric_monitor::monitor::Monitor;
use fabric_monitor::types::{GroupSource, HistoryType, PortSource};
use log::{info, warn};
use std::path::PathBuf;
use std::time::Duration;

/// fabric-monitor - Live and historical fabric telemetry from a shared poller
#[derive(Parser, Debug, Clone)]
#[command(name = "fabric-monitor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Global refresh rate in milliseconds
    #[arg(short = 'r', long = "refresh-ms", value_name = "MS")]
    refresh_ms: Option<u64>,

    /// Sweep interval of the simulated fabric in milliseconds
    #[arg(short = 's', long = "sweep-ms", value_name = "MS")]
    sweep_ms: Option<u64>,

    /// History window (current, 15m, 1h, 6h, 24h)
    #[arg(short = 'H', long = "history", value_name = "TYPE")]
    history: Option<HistoryType>,

    /// Device group to watch, repeatable (defaults to "All")
    #[arg(short = 'g', long = "group", value_name = "NAME")]
    groups: Vec<String>,

    /// Port to watch as LID:PORT, repeatable (e.g., -p 5:1)
    #[arg(short = 'p', long = "port", value_name = "LID:PORT")]
    ports: Vec<PortSource>,

    /// How long to run before shutting down
    #[arg(short = 't', long = "duration-secs", value_name = "SECS", default_value = "30")]
    duration_secs: u64,

    /// Config file to load instead of the default location
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write the effective configuration back before starting
    #[arg(long = "save-config")]
    save_config: bool,

    /// Debug verbosity level (0=quiet, 1=info, 2=debug, 3=trace)
    #[arg(short = 'd', long = "debug", value_name = "LEVEL", default_value = "0")]
    debug: u8,
}

impl Cli {
    /// Layer command line overrides on top of a loaded config
    fn apply(&self, config: &mut AppConfig) {
        if let Some(refresh_ms) = self.refresh_ms {
            config.engine.refresh_rate_ms = refresh_ms;
        }
        if let Some(sweep_ms) = self.sweep_ms {
            config.simulation.sweep_interval_ms = sweep_ms;
        }
        if let Some(history) = self.history {
            config.engine.history_type = history;
        }
        if !self.groups.is_empty() {
            config.watch.groups = self.groups.iter().map(GroupSource::new).collect();
        }
        if !self.ports.is_empty() {
            config.watch.ports = self.ports.clone();
        }
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Level 0 (default): warn only
    // Level 1: info
    // Level 2: debug
    // Level 3+: trace
    let log_level = match cli.debug {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    // Allow RUST_LOG to override CLI setting
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    warn!("Starting fabric-monitor v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {:#}", e);
            AppConfig::default()
        }),
    };
    cli.apply(&mut config);

    if cli.save_config {
        match &cli.config {
            Some(path) => config.save_to_path(path)?,
            None => config.save()?,
        }
        info!("Configuration saved");
    }

    let monitor = Monitor::start(&config)?;
    println!(
        "Watching fabric every {} ms ({} history) for {} s",
        config.engine.effective_refresh_rate_ms(),
        config.engine.history_type,
        cli.duration_secs
    );

    monitor.run_for(Duration::from_secs(cli.duration_secs), |event| {
        println!("{} {}", chrono::Local::now().format("%H:%M:%S%.3f"), event);
    });

    let report = monitor.shutdown();
    println!("Stopped: {}", report);
    Ok(())
}
