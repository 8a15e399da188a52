//! Link-Cost Monitor - Main Entry Point
//!
//! ```bash
//! linkcost-monitor -vv --ctrl quagga --cost 200 eth0 eth1
//! linkcost-monitor --config /etc/linkcost/monitor.json --log /var/log/linkcost.csv
//! ```

use clap::Parser;
use linkcost_monitor::{priority, signals, BackendKind, Monitor, MonitorConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Instrument;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "linkcost-monitor")]
#[command(version)]
#[command(about = "Traffic-aware OSPF link-cost controller", long_about = None)]
struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(long, env = "LINKCOST_CONFIG")]
    config: Option<String>,

    /// Node name shown in log lines
    #[arg(long, short = 'n')]
    name: Option<String>,

    /// Routing cost controller
    #[arg(long = "ctrl", short = 'C')]
    backend: Option<BackendKind>,

    /// Bottom threshold as a fraction of link speed
    #[arg(long, short = 'b')]
    bottom: Option<f64>,

    /// Upper threshold as a fraction of link speed
    #[arg(long, short = 'u')]
    upper: Option<f64>,

    /// Cost in the elevated state
    #[arg(long, short = 'c')]
    cost: Option<u32>,

    /// Counter read interval in ms
    #[arg(long, short = 'i')]
    interval: Option<u64>,

    /// Exponential moving average weight
    #[arg(long = "ewm-alpha", short = 's')]
    ewm_alpha: Option<f64>,

    /// Directory with `speed/<iface>` override files
    #[arg(long, short = 'd')]
    cfgdir: Option<PathBuf>,

    /// Per-tick event log file
    #[arg(long)]
    log: Option<PathBuf>,

    /// Verbosity (-v info, -vv debug)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Interfaces to monitor
    #[arg(value_name = "IFACE")]
    interfaces: Vec<String>,
}

impl Cli {
    fn into_config(self) -> Result<MonitorConfig, std::io::Error> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::load(path)?,
            None => MonitorConfig::default(),
        };

        if let Some(name) = self.name {
            config.node_name = name;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(bottom) = self.bottom {
            config.bottom_fraction = bottom;
        }
        if let Some(upper) = self.upper {
            config.upper_fraction = upper;
        }
        if let Some(cost) = self.cost {
            config.elevated_cost = cost;
        }
        if let Some(interval) = self.interval {
            config.poll_interval_ms = interval;
        }
        if let Some(alpha) = self.ewm_alpha {
            config.ewm_alpha = alpha;
        }
        if self.cfgdir.is_some() {
            config.cfg_dir = self.cfgdir;
        }
        if self.log.is_some() {
            config.event_log = self.log;
        }
        if !self.interfaces.is_empty() {
            config.interfaces = self.interfaces;
        }
        Ok(config)
    }
}

fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter(cli.verbose).into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = cli.into_config()?;
    let span = tracing::info_span!("monitor", node = %config.node_name);

    async move {
        tracing::info!("Link-Cost Monitor v{}", env!("CARGO_PKG_VERSION"));

        let mut monitor = Monitor::from_config(&config)?;
        let mut shutdown = signals::listen()?;

        if let Some(niceness) = config.niceness {
            priority::raise(niceness);
        }
        let delay = Duration::from_millis(config.startup_delay_ms);
        if monitor.start(delay, &mut shutdown).await? {
            monitor.run(&mut shutdown).await?;
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    }
    .instrument(span)
    .await
}
