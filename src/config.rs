//! Monitor Configuration

use crate::backend::BackendKind;
use crate::retry::RetryPolicy;
use crate::state::Thresholds;
use crate::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Node name shown in log lines
    pub node_name: String,
    /// Interfaces to monitor
    pub interfaces: Vec<String>,
    /// Routing cost controller
    pub backend: BackendKind,
    /// Lower threshold as a fraction of link speed
    pub bottom_fraction: f64,
    /// Upper threshold as a fraction of link speed
    pub upper_fraction: f64,
    /// Cost advertised while congested
    pub elevated_cost: u32,
    /// Counter read interval
    pub poll_interval_ms: u64,
    /// EWMA weight of the newest sample
    pub ewm_alpha: f64,
    /// Directory holding `speed/<iface>` override files
    pub cfg_dir: Option<PathBuf>,
    /// Per-interface speed overrides in Mb/s
    pub speed_overrides_mbps: HashMap<String, u64>,
    /// Root of the kernel network class tree
    pub sysfs_root: PathBuf,
    /// Per-tick event log (CSV, `;` separated)
    pub event_log: Option<PathBuf>,
    /// Pause before connecting to the backend
    pub startup_delay_ms: u64,
    /// Scheduling niceness to request at startup
    pub niceness: Option<i32>,
    /// Upper bound for any single backend I/O operation
    pub io_timeout_ms: u64,
    /// Batch CLI (xorpsh) settings
    pub batch_cli: BatchCliConfig,
    /// Session (ospfd vty) settings
    pub session: SessionConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            node_name: "local".into(),
            interfaces: Vec::new(),
            backend: BackendKind::BatchCli,
            bottom_fraction: 0.7,
            upper_fraction: 0.9,
            elevated_cost: 100,
            poll_interval_ms: 200,
            ewm_alpha: 0.2,
            cfg_dir: None,
            speed_overrides_mbps: HashMap::new(),
            sysfs_root: PathBuf::from("/sys/class/net"),
            event_log: None,
            startup_delay_ms: 2000,
            niceness: Some(-20),
            io_timeout_ms: 5000,
            batch_cli: BatchCliConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load from file
    pub fn load(path: &str) -> std::result::Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save to file
    pub fn save(&self, path: &str) -> std::result::Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Check option ranges and threshold ordering
    pub fn validate(&self) -> Result<()> {
        if self.interfaces.is_empty() {
            return Err(MonitorError::Config("no interfaces to monitor".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(MonitorError::Config("poll interval must be positive".into()));
        }
        if self.session.query_attempts == 0 {
            return Err(MonitorError::Config("session query attempts must be positive".into()));
        }
        self.thresholds().validate()
    }

    /// Interfaces in request order with duplicates removed
    pub fn unique_interfaces(&self) -> Vec<String> {
        let mut seen = Vec::with_capacity(self.interfaces.len());
        for name in &self.interfaces {
            if !seen.contains(name) {
                seen.push(name.clone());
            }
        }
        seen
    }

    /// Hysteresis thresholds
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            bottom_fraction: self.bottom_fraction,
            upper_fraction: self.upper_fraction,
            elevated_cost: self.elevated_cost,
            ewm_alpha: self.ewm_alpha,
        }
    }

    /// Pause between ticks
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Bound for one backend I/O operation
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// xorpsh invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchCliConfig {
    /// Path of the `xorpsh` binary
    pub binary: PathBuf,
    /// OSPF area the interfaces belong to
    pub ospf_area: String,
    /// Text a successful commit prints
    pub success_marker: String,
}

impl Default for BatchCliConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/local/xorp/sbin/xorpsh"),
            ospf_area: "0.0.0.0".into(),
            success_marker: "OK".into(),
        }
    }
}

/// ospfd vty session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// `host:port` of the ospfd vty
    pub address: String,
    /// vty password
    pub password: String,
    /// Starting-cost queries per interface before giving up
    pub query_attempts: u32,
    /// Pause between starting-cost queries
    pub query_backoff_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: "localhost:2604".into(),
            password: "zebra".into(),
            query_attempts: RetryPolicy::SESSION_QUERY.max_attempts,
            query_backoff_ms: RetryPolicy::SESSION_QUERY.backoff.as_millis() as u64,
        }
    }
}
