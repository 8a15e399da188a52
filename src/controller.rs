//! Control loop
//!
//! Owns every interface state and the backend. Each tick samples all
//! interfaces in order and then flushes the backend once; shutdown restores
//! the starting cost of every elevated interface with one final flush.

use crate::backend::{self, CommitOutcome, RouterBackend};
use crate::config::MonitorConfig;
use crate::counters::SysfsCounters;
use crate::event_log::EventLog;
use crate::sampler::{Decision, SamplingEngine};
use crate::signals::Shutdown;
use crate::speed::{SpeedFiles, SpeedResolver, StaticSpeeds, SysfsSpeed};
use crate::state::InterfaceState;
use crate::{MonitorError, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Process lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Configured, backend not yet connected
    Starting,
    /// Starting costs known
    Connected,
    /// Polling
    Running,
    /// Restoring starting costs
    Draining,
    /// Costs restored, loop finished
    Stopped,
}

/// Outcome of one pass over all interfaces
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Decision per interface, in configuration order
    pub decisions: Vec<(String, Decision)>,
    /// Result of the end-of-tick flush
    pub commit: CommitOutcome,
}

/// Outcome of the shutdown restoration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Interfaces queued for restoration
    pub restored: usize,
    /// Result of the restoring flush
    pub commit: CommitOutcome,
}

/// Link-cost monitor
pub struct Monitor {
    interfaces: Vec<InterfaceState>,
    engine: SamplingEngine,
    backend: Box<dyn RouterBackend>,
    event_log: Option<EventLog>,
    poll_interval: Duration,
    state: Arc<RwLock<MonitorState>>,
    epoch: Instant,
}

impl Monitor {
    /// Create a monitor for `interfaces` (already de-duplicated)
    pub fn new(
        interfaces: Vec<String>,
        engine: SamplingEngine,
        backend: Box<dyn RouterBackend>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            interfaces: interfaces.into_iter().map(InterfaceState::new).collect(),
            engine,
            backend,
            event_log: None,
            poll_interval,
            state: Arc::new(RwLock::new(MonitorState::Starting)),
            epoch: Instant::now(),
        }
    }

    /// Attach an event log sink
    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.event_log = Some(log);
        self
    }

    /// Build the production monitor described by `config`
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        config.validate()?;

        let mut speeds =
            SpeedResolver::new().with_source(StaticSpeeds(config.speed_overrides_mbps.clone()));
        if let Some(dir) = &config.cfg_dir {
            speeds = speeds.with_source(SpeedFiles::new(dir));
        }
        let speeds = speeds.with_source(SysfsSpeed::new(&config.sysfs_root));

        let engine = SamplingEngine::new(
            config.thresholds(),
            Box::new(SysfsCounters::new(&config.sysfs_root)),
            speeds,
        );
        let monitor = Self::new(
            config.unique_interfaces(),
            engine,
            backend::from_config(config),
            config.poll_interval(),
        );

        match &config.event_log {
            Some(path) => Ok(monitor.with_event_log(EventLog::create(path)?)),
            None => Ok(monitor),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> MonitorState {
        *self.state.read()
    }

    /// Shared handle to the lifecycle state
    pub fn state_handle(&self) -> Arc<RwLock<MonitorState>> {
        self.state.clone()
    }

    /// Monitored interfaces in configuration order
    pub fn interfaces(&self) -> &[InterfaceState] {
        &self.interfaces
    }

    /// Connect the backend and record every starting cost
    pub async fn connect(&mut self) -> Result<()> {
        let names: Vec<String> = self.interfaces.iter().map(|i| i.name.clone()).collect();
        info!("Starting for interfaces: {}", names.join(", "));

        let costs = self.backend.connect(&names).await?;
        for iface in &mut self.interfaces {
            iface.starting_cost = *costs.get(&iface.name).ok_or_else(|| {
                MonitorError::Connect(format!("backend reported no starting cost for {}", iface.name))
            })?;
        }

        *self.state.write() = MonitorState::Connected;
        Ok(())
    }

    /// Wait `delay`, then connect, unless `shutdown` fires first.
    ///
    /// Returns `false` when shutdown won; the monitor is then `Stopped`
    /// without having touched any cost.
    pub async fn start(&mut self, delay: Duration, shutdown: &mut Shutdown) -> Result<bool> {
        let connected = tokio::select! {
            biased;
            _ = shutdown.wait() => None,
            result = async {
                tokio::time::sleep(delay).await;
                self.connect().await
            } => Some(result),
        };

        match connected {
            Some(result) => result.map(|()| true),
            None => {
                info!("Quitting before connect");
                *self.state.write() = MonitorState::Stopped;
                Ok(false)
            }
        }
    }

    /// Sample every interface at the current time, then flush once
    pub async fn tick(&mut self) -> Result<TickReport> {
        let now = self.epoch.elapsed().as_secs_f64();
        self.tick_at(now).await
    }

    /// Sample every interface at `now` seconds, then flush once
    pub async fn tick_at(&mut self, now: f64) -> Result<TickReport> {
        let mut decisions = Vec::with_capacity(self.interfaces.len());
        for iface in &mut self.interfaces {
            let sample = self.engine.sample(iface, now, self.backend.as_mut())?;
            if let (Some(log), Some(record)) = (self.event_log.as_mut(), &sample.record) {
                log.write(record)?;
            }
            decisions.push((iface.name.clone(), sample.decision));
        }
        if let Some(log) = self.event_log.as_mut() {
            log.flush()?;
        }

        let commit = self.backend.flush().await;
        Ok(TickReport { decisions, commit })
    }

    /// Poll until `shutdown` fires or a fatal error occurs, then drain
    pub async fn run(&mut self, shutdown: &mut Shutdown) -> Result<()> {
        *self.state.write() = MonitorState::Running;

        while !shutdown.is_triggered() {
            if let Err(e) = self.tick().await {
                error!("Fatal error, restoring costs before exit: {}", e);
                self.drain().await;
                return Err(e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.wait() => {}
            }
        }

        self.drain().await;
        Ok(())
    }

    /// Restore the starting cost of every elevated interface.
    ///
    /// Runs at most once; later calls return `None`.
    pub async fn drain(&mut self) -> Option<DrainReport> {
        {
            let mut state = self.state.write();
            if matches!(*state, MonitorState::Draining | MonitorState::Stopped) {
                return None;
            }
            *state = MonitorState::Draining;
        }
        info!("Quitting...");

        let mut restored = 0;
        for iface in self.interfaces.iter_mut().filter(|i| i.elevated) {
            info!(interface = %iface.name, "Setting cost to starting cost {}", iface.starting_cost);
            self.backend.queue_cost_change(&iface.name, iface.starting_cost);
            iface.elevated = false;
            restored += 1;
        }

        let commit = self.backend.flush().await;
        if let CommitOutcome::Failed { reason, .. } = &commit {
            warn!("Restoring starting costs failed: {}", reason);
        }
        if let Some(log) = self.event_log.as_mut() {
            if let Err(e) = log.flush() {
                warn!("Cannot flush event log: {}", e);
            }
        }

        *self.state.write() = MonitorState::Stopped;
        info!("Done");
        Some(DrainReport { restored, commit })
    }
}
