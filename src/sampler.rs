//! Sampling engine
//!
//! Turns one counter reading per interface into a cost decision and queues
//! the resulting change on the backend. No backend I/O happens here.

use crate::backend::RouterBackend;
use crate::counters::{CounterSource, Direction};
use crate::event_log::{EventRecord, EventTag};
use crate::speed::SpeedResolver;
use crate::state::{InterfaceState, Observation, Thresholds, Transition};
use crate::{MonitorError, Result};
use chrono::Utc;
use tracing::{debug, error, info, warn};

/// Why an interface produced no decision this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Link speed unknown
    NoSpeed,
    /// First counter reading
    Seed,
    /// Counter went backwards
    Reset,
    /// Clock did not advance
    NoElapsedTime,
}

/// Per-interface outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Cost raised to the elevated value
    Raise {
        /// Elevated cost queued
        cost: u32,
    },
    /// Cost restored to the starting value
    Lower {
        /// Starting cost queued
        cost: u32,
    },
    /// Load inside the hysteresis band
    None,
    /// Nothing evaluated
    Skip(SkipReason),
}

/// Decision plus the event log line it produced, if any
#[derive(Debug, Clone)]
pub struct Sample {
    /// What happened to the interface
    pub decision: Decision,
    /// Event log line, absent for skipped ticks
    pub record: Option<EventRecord>,
}

impl Sample {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            decision: Decision::Skip(reason),
            record: None,
        }
    }
}

/// Samples interfaces and drives their hysteresis state
pub struct SamplingEngine {
    thresholds: Thresholds,
    counters: Box<dyn CounterSource>,
    speeds: SpeedResolver,
}

impl SamplingEngine {
    /// Engine reading counters from `counters` and speeds from `speeds`
    pub fn new(thresholds: Thresholds, counters: Box<dyn CounterSource>, speeds: SpeedResolver) -> Self {
        Self {
            thresholds,
            counters,
            speeds,
        }
    }

    /// Active thresholds
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Sample `iface` at `now` (seconds on a monotonic clock).
    ///
    /// A counter read failure is returned as an error: continuing would
    /// compute rates across an unknown gap.
    pub fn sample(
        &self,
        iface: &mut InterfaceState,
        now: f64,
        backend: &mut dyn RouterBackend,
    ) -> Result<Sample> {
        iface.speed_bps = self.speeds.speed_bps(&iface.name);
        let speed_bps = match iface.speed_bps {
            Some(speed) => speed,
            None => {
                error!(interface = %iface.name, "Cannot read speed");
                return Ok(Sample::skipped(SkipReason::NoSpeed));
            }
        };
        let bounds = self.thresholds.bounds(speed_bps);

        let reading = self
            .counters
            .read(&iface.name, Direction::Tx)
            .map_err(|source| {
                error!(interface = %iface.name, "Cannot read interface stats: {}", source);
                MonitorError::CounterRead {
                    interface: iface.name.clone(),
                    direction: Direction::Tx,
                    source,
                }
            })?;
        debug!(interface = %iface.name, speed_bps, "counter: {} B", reading.bytes);

        let observation = iface.observe(reading.bytes, now, bounds, self.thresholds.ewm_alpha);
        let (raw, smoothed, transition) = match observation {
            Observation::Seeded => return Ok(Sample::skipped(SkipReason::Seed)),
            Observation::Reset { previous, current } => {
                warn!(interface = %iface.name, previous, current, "Counter reset");
                return Ok(Sample::skipped(SkipReason::Reset));
            }
            Observation::NoElapsedTime => return Ok(Sample::skipped(SkipReason::NoElapsedTime)),
            Observation::Rate { raw, smoothed, transition } => (raw, smoothed, transition),
        };
        debug!(
            interface = %iface.name,
            "{:.0} bit/s, smoothed {:.0} bit/s",
            raw * 8.0,
            smoothed * 8.0
        );

        let cost = iface.cost_after(transition, &self.thresholds);
        let (decision, event) = match (transition, cost) {
            (Transition::Lower, Some(cost)) => {
                info!(
                    interface = %iface.name,
                    "below {:.0} bit/s at {:.0} bit/s, lowering cost to {}",
                    bounds.bw_min * 8.0,
                    smoothed * 8.0,
                    cost
                );
                (Decision::Lower { cost }, EventTag::Up)
            }
            (Transition::Raise, Some(cost)) => {
                info!(
                    interface = %iface.name,
                    "above {:.0} bit/s at {:.0} bit/s, raising cost to {}",
                    bounds.bw_max * 8.0,
                    smoothed * 8.0,
                    cost
                );
                (Decision::Raise { cost }, EventTag::Down)
            }
            _ => (Decision::None, EventTag::None),
        };
        if let Some(cost) = cost {
            backend.queue_cost_change(&iface.name, cost);
        }

        let record = EventRecord {
            timestamp: Utc::now(),
            interface: iface.name.clone(),
            counter: reading.bytes,
            rate_bps: raw * 8.0,
            smoothed_bps: smoothed * 8.0,
            speed_bps,
            low_bps: bounds.bw_min * 8.0,
            high_bps: bounds.bw_max * 8.0,
            event,
            cost,
        };
        Ok(Sample {
            decision,
            record: Some(record),
        })
    }
}
