//! Per-interface sampling and hysteresis state

use crate::{MonitorError, Result};

/// Process-wide hysteresis thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Restore the starting cost below this fraction of link speed
    pub bottom_fraction: f64,
    /// Raise the cost above this fraction of link speed
    pub upper_fraction: f64,
    /// Cost advertised while congested
    pub elevated_cost: u32,
    /// EWMA weight of the newest sample
    pub ewm_alpha: f64,
}

impl Thresholds {
    /// Reject configurations without a usable hysteresis band
    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| v > 0.0 && v < 1.0;
        if !in_unit(self.bottom_fraction) || !in_unit(self.upper_fraction) {
            return Err(MonitorError::Config(format!(
                "thresholds must lie in (0, 1): bottom {} upper {}",
                self.bottom_fraction, self.upper_fraction
            )));
        }
        if self.bottom_fraction >= self.upper_fraction {
            return Err(MonitorError::Config(format!(
                "bottom threshold {} must be smaller than upper threshold {}",
                self.bottom_fraction, self.upper_fraction
            )));
        }
        if !(self.ewm_alpha > 0.0 && self.ewm_alpha <= 1.0) {
            return Err(MonitorError::Config(format!(
                "ewm alpha {} must lie in (0, 1]",
                self.ewm_alpha
            )));
        }
        if self.elevated_cost == 0 {
            return Err(MonitorError::Config("elevated cost must be positive".into()));
        }
        Ok(())
    }

    /// Byte-rate band for a link speed in bit/s
    pub fn bounds(&self, speed_bps: u64) -> Bounds {
        let byte_speed = speed_bps as f64 / 8.0;
        Bounds {
            byte_speed,
            bw_min: self.bottom_fraction * byte_speed,
            bw_max: self.upper_fraction * byte_speed,
        }
    }
}

/// Thresholds resolved against one link speed, all in bytes/s
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Link speed
    pub byte_speed: f64,
    /// Restore below this rate
    pub bw_min: f64,
    /// Raise above this rate
    pub bw_max: f64,
}

/// Hysteresis outcome for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Load crossed above the upper threshold
    Raise,
    /// Load fell below the lower threshold
    Lower,
    /// Inside the band or already in the matching state
    Hold,
}

/// Result of feeding one counter reading into an interface
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// First reading; nothing to compare against
    Seeded,
    /// Counter went backwards
    Reset {
        /// Counter of the previous tick
        previous: u64,
        /// Counter just read
        current: u64,
    },
    /// Clock did not advance since the previous reading
    NoElapsedTime,
    /// Rate computed and band evaluated
    Rate {
        /// Clamped instantaneous rate in bytes/s
        raw: f64,
        /// Smoothed rate in bytes/s
        smoothed: f64,
        /// Band outcome
        transition: Transition,
    },
}

/// Monitored interface
#[derive(Debug, Clone)]
pub struct InterfaceState {
    /// Interface name
    pub name: String,
    /// Link capacity in bit/s as of the last tick
    pub speed_bps: Option<u64>,
    /// OSPF cost found at connect time
    pub starting_cost: u32,
    /// Cumulative byte counter of the previous tick
    pub last_counter: Option<u64>,
    /// Time of the previous sample in seconds
    pub last_sample_time: f64,
    /// Smoothed throughput in bytes/s
    pub smoothed: f64,
    /// Cost currently raised above `starting_cost`
    pub elevated: bool,
}

impl InterfaceState {
    /// Fresh state; starting cost 1 until connect reports it
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            speed_bps: None,
            starting_cost: 1,
            last_counter: None,
            last_sample_time: 0.0,
            smoothed: 0.0,
            elevated: false,
        }
    }

    /// Fold a counter reading taken at `now` into the state.
    ///
    /// Returns the transition to apply; `elevated` is already updated when a
    /// raise or lower is reported.
    pub fn observe(&mut self, counter: u64, now: f64, bounds: Bounds, alpha: f64) -> Observation {
        let previous = match self.last_counter {
            None => {
                self.record(counter, now);
                return Observation::Seeded;
            }
            Some(previous) => previous,
        };

        if counter < previous {
            self.record(counter, now);
            return Observation::Reset { previous, current: counter };
        }

        let elapsed = now - self.last_sample_time;
        if elapsed <= 0.0 {
            return Observation::NoElapsedTime;
        }

        let raw = ((counter - previous) as f64 / elapsed).clamp(0.0, bounds.byte_speed);
        self.smoothed = (1.0 - alpha) * self.smoothed + alpha * raw;

        let transition = if self.elevated && self.smoothed < bounds.bw_min {
            self.elevated = false;
            Transition::Lower
        } else if !self.elevated && self.smoothed > bounds.bw_max {
            self.elevated = true;
            Transition::Raise
        } else {
            Transition::Hold
        };

        self.record(counter, now);
        Observation::Rate { raw, smoothed: self.smoothed, transition }
    }

    /// Cost the interface should advertise after `transition`
    pub fn cost_after(&self, transition: Transition, thresholds: &Thresholds) -> Option<u32> {
        match transition {
            Transition::Raise => Some(thresholds.elevated_cost),
            Transition::Lower => Some(self.starting_cost),
            Transition::Hold => None,
        }
    }

    fn record(&mut self, counter: u64, now: f64) {
        self.last_counter = Some(counter);
        self.last_sample_time = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GIGABIT: u64 = 1_000_000_000;

    fn thresholds(alpha: f64) -> Thresholds {
        Thresholds {
            bottom_fraction: 0.7,
            upper_fraction: 0.9,
            elevated_cost: 100,
            ewm_alpha: alpha,
        }
    }

    #[test]
    fn test_bounds() {
        let b = thresholds(1.0).bounds(GIGABIT);
        assert_eq!(b.byte_speed, 125_000_000.0);
        assert!((b.bw_min - 87_500_000.0).abs() < 1e-6);
        assert!((b.bw_max - 112_500_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_first_reading_seeds() {
        let t = thresholds(1.0);
        let mut s = InterfaceState::new("eth0");
        assert_eq!(s.observe(500, 1.0, t.bounds(GIGABIT), 1.0), Observation::Seeded);
        assert_eq!(s.last_counter, Some(500));
        assert_eq!(s.last_sample_time, 1.0);
        assert_eq!(s.smoothed, 0.0);
    }

    #[test]
    fn test_counter_reset_reseeds() {
        let t = thresholds(1.0);
        let b = t.bounds(GIGABIT);
        let mut s = InterfaceState::new("eth0");
        s.observe(1_000, 1.0, b, 1.0);
        let obs = s.observe(10, 2.0, b, 1.0);
        assert_eq!(obs, Observation::Reset { previous: 1_000, current: 10 });
        assert_eq!(s.last_counter, Some(10));
        assert_eq!(s.last_sample_time, 2.0);
        assert_eq!(s.smoothed, 0.0);
    }

    #[test]
    fn test_rate_clamped_to_link_speed() {
        let t = thresholds(1.0);
        let b = t.bounds(GIGABIT);
        let mut s = InterfaceState::new("eth0");
        s.observe(0, 0.0, b, 1.0);
        match s.observe(10 * 125_000_000, 1.0, b, 1.0) {
            Observation::Rate { raw, .. } => assert_eq!(raw, b.byte_speed),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_no_chatter_inside_band() {
        let t = thresholds(1.0);
        let b = t.bounds(GIGABIT);
        let mut s = InterfaceState::new("eth0");
        let mut counter = 0u64;
        s.observe(counter, 0.0, b, 1.0);

        // 120 MB/s: above 112.5 MB/s
        counter += 120_000_000;
        let obs = s.observe(counter, 1.0, b, 1.0);
        assert!(matches!(obs, Observation::Rate { transition: Transition::Raise, .. }));

        // 100 MB/s sits between 87.5 and 112.5 MB/s
        for tick in 2..6 {
            counter += 100_000_000;
            let obs = s.observe(counter, tick as f64, b, 1.0);
            assert!(matches!(obs, Observation::Rate { transition: Transition::Hold, .. }));
            assert!(s.elevated);
        }

        counter += 60_000_000;
        let obs = s.observe(counter, 6.0, b, 1.0);
        assert!(matches!(obs, Observation::Rate { transition: Transition::Lower, .. }));
        assert!(!s.elevated);

        counter += 100_000_000;
        let obs = s.observe(counter, 7.0, b, 1.0);
        assert!(matches!(obs, Observation::Rate { transition: Transition::Hold, .. }));
        assert!(!s.elevated);
    }

    #[test]
    fn test_smoothing_delays_raise() {
        let t = thresholds(0.5);
        let b = t.bounds(GIGABIT);
        let mut s = InterfaceState::new("eth0");
        s.observe(0, 0.0, b, 0.5);
        // One saturated second only reaches half the link speed once smoothed
        let obs = s.observe(125_000_000, 1.0, b, 0.5);
        assert!(matches!(obs, Observation::Rate { transition: Transition::Hold, .. }));
        let obs = s.observe(250_000_000, 2.0, b, 0.5);
        assert!(matches!(obs, Observation::Rate { transition: Transition::Hold, .. }));
        let obs = s.observe(375_000_000, 3.0, b, 0.5);
        assert!(matches!(obs, Observation::Rate { transition: Transition::Hold, .. }));
        let obs = s.observe(500_000_000, 4.0, b, 0.5);
        assert!(matches!(obs, Observation::Rate { transition: Transition::Raise, .. }));
    }

    #[test]
    fn test_same_timestamp_is_ignored() {
        let t = thresholds(1.0);
        let b = t.bounds(GIGABIT);
        let mut s = InterfaceState::new("eth0");
        s.observe(0, 5.0, b, 1.0);
        assert_eq!(s.observe(1_000, 5.0, b, 1.0), Observation::NoElapsedTime);
        assert_eq!(s.last_counter, Some(0));
    }

    #[test]
    fn test_threshold_validation() {
        assert!(thresholds(0.2).validate().is_ok());
        assert!(thresholds(0.0).validate().is_err());
        assert!(thresholds(1.5).validate().is_err());
        let mut t = thresholds(0.2);
        t.bottom_fraction = 0.95;
        assert!(t.validate().is_err());
        let mut t = thresholds(0.2);
        t.elevated_cost = 0;
        assert!(t.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_smoothed_within_link_speed(
            alpha in 0.01f64..=1.0,
            deltas in proptest::collection::vec(0u64..400_000_000, 1..50),
        ) {
            let t = thresholds(alpha);
            let b = t.bounds(GIGABIT);
            let mut s = InterfaceState::new("eth0");
            let mut counter = 0u64;
            s.observe(counter, 0.0, b, alpha);
            for (i, delta) in deltas.iter().enumerate() {
                counter += delta;
                s.observe(counter, (i + 1) as f64, b, alpha);
                prop_assert!(s.smoothed >= 0.0);
                prop_assert!(s.smoothed <= b.byte_speed);
            }
        }

        #[test]
        fn prop_elevated_holds_until_below_min(
            deltas in proptest::collection::vec(0u64..200_000_000, 1..50),
        ) {
            let t = thresholds(1.0);
            let b = t.bounds(GIGABIT);
            let mut s = InterfaceState::new("eth0");
            let mut counter = 0u64;
            s.observe(counter, 0.0, b, 1.0);
            for (i, delta) in deltas.iter().enumerate() {
                let was_elevated = s.elevated;
                counter += delta;
                s.observe(counter, (i + 1) as f64, b, 1.0);
                if was_elevated && !s.elevated {
                    prop_assert!(s.smoothed < b.bw_min);
                }
                if !was_elevated && s.elevated {
                    prop_assert!(s.smoothed > b.bw_max);
                }
            }
        }

        #[test]
        fn prop_decrease_never_yields_rate(first in 1u64..u64::MAX / 2, drop in 1u64..1_000) {
            let t = thresholds(1.0);
            let b = t.bounds(GIGABIT);
            let mut s = InterfaceState::new("eth0");
            s.observe(first, 0.0, b, 1.0);
            let second = first.saturating_sub(drop);
            let obs = s.observe(second, 1.0, b, 1.0);
            let is_reset = matches!(obs, Observation::Reset { .. });
            prop_assert!(is_reset);
            prop_assert_eq!(s.smoothed, 0.0);
        }
    }
}
