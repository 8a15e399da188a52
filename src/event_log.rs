//! Per-tick event log
//!
//! One `;` separated line per interface per sampled tick, preceded by a
//! header line. Rates and thresholds are written in bit/s.

use chrono::{DateTime, Utc};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

const HEADER: &str = "ts;interface;bytes counter;current bit/s;current smoothed bit/s;speed;BW_MIN bit/s;BW_MAX bit/s;event;new cost";

/// What happened to the interface cost on this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTag {
    /// No cost change
    None,
    /// Cost restored; the link attracts traffic again
    Up,
    /// Cost raised; traffic is pushed away
    Down,
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventTag::None => "none",
            EventTag::Up => "up",
            EventTag::Down => "down",
        })
    }
}

/// One event log line
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Wall-clock time of the sample
    pub timestamp: DateTime<Utc>,
    /// Interface name
    pub interface: String,
    /// Cumulative transmit bytes
    pub counter: u64,
    /// Instantaneous rate
    pub rate_bps: f64,
    /// Smoothed rate
    pub smoothed_bps: f64,
    /// Link speed
    pub speed_bps: u64,
    /// Lower threshold
    pub low_bps: f64,
    /// Upper threshold
    pub high_bps: f64,
    /// Cost change on this tick
    pub event: EventTag,
    /// New cost, if changed
    pub cost: Option<u32>,
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ts = self.timestamp.timestamp_micros() as f64 / 1_000_000.0;
        write!(
            f,
            "{:.6};{};{};{};{};{};{};{};{};",
            ts,
            self.interface,
            self.counter,
            self.rate_bps as u64,
            self.smoothed_bps as u64,
            self.speed_bps,
            self.low_bps as u64,
            self.high_bps as u64,
            self.event,
        )?;
        if let Some(cost) = self.cost {
            write!(f, "{}", cost)?;
        }
        Ok(())
    }
}

/// Event log sink
pub struct EventLog {
    writer: Box<dyn Write + Send>,
}

impl EventLog {
    /// Create (truncate) `path` and write the header
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file))
    }

    /// Wrap any writer and write the header
    pub fn new(writer: impl Write + Send + 'static) -> io::Result<Self> {
        let mut log = Self {
            writer: Box::new(writer),
        };
        writeln!(log.writer, "{}", HEADER)?;
        Ok(log)
    }

    /// Append one record
    pub fn write(&mut self, record: &EventRecord) -> io::Result<()> {
        writeln!(self.writer, "{}", record)
    }

    /// Push buffered records to the sink
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
