//! Link-Cost Monitor - Traffic-Aware OSPF Cost Controller
//!
//! Watches transmit throughput on router interfaces and raises the OSPF cost
//! of links that approach saturation, restoring it once load subsides.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          LINK-COST MONITOR                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                       CONTROL LOOP                               │   │
//! │  │   Starting → Connected → Running → Draining → Stopped           │   │
//! │  └─────────┬─────────────────────────────────────────┬─────────────┘   │
//! │            │ per interface, per tick                  │ once per tick   │
//! │  ┌─────────▼──────────────────────────┐   ┌─────────▼─────────────┐   │
//! │  │          SAMPLING ENGINE            │   │    ROUTER BACKEND      │   │
//! │  │  Counters | Speed | EWMA | Band    ├──►│  xorpsh  |  ospfd vty  │   │
//! │  └─────────┬──────────────────────────┘   └────────────────────────┘   │
//! │            │                                                            │
//! │  ┌─────────▼──────────────────────────┐                                │
//! │  │         INTERFACE STATE             │                                │
//! │  │  last counter | smoothed | elevated │                                │
//! │  └────────────────────────────────────┘                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod controller;
pub mod counters;
pub mod event_log;
pub mod priority;
pub mod retry;
pub mod sampler;
pub mod signals;
pub mod speed;
pub mod state;

use thiserror::Error;

pub use backend::{BackendKind, CommitOutcome, RouterBackend};
pub use config::MonitorConfig;
pub use controller::{Monitor, MonitorState};
pub use sampler::{Decision, SamplingEngine, SkipReason};
pub use state::{InterfaceState, Thresholds};

/// Monitor error types
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Invalid startup configuration
    #[error("config error: {0}")]
    Config(String),
    /// Backend session or starting-cost discovery failed
    #[error("connect error: {0}")]
    Connect(String),
    /// Interface byte counter could not be read
    #[error("cannot read {direction} counter of {interface}: {source}")]
    CounterRead {
        /// Interface name
        interface: String,
        /// Counter direction
        direction: counters::Direction,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },
    /// Local I/O failure (event log sink, config file)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate result type
pub type Result<T> = std::result::Result<T, MonitorError>;
