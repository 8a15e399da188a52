//! Router backends
//!
//! A backend discovers each interface's starting OSPF cost, buffers cost
//! changes during a tick and commits them in one operation at the end of it.

pub mod batch_cli;
pub mod session;

pub use batch_cli::{BatchCliBackend, CliRunner, XorpshRunner};
pub use session::SessionBackend;

use crate::config::MonitorConfig;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Routing cost controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// XORP `xorpsh` batch invocations
    #[serde(alias = "xorp", alias = "xorpsh")]
    #[value(aliases = ["xorp", "xorpsh"])]
    BatchCli,
    /// Quagga `ospfd` vty session
    #[serde(alias = "quagga")]
    #[value(alias = "quagga")]
    Session,
}

/// Result of a flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Nothing was queued; no I/O happened
    Empty,
    /// Router confirmed the change set
    Committed {
        /// Changes in the batch
        changes: usize,
    },
    /// Router did not confirm; changes were dropped
    Failed {
        /// Changes in the dropped batch
        changes: usize,
        /// Router output or I/O error
        reason: String,
    },
}

/// Router configuration backend
#[async_trait]
pub trait RouterBackend: Send {
    /// Backend variant
    fn kind(&self) -> BackendKind;

    /// Open the session and discover the starting cost of every interface
    async fn connect(&mut self, interfaces: &[String]) -> Result<HashMap<String, u32>>;

    /// Buffer a cost change; performs no I/O
    fn queue_cost_change(&mut self, interface: &str, cost: u32);

    /// Number of buffered changes
    fn pending(&self) -> usize;

    /// Commit buffered changes and clear the buffer
    async fn flush(&mut self) -> CommitOutcome;
}

/// Build the backend selected in `config`
pub fn from_config(config: &MonitorConfig) -> Box<dyn RouterBackend> {
    match config.backend {
        BackendKind::BatchCli => {
            let runner = XorpshRunner::new(&config.batch_cli.binary, config.io_timeout());
            Box::new(BatchCliBackend::new(Arc::new(runner), config.batch_cli.clone()))
        }
        BackendKind::Session => Box::new(SessionBackend::new(config.session.clone(), config.io_timeout())),
    }
}

/// Insertion-ordered change buffer where the last write per interface wins
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingChanges {
    changes: Vec<(String, u32)>,
}

impl PendingChanges {
    pub(crate) fn set(&mut self, interface: &str, cost: u32) {
        match self.changes.iter_mut().find(|(name, _)| name == interface) {
            Some(entry) => entry.1 = cost,
            None => self.changes.push((interface.to_string(), cost)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.changes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub(crate) fn take(&mut self) -> Vec<(String, u32)> {
        std::mem::take(&mut self.changes)
    }
}
