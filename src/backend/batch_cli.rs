//! XORP batch CLI backend
//!
//! Every operation is one non-interactive `xorpsh` invocation. Starting
//! costs come from a full `show -all protocols ospf4` dump; cost changes are
//! committed as a single `configure ... commit` transaction per tick.

use super::{BackendKind, CommitOutcome, PendingChanges, RouterBackend};
use crate::config::BatchCliConfig;
use crate::{MonitorError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

const SHOW_OSPF: &str = "show -all protocols ospf4";
const COST_LABEL: &str = "interface-cost:";
const ADDRESS_LABEL: &str = "address";

/// Captured output of one CLI invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOutput {
    /// Process exited with status zero
    pub success: bool,
    /// Combined stdout and stderr
    pub text: String,
}

/// Executes one batch of CLI commands (abstracted for testing)
#[async_trait]
pub trait CliRunner: Send + Sync {
    /// Run `commands` in one invocation
    async fn run(&self, commands: &[String]) -> io::Result<CliOutput>;
}

/// Runs `xorpsh -c <cmd> -c <cmd> ...`
pub struct XorpshRunner {
    binary: PathBuf,
    timeout: Duration,
}

impl XorpshRunner {
    /// Runner for `binary`, killing it after `timeout`
    pub fn new(binary: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
            timeout,
        }
    }
}

#[async_trait]
impl CliRunner for XorpshRunner {
    async fn run(&self, commands: &[String]) -> io::Result<CliOutput> {
        let mut cmd = Command::new(&self.binary);
        for command in commands {
            cmd.arg("-c").arg(command);
        }
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "xorpsh timed out"))??;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CliOutput {
            success: output.status.success(),
            text,
        })
    }
}

/// OSPF settings of one vif found in a configuration dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VifConfig {
    /// Local address of the vif
    pub address: IpAddr,
    /// Configured `interface-cost`
    pub cost: u32,
}

/// Locate `vif <interface>` in a `show -all protocols ospf4` dump and read
/// the `address` and `interface-cost:` fields that follow it.
///
/// The search stops at the next `vif ` block so a vif missing a field never
/// borrows one from its neighbour.
pub fn parse_vif(dump: &str, interface: &str) -> Option<VifConfig> {
    let start = find_vif_anchor(dump, interface)?;
    let block = &dump[start..];
    let block = match block.find("vif ") {
        Some(end) => &block[..end],
        None => block,
    };

    let address = field_after(block, ADDRESS_LABEL)?.parse().ok()?;
    let cost = field_after(block, COST_LABEL)?.parse().ok()?;
    Some(VifConfig { address, cost })
}

fn find_vif_anchor(dump: &str, interface: &str) -> Option<usize> {
    let anchor = format!("vif {}", interface);
    let mut from = 0;
    while let Some(pos) = dump[from..].find(&anchor) {
        let end = from + pos + anchor.len();
        match dump[end..].chars().next() {
            None => return Some(end),
            Some(c) if c.is_whitespace() || c == '{' => return Some(end),
            // eth1 must not match eth10
            Some(_) => from = end,
        }
    }
    None
}

fn field_after<'a>(block: &'a str, label: &str) -> Option<&'a str> {
    let rest = &block[block.find(label)? + label.len()..];
    let rest = rest.trim_start_matches(|c: char| c == ':' || c == ' ' || c == '\t');
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '{' || c == ';')
        .unwrap_or(rest.len());
    let value = &rest[..end];
    (!value.is_empty()).then_some(value)
}

/// Cost controller driving XORP through `xorpsh`
pub struct BatchCliBackend {
    runner: Arc<dyn CliRunner>,
    settings: BatchCliConfig,
    addresses: HashMap<String, IpAddr>,
    pending: PendingChanges,
}

impl BatchCliBackend {
    /// Backend issuing its batches through `runner`
    pub fn new(runner: Arc<dyn CliRunner>, settings: BatchCliConfig) -> Self {
        Self {
            runner,
            settings,
            addresses: HashMap::new(),
            pending: PendingChanges::default(),
        }
    }

    fn statement(&self, interface: &str, address: IpAddr, cost: u32) -> String {
        format!(
            "set protocols ospf4 area {} interface {} vif {} address {} interface-cost {}",
            self.settings.ospf_area, interface, interface, address, cost
        )
    }
}

#[async_trait]
impl RouterBackend for BatchCliBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::BatchCli
    }

    async fn connect(&mut self, interfaces: &[String]) -> Result<HashMap<String, u32>> {
        info!("Getting config for interfaces: {}", interfaces.join(", "));

        let commands = vec!["configure".to_string(), SHOW_OSPF.to_string()];
        let output = self
            .runner
            .run(&commands)
            .await
            .map_err(|e| MonitorError::Connect(format!("xorpsh failed: {}", e)))?;
        if !output.success {
            return Err(MonitorError::Connect(format!(
                "xorpsh exited with failure: {}",
                output.text.trim()
            )));
        }

        let mut costs = HashMap::with_capacity(interfaces.len());
        for name in interfaces {
            let vif = parse_vif(&output.text, name).ok_or_else(|| {
                error!(interface = %name, "Cannot get address and starting cost: {}", output.text);
                MonitorError::Connect(format!("no OSPF address/interface-cost for {}", name))
            })?;
            info!(
                interface = %name,
                address = %vif.address,
                "Starting cost {}", vif.cost
            );
            self.addresses.insert(name.clone(), vif.address);
            costs.insert(name.clone(), vif.cost);
        }
        Ok(costs)
    }

    fn queue_cost_change(&mut self, interface: &str, cost: u32) {
        debug!(interface = %interface, "Setting cost to {}", cost);
        self.pending.set(interface, cost);
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }

    async fn flush(&mut self) -> CommitOutcome {
        if self.pending.is_empty() {
            return CommitOutcome::Empty;
        }
        let changes = self.pending.take();
        let count = changes.len();

        let mut commands = Vec::with_capacity(count + 2);
        commands.push("configure".to_string());
        for (name, cost) in &changes {
            match self.addresses.get(name) {
                Some(address) => commands.push(self.statement(name, *address, *cost)),
                None => error!(interface = %name, "No known address, dropping cost {}", cost),
            }
        }
        commands.push("commit".to_string());

        let result = self.runner.run(&commands).await;
        let confirmed = match &result {
            Ok(out) => out.success && out.text.contains(&self.settings.success_marker),
            Err(_) => false,
        };

        if confirmed {
            info!("Executing commands OK");
            CommitOutcome::Committed { changes: count }
        } else {
            let reason = match result {
                Ok(out) => out.text.trim().to_string(),
                Err(e) => e.to_string(),
            };
            error!("Executing commands FAILED: {}", reason);
            CommitOutcome::Failed { changes: count, reason }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    const DUMP: &str = "protocols {\r\n\
        \x20   ospf4 {\r\n\
        \x20       router-id: 10.0.0.1\r\n\
        \x20       area 0.0.0.0 {\r\n\
        \x20           interface eth1 {\r\n\
        \x20               vif eth1 {\r\n\
        \x20                   address 10.0.1.1 {\r\n\
        \x20                       priority: 128\r\n\
        \x20                       interface-cost: 10\r\n\
        \x20                   }\r\n\
        \x20               }\r\n\
        \x20           }\r\n\
        \x20           interface eth10 {\r\n\
        \x20               vif eth10 {\r\n\
        \x20                   address 10.0.10.1 {\r\n\
        \x20                       interface-cost: 25\r\n\
        \x20                   }\r\n\
        \x20               }\r\n\
        \x20           }\r\n\
        \x20       }\r\n\
        \x20   }\r\n\
        }\r\n";

    #[derive(Default)]
    struct MockRunner {
        calls: Mutex<Vec<Vec<String>>>,
        replies: Mutex<VecDeque<io::Result<CliOutput>>>,
    }

    impl MockRunner {
        fn reply(&self, success: bool, text: &str) {
            self.replies.lock().push_back(Ok(CliOutput {
                success,
                text: text.to_string(),
            }));
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl CliRunner for MockRunner {
        async fn run(&self, commands: &[String]) -> io::Result<CliOutput> {
            self.calls.lock().push(commands.to_vec());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::Other, "no reply scripted")))
        }
    }

    fn backend(runner: Arc<MockRunner>) -> BatchCliBackend {
        BatchCliBackend::new(runner, BatchCliConfig::default())
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_vif() {
        let vif = parse_vif(DUMP, "eth1").unwrap();
        assert_eq!(vif.address, "10.0.1.1".parse::<IpAddr>().unwrap());
        assert_eq!(vif.cost, 10);

        let vif = parse_vif(DUMP, "eth10").unwrap();
        assert_eq!(vif.cost, 25);

        assert!(parse_vif(DUMP, "eth2").is_none());
    }

    #[test]
    fn test_parse_vif_missing_cost_not_borrowed() {
        let dump = "vif eth0 {\n address 10.0.0.1 {\n }\n}\nvif eth1 {\n address 10.0.1.1 {\n interface-cost: 5\n }\n}\n";
        assert!(parse_vif(dump, "eth0").is_none());
        assert_eq!(parse_vif(dump, "eth1").unwrap().cost, 5);
    }

    #[tokio::test]
    async fn test_connect_discovers_costs() {
        let runner = Arc::new(MockRunner::default());
        runner.reply(true, DUMP);
        let mut b = backend(runner.clone());

        let costs = b.connect(&names(&["eth1", "eth10"])).await.unwrap();
        assert_eq!(costs["eth1"], 10);
        assert_eq!(costs["eth10"], 25);
        assert_eq!(runner.calls(), vec![names(&["configure", "show -all protocols ospf4"])]);
    }

    #[tokio::test]
    async fn test_connect_missing_interface_is_fatal() {
        let runner = Arc::new(MockRunner::default());
        runner.reply(true, DUMP);
        let mut b = backend(runner);

        let err = b.connect(&names(&["eth1", "eth7"])).await.unwrap_err();
        assert!(matches!(err, MonitorError::Connect(msg) if msg.contains("eth7")));
    }

    #[tokio::test]
    async fn test_connect_process_failure_is_fatal() {
        let runner = Arc::new(MockRunner::default());
        runner.reply(false, "permission denied");
        let mut b = backend(runner);
        assert!(matches!(b.connect(&names(&["eth1"])).await, Err(MonitorError::Connect(_))));
    }

    #[tokio::test]
    async fn test_empty_flush_runs_nothing() {
        let runner = Arc::new(MockRunner::default());
        let mut b = backend(runner.clone());

        assert_eq!(b.flush().await, CommitOutcome::Empty);
        assert_eq!(b.flush().await, CommitOutcome::Empty);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_flush_single_transaction() {
        let runner = Arc::new(MockRunner::default());
        runner.reply(true, DUMP);
        runner.reply(true, "[edit]\nOK\n");
        let mut b = backend(runner.clone());
        b.connect(&names(&["eth1", "eth10"])).await.unwrap();

        b.queue_cost_change("eth1", 100);
        b.queue_cost_change("eth10", 100);
        assert_eq!(b.pending(), 2);

        assert_eq!(b.flush().await, CommitOutcome::Committed { changes: 2 });
        assert_eq!(b.pending(), 0);

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[1],
            vec![
                "configure".to_string(),
                "set protocols ospf4 area 0.0.0.0 interface eth1 vif eth1 address 10.0.1.1 interface-cost 100".to_string(),
                "set protocols ospf4 area 0.0.0.0 interface eth10 vif eth10 address 10.0.10.1 interface-cost 100".to_string(),
                "commit".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_flush_without_marker_fails_and_clears() {
        let runner = Arc::new(MockRunner::default());
        runner.reply(true, DUMP);
        runner.reply(true, "ERROR: commit failed");
        let mut b = backend(runner.clone());
        b.connect(&names(&["eth1"])).await.unwrap();

        b.queue_cost_change("eth1", 100);
        assert!(matches!(b.flush().await, CommitOutcome::Failed { changes: 1, .. }));
        assert_eq!(b.pending(), 0);
        assert_eq!(b.flush().await, CommitOutcome::Empty);
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_flush_nonzero_exit_fails() {
        let runner = Arc::new(MockRunner::default());
        runner.reply(true, DUMP);
        runner.reply(false, "OK");
        let mut b = backend(runner);
        b.connect(&names(&["eth1"])).await.unwrap();

        b.queue_cost_change("eth1", 100);
        assert!(matches!(b.flush().await, CommitOutcome::Failed { .. }));
    }

    #[cfg(unix)]
    fn script(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    // Scripts are written and run from one test so no concurrent fork can
    // hold a script open for writing while another is executed.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_xorpsh_runner_invokes_binary() {
        let dir = tempfile::tempdir().unwrap();
        let echo = script(&dir, "echo-xorpsh", "echo \"args: $*\"\necho OK >&2");
        let failing = script(&dir, "failing-xorpsh", "echo OK\nexit 3");
        let stuck = script(&dir, "stuck-xorpsh", "sleep 30");

        let runner = XorpshRunner::new(&echo, Duration::from_secs(10));
        let out = runner.run(&names(&["configure", "commit"])).await.unwrap();
        assert!(out.success);
        assert_eq!(out.text, "args: -c configure -c commit\nOK\n");

        let runner = XorpshRunner::new(&failing, Duration::from_secs(10));
        let out = runner.run(&names(&["configure"])).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.text, "OK\n");

        let runner = XorpshRunner::new(&stuck, Duration::from_millis(300));
        let started = std::time::Instant::now();
        let err = runner.run(&names(&["configure"])).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
