//! Quagga ospfd vty session backend
//!
//! Keeps one authenticated telnet-style session open for the lifetime of the
//! monitor. Every exchange writes a command batch and reads until the
//! expected prompt shows up at the end of the reply.

use super::{BackendKind, CommitOutcome, PendingChanges, RouterBackend};
use crate::config::SessionConfig;
use crate::retry::RetryPolicy;
use crate::{MonitorError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

const PASSWORD_PROMPT: &str = "Password: ";
const VIEW_PROMPT: &str = "> ";
const CONFIG_PROMPT: &str = "(config)# ";
const COST_LABEL: &str = "Cost: ";

/// Byte stream carrying the vty session
pub trait SessionStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SessionStream for T {}

/// Extract the cost of `interface` from a `show ip ospf interface` reply.
///
/// The reply must contain the `<interface> is ...` status line; the cost is
/// read after it, so a reply describing another interface yields `None`.
pub fn parse_cost(reply: &str, interface: &str) -> Option<u32> {
    let status = format!("{} is ", interface);
    let mut offset = 0;
    let mut section = None;
    for line in reply.split_inclusive('\n') {
        if line.trim_start().starts_with(&status) {
            section = Some(&reply[offset..]);
            break;
        }
        offset += line.len();
    }
    let section = section?;
    let rest = &section[section.find(COST_LABEL)? + COST_LABEL.len()..];
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Cost controller driving ospfd over its vty port
pub struct SessionBackend {
    settings: SessionConfig,
    timeout: Duration,
    retry: RetryPolicy,
    stream: Option<Box<dyn SessionStream>>,
    pending: PendingChanges,
}

impl SessionBackend {
    /// Backend that dials `settings.address` on connect
    pub fn new(settings: SessionConfig, timeout: Duration) -> Self {
        let retry = RetryPolicy::new(
            settings.query_attempts,
            Duration::from_millis(settings.query_backoff_ms),
        );
        Self {
            settings,
            timeout,
            retry,
            stream: None,
            pending: PendingChanges::default(),
        }
    }

    /// Backend speaking over an already open stream
    pub fn with_stream(stream: impl SessionStream + 'static, settings: SessionConfig, timeout: Duration) -> Self {
        let mut backend = Self::new(settings, timeout);
        backend.stream = Some(Box::new(stream));
        backend
    }

    async fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let address = self.settings.address.clone();
        info!("Connecting to {}", address);
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| MonitorError::Connect(format!("connecting to {} timed out", address)))?
            .map_err(|e| MonitorError::Connect(format!("connecting to {}: {}", address, e)))?;
        info!("Connected to {}", address);
        self.stream = Some(Box::new(stream));
        Ok(())
    }

    /// Drop whatever the router sent that nobody waited for, such as the
    /// reply to a request that already timed out
    async fn discard_pending(&mut self) -> io::Result<()> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        let mut chunk = [0u8; 4096];
        loop {
            match tokio::time::timeout(Duration::ZERO, stream.read(&mut chunk)).await {
                Ok(Ok(0)) | Err(_) => return Ok(()),
                Ok(Ok(n)) => debug!("Discarding {} stale bytes", n),
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    async fn send(&mut self, payload: &str) -> io::Result<()> {
        self.discard_pending().await?;
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        let write = async move {
            stream.write_all(payload.as_bytes()).await?;
            stream.flush().await
        };
        tokio::time::timeout(self.timeout, write)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "vty write timed out"))?
    }

    /// Read until `done` accepts the accumulated reply
    async fn read_reply(&mut self, done: impl Fn(&str) -> bool + Send) -> io::Result<String> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        let read = async move {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "vty closed the session"));
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if done(&text) {
                    return Ok(text.into_owned());
                }
            }
        };
        tokio::time::timeout(self.timeout, read)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "vty reply timed out"))?
    }

    async fn exchange(&mut self, payload: &str, prompt: &str) -> io::Result<String> {
        self.send(payload).await?;
        self.read_reply(|reply| reply.ends_with(prompt)).await
    }

    async fn authenticate(&mut self) -> Result<()> {
        let banner = self
            .read_reply(|reply| reply.ends_with(PASSWORD_PROMPT))
            .await
            .map_err(|e| MonitorError::Connect(format!("no password prompt: {}", e)))?;
        debug!("vty banner: {}", banner.trim());

        let password = format!("{}\n", self.settings.password);
        self.exchange(&password, VIEW_PROMPT).await.map_err(|e| {
            error!("Error entering password: {}", e);
            MonitorError::Connect(format!("authentication failed: {}", e))
        })?;
        info!("Entered password");
        Ok(())
    }

    async fn query_cost(&mut self, interface: &str) -> std::result::Result<u32, String> {
        let query = format!("show ip ospf interface {}\n", interface);
        let reply = self.exchange(&query, VIEW_PROMPT).await.map_err(|e| e.to_string())?;
        parse_cost(&reply, interface).ok_or_else(|| format!("no cost in reply: {}", reply.trim()))
    }

    async fn starting_cost(&mut self, interface: &str) -> Result<u32> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(interface = %interface, attempt, "Getting starting cost");
            let reason = match self.query_cost(interface).await {
                Ok(cost) => return Ok(cost),
                Err(reason) => reason,
            };
            match self.retry.delay_after(attempt) {
                Some(delay) => {
                    warn!(interface = %interface, attempt, "Starting cost unavailable: {}", reason);
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(interface = %interface, "Cannot get starting cost: {}", reason);
                    return Err(MonitorError::Connect(format!(
                        "no starting cost for {} after {} attempts",
                        interface, attempt
                    )));
                }
            }
        }
    }

    async fn enter_config_mode(&mut self) -> Result<()> {
        self.exchange("enable\nconf t\n", CONFIG_PROMPT).await.map_err(|e| {
            error!("Error enabling mode: {}", e);
            MonitorError::Connect(format!("cannot enter configuration mode: {}", e))
        })?;
        info!("Enabled mode");
        Ok(())
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "vty session not open")
}

#[async_trait]
impl RouterBackend for SessionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Session
    }

    async fn connect(&mut self, interfaces: &[String]) -> Result<HashMap<String, u32>> {
        self.open().await?;
        self.authenticate().await?;

        let mut costs = HashMap::with_capacity(interfaces.len());
        for name in interfaces {
            let cost = self.starting_cost(name).await?;
            info!(interface = %name, "Starting cost {}", cost);
            costs.insert(name.clone(), cost);
        }

        self.enter_config_mode().await?;
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
        let payload: String = changes
            .iter()
            .map(|(name, cost)| format!("interface {}\nip ospf cost {}\nexit\n", name, cost))
            .collect();

        // Each block's `exit` lands back on the config prompt
        let result = match self.send(&payload).await {
            Ok(()) => {
                self.read_reply(|reply| {
                    reply.ends_with(CONFIG_PROMPT) && reply.matches(CONFIG_PROMPT).count() >= count
                })
                .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => {
                debug!("Flushed {} cost changes", count);
                CommitOutcome::Committed { changes: count }
            }
            Err(e) => {
                warn!("Error flushing: {}", e);
                CommitOutcome::Failed {
                    changes: count,
                    reason: e.to_string(),
                }
            }
        }
    }
}
