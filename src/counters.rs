//! Interface byte counters

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Counter direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received bytes
    Rx,
    /// Transmitted bytes
    Tx,
}

impl Direction {
    fn prefix(self) -> &'static str {
        match self {
            Direction::Rx => "rx",
            Direction::Tx => "tx",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// One counter reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSample {
    /// Name the source reported the counter under
    pub identity: String,
    /// Cumulative bytes
    pub bytes: u64,
}

/// Source of cumulative byte counters
pub trait CounterSource: Send + Sync {
    /// Read the counter of `interface` in `direction`
    fn read(&self, interface: &str, direction: Direction) -> io::Result<CounterSample>;
}

/// Kernel statistics under `/sys/class/net/<iface>/statistics`
#[derive(Debug, Clone)]
pub struct SysfsCounters {
    root: PathBuf,
}

impl SysfsCounters {
    /// Counters below `root` (normally `/sys/class/net`)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, interface: &str, direction: Direction) -> PathBuf {
        self.root
            .join(interface)
            .join("statistics")
            .join(format!("{}_bytes", direction.prefix()))
    }
}

impl CounterSource for SysfsCounters {
    fn read(&self, interface: &str, direction: Direction) -> io::Result<CounterSample> {
        let content = std::fs::read_to_string(self.path(interface, direction))?;
        let bytes = content
            .trim()
            .parse::<u64>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(CounterSample {
            identity: interface.to_string(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_counter(root: &std::path::Path, iface: &str, file: &str, value: &str) {
        let dir = root.join(iface).join("statistics");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), value).unwrap();
    }

    #[test]
    fn test_reads_tx_bytes() {
        let root = tempfile::tempdir().unwrap();
        write_counter(root.path(), "eth0", "tx_bytes", "123456789\n");
        write_counter(root.path(), "eth0", "rx_bytes", "42\n");

        let counters = SysfsCounters::new(root.path());
        let tx = counters.read("eth0", Direction::Tx).unwrap();
        assert_eq!(tx.identity, "eth0");
        assert_eq!(tx.bytes, 123_456_789);
        assert_eq!(counters.read("eth0", Direction::Rx).unwrap().bytes, 42);
    }

    #[test]
    fn test_missing_interface_is_error() {
        let root = tempfile::tempdir().unwrap();
        let counters = SysfsCounters::new(root.path());
        assert!(counters.read("eth9", Direction::Tx).is_err());
    }

    #[test]
    fn test_garbage_is_invalid_data() {
        let root = tempfile::tempdir().unwrap();
        write_counter(root.path(), "eth0", "tx_bytes", "n/a");
        let err = SysfsCounters::new(root.path()).read("eth0", Direction::Tx).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
