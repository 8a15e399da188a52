//! Link speed lookup
//!
//! Every source reports megabits per second, matching the kernel's
//! `/sys/class/net/<iface>/speed`; the resolver converts to bit/s.

use std::collections::HashMap;
use std::path::PathBuf;

const BITS_PER_MEGABIT: u64 = 1_000_000;

/// Source of link speeds in Mb/s
pub trait SpeedSource: Send + Sync {
    /// Speed of `interface`, if known
    fn speed_mbps(&self, interface: &str) -> Option<u64>;
}

/// Speeds fixed in the configuration file
#[derive(Debug, Clone, Default)]
pub struct StaticSpeeds(pub HashMap<String, u64>);

impl SpeedSource for StaticSpeeds {
    fn speed_mbps(&self, interface: &str) -> Option<u64> {
        self.0.get(interface).copied().filter(|s| *s > 0)
    }
}

/// Operator override files at `<cfg_dir>/speed/<iface>`
#[derive(Debug, Clone)]
pub struct SpeedFiles {
    dir: PathBuf,
}

impl SpeedFiles {
    /// Override files below `<cfg_dir>/speed`
    pub fn new(cfg_dir: impl Into<PathBuf>) -> Self {
        Self { dir: cfg_dir.into().join("speed") }
    }
}

impl SpeedSource for SpeedFiles {
    fn speed_mbps(&self, interface: &str) -> Option<u64> {
        read_first_line(self.dir.join(interface))
    }
}

/// Kernel-reported speed at `<root>/<iface>/speed`
#[derive(Debug, Clone)]
pub struct SysfsSpeed {
    root: PathBuf,
}

impl SysfsSpeed {
    /// Speeds below `root` (normally `/sys/class/net`)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SpeedSource for SysfsSpeed {
    fn speed_mbps(&self, interface: &str) -> Option<u64> {
        // Drivers without link report -1
        read_first_line(self.root.join(interface).join("speed"))
    }
}

fn read_first_line(path: PathBuf) -> Option<u64> {
    let content = std::fs::read_to_string(path).ok()?;
    let value = content.lines().next()?.trim().parse::<i64>().ok()?;
    u64::try_from(value).ok().filter(|v| *v > 0)
}

/// Ordered chain of speed sources; the first answer wins
#[derive(Default)]
pub struct SpeedResolver {
    sources: Vec<Box<dyn SpeedSource>>,
}

impl SpeedResolver {
    /// Resolver with no sources
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lower-priority source
    pub fn with_source(mut self, source: impl SpeedSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Link speed in bit/s
    pub fn speed_bps(&self, interface: &str) -> Option<u64> {
        self.sources
            .iter()
            .find_map(|s| s.speed_mbps(interface))
            .map(|mbps| mbps.saturating_mul(BITS_PER_MEGABIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sysfs_with(root: &std::path::Path, iface: &str, speed: &str) {
        std::fs::create_dir_all(root.join(iface)).unwrap();
        std::fs::write(root.join(iface).join("speed"), speed).unwrap();
    }

    #[test]
    fn test_override_file_wins() {
        let cfg = tempfile::tempdir().unwrap();
        let sys = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(cfg.path().join("speed")).unwrap();
        std::fs::write(cfg.path().join("speed").join("eth0"), "100\n").unwrap();
        sysfs_with(sys.path(), "eth0", "1000\n");

        let resolver = SpeedResolver::new()
            .with_source(SpeedFiles::new(cfg.path()))
            .with_source(SysfsSpeed::new(sys.path()));
        assert_eq!(resolver.speed_bps("eth0"), Some(100_000_000));
    }

    #[test]
    fn test_falls_back_to_sysfs() {
        let cfg = tempfile::tempdir().unwrap();
        let sys = tempfile::tempdir().unwrap();
        sysfs_with(sys.path(), "eth1", "10000\n");

        let resolver = SpeedResolver::new()
            .with_source(SpeedFiles::new(cfg.path()))
            .with_source(SysfsSpeed::new(sys.path()));
        assert_eq!(resolver.speed_bps("eth1"), Some(10_000_000_000));
    }

    #[test]
    fn test_unknown_speed_is_absent() {
        let sys = tempfile::tempdir().unwrap();
        sysfs_with(sys.path(), "wlan0", "-1\n");

        let resolver = SpeedResolver::new().with_source(SysfsSpeed::new(sys.path()));
        assert_eq!(resolver.speed_bps("wlan0"), None);
        assert_eq!(resolver.speed_bps("missing"), None);
    }

    #[test]
    fn test_static_speeds_first() {
        let mut map = HashMap::new();
        map.insert("eth0".to_string(), 1000);
        let resolver = SpeedResolver::new().with_source(StaticSpeeds(map));
        assert_eq!(resolver.speed_bps("eth0"), Some(1_000_000_000));
        assert_eq!(resolver.speed_bps("eth1"), None);
    }
}
