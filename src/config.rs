use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ScanError;

/// Readings below this dBm-equivalent raise a weak-signal event
pub const DEFAULT_WEAK_SIGNAL_THRESHOLD: i32 = -90;

/// Number of readings kept per device
pub const DEFAULT_SIGNAL_HISTORY: usize = 20;

/// Upper bound for `retention_minutes` (about 1900 years)
const MAX_RETENTION_MINUTES: u64 = 1_000_000_000;

/// Configuration settings for the scan engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Delay between periodic scan cycles
    pub scan_interval_secs: u64,

    /// Overall deadline for the collection phase of one cycle
    pub cycle_deadline_ms: u64,

    /// Timeout in milliseconds for a single echo probe
    pub echo_timeout_ms: u64,

    /// Timeout in milliseconds for a single hostname lookup
    pub hostname_timeout_ms: u64,

    /// Timeout in milliseconds for ARP resolution of sweep responders
    pub arp_timeout_ms: u64,

    /// Maximum number of concurrent probes within a cycle
    pub max_concurrent_probes: usize,

    /// Weak-signal threshold (dBm-equivalent, exclusive)
    pub weak_signal_threshold: i32,

    /// Capacity of each device's signal history
    pub signal_history_capacity: usize,

    /// Hardware-address patterns (exact or prefix). Empty authorizes all.
    pub allow_list: Vec<String>,

    /// Also read the IPv6 neighbor cache
    pub enable_ipv6: bool,

    /// Browse mDNS-SD services each cycle. Announced names also back up
    /// reverse DNS.
    pub mdns_discovery: bool,

    /// Send an SSDP (UPnP) search each cycle
    pub ssdp_discovery: bool,

    /// How long multicast discovery listens for answers
    pub discovery_window_ms: u64,

    /// Optional /24 network (or interface name) to echo-sweep each cycle
    pub sweep_network: Option<String>,

    /// Append-only telemetry log (JSON lines)
    pub telemetry_path: Option<PathBuf>,

    /// Offline devices not seen for this many minutes are purged
    pub retention_minutes: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            cycle_deadline_ms: 20_000,
            echo_timeout_ms: 1_500,
            hostname_timeout_ms: 2_000,
            arp_timeout_ms: 500,
            max_concurrent_probes: 64,
            weak_signal_threshold: DEFAULT_WEAK_SIGNAL_THRESHOLD,
            signal_history_capacity: DEFAULT_SIGNAL_HISTORY,
            allow_list: Vec::new(),
            enable_ipv6: false,
            mdns_discovery: false,
            ssdp_discovery: false,
            discovery_window_ms: 2_000,
            sweep_network: None,
            telemetry_path: None,
            retention_minutes: None,
        }
    }
}

impl ScanConfig {
    /// Load a JSON configuration file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self, ScanError> {
        let raw = std::fs::read_to_string(path)?;
        let config: ScanConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.scan_interval_secs == 0 {
            return Err(ScanError::Config(
                "scan_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_probes == 0 {
            return Err(ScanError::Config(
                "max_concurrent_probes must be at least 1".to_string(),
            ));
        }
        if (self.mdns_discovery || self.ssdp_discovery)
            && (self.discovery_window_ms == 0 || self.discovery_window_ms >= self.cycle_deadline_ms)
        {
            return Err(ScanError::Config(
                "discovery_window_ms must be positive and shorter than cycle_deadline_ms"
                    .to_string(),
            ));
        }
        if self.signal_history_capacity == 0 {
            return Err(ScanError::Config(
                "signal_history_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_millis(self.cycle_deadline_ms)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    pub fn hostname_timeout(&self) -> Duration {
        Duration::from_millis(self.hostname_timeout_ms)
    }

    pub fn discovery_window(&self) -> Duration {
        Duration::from_millis(self.discovery_window_ms)
    }

    pub fn arp_timeout(&self) -> Duration {
        Duration::from_millis(self.arp_timeout_ms)
    }

    pub fn retention(&self) -> Option<chrono::Duration> {
        self.retention_minutes
            .map(|m| chrono::Duration::minutes(m.min(MAX_RETENTION_MINUTES) as i64))
    }
}
