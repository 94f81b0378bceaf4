use eui48::MacAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ScanError;

/// Hardware address in canonical lower-case colon-separated form
/// (`aa:bb:cc:dd:ee:ff`). This is the identity key of the registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(String);

impl MacAddr {
    /// Parse any of the usual spellings: `AA:BB:CC:DD:EE:FF`,
    /// `aa-bb-cc-dd-ee-ff`, `aabb.ccdd.eeff`, BSD-style unpadded
    /// `a:b:c:d:e:f` or a bare 12-digit hex string.
    pub fn parse(raw: &str) -> Result<Self, ScanError> {
        let raw_trimmed = raw.trim();
        let groups: Vec<&str> = raw_trimmed.split([':', '-']).collect();
        let hex: String = if groups.len() == 6 && groups.iter().all(|g| (1..=2).contains(&g.len())) {
            groups.iter().map(|g| format!("{:0>2}", g)).collect()
        } else {
            raw_trimmed
                .chars()
                .filter(|c| !matches!(c, ':' | '-' | '.'))
                .collect()
        };

        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ScanError::InvalidMac(raw.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| ScanError::InvalidMac(raw.to_string()))?;
        }
        Ok(Self::from_bytes(&bytes))
    }

    fn from_bytes(bytes: &[u8; 6]) -> Self {
        let canonical = bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":");
        Self(canonical)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Same address as an `eui48` value for OUI database queries
    pub fn to_eui48(&self) -> Option<MacAddress> {
        MacAddress::parse_str(&self.0).ok()
    }

    /// First three octets, e.g. `08:00:27`
    pub fn oui_prefix(&self) -> &str {
        &self.0[..8]
    }

    /// Incomplete neighbor entries report the all-zero address
    pub fn is_unspecified(&self) -> bool {
        self.0 == "00:00:00:00:00:00"
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == "ff:ff:ff:ff:ff:ff"
    }

    /// Locally administered bit set: randomized or virtual interfaces
    pub fn is_locally_administered(&self) -> bool {
        u8::from_str_radix(&self.0[..2], 16)
            .map(|octet| octet & 0x02 != 0)
            .unwrap_or(false)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MacAddr {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MacAddr {
    type Error = ScanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.0
    }
}

/// Addresses currently associated with a device, one per family.
/// A newer address replaces the older one of the same family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<Ipv6Addr>,
}

impl AddressSet {
    pub fn single(addr: IpAddr) -> Self {
        let mut set = Self::default();
        set.insert(addr);
        set
    }

    pub fn insert(&mut self, addr: IpAddr) {
        match addr {
            IpAddr::V4(v4) => self.ipv4 = Some(v4),
            IpAddr::V6(v6) => self.ipv6 = Some(v6),
        }
    }

    /// Overlay `newer` on top of `self`; families absent from `newer` keep
    /// their current value.
    pub fn overlay(&self, newer: &AddressSet) -> AddressSet {
        AddressSet {
            ipv4: newer.ipv4.or(self.ipv4),
            ipv6: newer.ipv6.or(self.ipv6),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ipv4.is_none() && self.ipv6.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.ipv4
            .map(IpAddr::V4)
            .into_iter()
            .chain(self.ipv6.map(IpAddr::V6))
    }

    /// Preferred address for probing: IPv4 first
    pub fn primary(&self) -> Option<IpAddr> {
        self.iter().next()
    }
}

impl fmt::Display for AddressSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        f.write_str(&joined)
    }
}

/// Classification label derived from hostname and hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Router,
    Printer,
    Mobile,
    Computer,
    SmartTv,
    SmartSpeaker,
    Virtual,
    #[default]
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Router => "router",
            DeviceType::Printer => "printer",
            DeviceType::Mobile => "mobile",
            DeviceType::Computer => "computer",
            DeviceType::SmartTv => "smart_tv",
            DeviceType::SmartSpeaker => "smart_speaker",
            DeviceType::Virtual => "virtual",
            DeviceType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which provider reported an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    /// Kernel neighbor table (ARP / NDP cache)
    Neighbor,
    /// One of this host's own adapters
    Adapter,
    /// Echo sweep responder resolved through ARP
    EchoSweep,
    /// mDNS-SD service announcement
    Mdns,
    /// SSDP (UPnP) M-SEARCH responder
    Ssdp,
}

/// One raw, possibly partial sighting of a device during a scan cycle.
/// Several observations may share a hardware address; they are folded
/// together during the registry merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub hardware_address: MacAddr,
    pub address: IpAddr,
    pub hostname: Option<String>,
    /// Probe-derived dBm-equivalent; `None` when no echo measurement succeeded
    pub signal_quality: Option<i32>,
    /// Wireless reading from a richer provider, when one is available
    pub precise_signal_quality: Option<i32>,
    pub round_trip: Option<Duration>,
    /// OUI vendor name, when the prefix is known
    pub vendor: Option<String>,
    pub method: DiscoveryMethod,
}

impl Observation {
    pub fn new(hardware_address: MacAddr, address: IpAddr, method: DiscoveryMethod) -> Self {
        Self {
            hardware_address,
            address,
            hostname: None,
            signal_quality: None,
            precise_signal_quality: None,
            round_trip: None,
            vendor: None,
            method,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_signal(mut self, signal: i32) -> Self {
        self.signal_quality = Some(signal);
        self
    }

    pub fn with_precise_signal(mut self, signal: i32) -> Self {
        self.precise_signal_quality = Some(signal);
        self
    }
}

/// Raw input of one scan cycle, discarded after the merge
#[derive(Debug, Clone)]
pub struct ScanCycle {
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
    pub observations: Vec<Observation>,
}

impl ScanCycle {
    pub fn new(sequence: u64, started_at: DateTime<Utc>, observations: Vec<Observation>) -> Self {
        Self {
            sequence,
            started_at,
            observations,
        }
    }
}
