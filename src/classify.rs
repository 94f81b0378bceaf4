//! Heuristic device classification.
//!
//! Classification walks an ordered rule table: hostname substrings first,
//! then hardware-address prefixes, then the device's prior label. The first
//! matching rule wins, so reordering the table is the only way to change
//! precedence.

use crate::model::{DeviceType, MacAddr};

/// Case-insensitive hostname substring rule
#[derive(Debug, Clone, Copy)]
pub struct HostnameRule {
    pub needles: &'static [&'static str],
    pub label: DeviceType,
}

impl HostnameRule {
    pub fn matches(&self, hostname_lower: &str) -> bool {
        self.needles.iter().any(|n| hostname_lower.contains(n))
    }
}

/// Hardware-address prefix rule (first three octets, lower-case)
#[derive(Debug, Clone, Copy)]
pub struct PrefixRule {
    pub prefix: &'static str,
    pub label: DeviceType,
}

pub const HOSTNAME_RULES: &[HostnameRule] = &[
    HostnameRule { needles: &["router", "gateway"], label: DeviceType::Router },
    HostnameRule { needles: &["printer"], label: DeviceType::Printer },
    HostnameRule { needles: &["phone", "mobile"], label: DeviceType::Mobile },
    HostnameRule { needles: &["laptop", "computer"], label: DeviceType::Computer },
    HostnameRule { needles: &["tv", "smart"], label: DeviceType::SmartTv },
    HostnameRule { needles: &["alexa", "echo"], label: DeviceType::SmartSpeaker },
];

pub const PREFIX_RULES: &[PrefixRule] = &[
    PrefixRule { prefix: "08:00:27", label: DeviceType::Virtual }, // VirtualBox
    PrefixRule { prefix: "52:54:00", label: DeviceType::Virtual }, // QEMU/KVM
    PrefixRule { prefix: "00:50:56", label: DeviceType::Virtual }, // VMware
    PrefixRule { prefix: "00:0c:29", label: DeviceType::Virtual }, // VMware
    PrefixRule { prefix: "00:15:5d", label: DeviceType::Virtual }, // Hyper-V
    PrefixRule { prefix: "00:1c:42", label: DeviceType::Virtual }, // Parallels
];

/// Derive a device type from the hostname, the hardware address and the
/// label the device carried before this cycle.
pub fn classify(
    hostname: Option<&str>,
    hardware_address: &MacAddr,
    prior: Option<DeviceType>,
) -> DeviceType {
    if let Some(label) = hostname.and_then(classify_hostname) {
        return label;
    }

    if let Some(label) = classify_prefix(hardware_address) {
        return label;
    }

    match prior {
        Some(label) if label != DeviceType::Unknown => label,
        _ => DeviceType::Unknown,
    }
}

pub fn classify_hostname(hostname: &str) -> Option<DeviceType> {
    let lower = hostname.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    HOSTNAME_RULES
        .iter()
        .find(|rule| rule.matches(&lower))
        .map(|rule| rule.label)
}

pub fn classify_prefix(hardware_address: &MacAddr) -> Option<DeviceType> {
    let prefix = hardware_address.oui_prefix();
    PREFIX_RULES
        .iter()
        .find(|rule| rule.prefix == prefix)
        .map(|rule| rule.label)
}
