use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::MacAddr;
use crate::registry::{Device, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    NewDevice,
    HostnameChanged,
    UnauthorizedDevice,
    WeakSignal,
    DeviceOffline,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::NewDevice => "new_device",
            AnomalyKind::HostnameChanged => "hostname_changed",
            AnomalyKind::UnauthorizedDevice => "unauthorized_device",
            AnomalyKind::WeakSignal => "weak_signal",
            AnomalyKind::DeviceOffline => "device_offline",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notable transition detected between two registry snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub kind: AnomalyKind,
    pub hardware_address: MacAddr,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

/// Compare two snapshots and list what changed.
///
/// Events come out in hardware-address order; per device the order is
/// new, hostname change, unauthorized, weak signal, offline.
pub fn detect(
    previous: &Registry,
    current: &Registry,
    weak_threshold: i32,
    timestamp: DateTime<Utc>,
) -> Vec<AnomalyEvent> {
    let mut events = Vec::new();

    for device in current.devices() {
        let before = previous.get(&device.hardware_address);
        let mut emit = |kind: AnomalyKind, detail: String| {
            events.push(AnomalyEvent {
                kind,
                hardware_address: device.hardware_address.clone(),
                detail,
                timestamp,
            });
        };

        if before.is_none() {
            emit(
                AnomalyKind::NewDevice,
                format!("New device {} at {}", label(device), device.addresses),
            );
        }

        if let Some((old, new)) = before.and_then(|b| hostname_change(b, device)) {
            emit(
                AnomalyKind::HostnameChanged,
                format!(
                    "Device {} changed name from '{}' to '{}'",
                    device.hardware_address, old, new
                ),
            );
        }

        if !device.is_authorized && device.scan_count == 1 && device.is_online {
            emit(
                AnomalyKind::UnauthorizedDevice,
                format!(
                    "Unauthorized device detected: {} ({})",
                    label(device),
                    device.hardware_address
                ),
            );
        }

        if device.is_online {
            if let Some(signal) = device.effective_signal().filter(|s| *s < weak_threshold) {
                emit(
                    AnomalyKind::WeakSignal,
                    format!("Device {} has weak signal: {} dBm", label(device), signal),
                );
            }
        }

        if before.is_some_and(|b| b.is_online) && !device.is_online {
            emit(
                AnomalyKind::DeviceOffline,
                format!(
                    "Device {} went offline (last seen {})",
                    label(device),
                    device.last_seen.to_rfc3339()
                ),
            );
        }
    }

    events
}

/// Old and new name when this merge renamed the device. Only fires on the
/// cycle where the stored hostname actually moved.
fn hostname_change<'a>(before: &'a Device, after: &'a Device) -> Option<(&'a str, &'a str)> {
    let old = before.hostname.as_deref()?;
    let new = after.hostname.as_deref().filter(|n| !n.is_empty())?;
    let recorded = after.previous_hostname.as_deref()?;
    (old != new && recorded == old).then_some((old, new))
}

fn label(device: &Device) -> String {
    device
        .hostname
        .clone()
        .unwrap_or_else(|| device.hardware_address.to_string())
}
