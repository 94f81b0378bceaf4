//! MAC-keyed device registry.
//!
//! A [`Registry`] is an immutable snapshot. Each scan cycle produces a new
//! snapshot through [`Registry::merge`]; nothing mutates a published one.
//! Because the map is keyed by [`MacAddr`], a snapshot can never hold two
//! devices with the same hardware address.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::IpAddr;

use crate::classify::classify;
use crate::confidence::score;
use crate::model::{AddressSet, DeviceType, DiscoveryMethod, MacAddr, Observation, ScanCycle};
use crate::policy::AllowList;

/// A tracked device. The registry owns these; everything else sees clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub hardware_address: MacAddr,
    pub addresses: AddressSet,
    pub hostname: Option<String>,
    pub previous_hostname: Option<String>,
    pub vendor: Option<String>,
    pub device_type: DeviceType,
    pub signal_quality: Option<i32>,
    pub precise_signal_quality: Option<i32>,
    pub confidence: f64,
    pub is_online: bool,
    pub is_authorized: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub scan_count: u64,
    pub signal_history: VecDeque<i32>,
    pub discovery: BTreeSet<DiscoveryMethod>,
}

impl Device {
    /// Best available reading: the wireless one when present
    pub fn effective_signal(&self) -> Option<i32> {
        self.precise_signal_quality.or(self.signal_quality)
    }
}

/// Inputs the merge needs besides the observations themselves
#[derive(Debug, Clone)]
pub struct MergeContext<'a> {
    pub allow_list: &'a AllowList,
    pub history_capacity: usize,
    pub now: DateTime<Utc>,
}

/// All observations of one hardware address in one cycle, folded together
#[derive(Debug, Clone, Default)]
struct Sighting {
    addresses: AddressSet,
    /// Resolved names by the address they were resolved from. IPv4 sorts
    /// before IPv6.
    hostnames: BTreeMap<IpAddr, String>,
    signal_quality: Option<i32>,
    precise_signal_quality: Option<i32>,
    vendor: Option<String>,
    methods: BTreeSet<DiscoveryMethod>,
}

impl Sighting {
    fn absorb(&mut self, obs: &Observation) {
        self.addresses.insert(obs.address);
        if let Some(name) = obs.hostname.as_deref().and_then(clean_hostname) {
            self.hostnames.insert(obs.address, name);
        }
        self.signal_quality = strongest(self.signal_quality, obs.signal_quality);
        self.precise_signal_quality =
            strongest(self.precise_signal_quality, obs.precise_signal_quality);
        if self.vendor.is_none() {
            self.vendor = obs.vendor.clone();
        }
        self.methods.insert(obs.method);
    }

    fn effective_signal(&self) -> Option<i32> {
        self.precise_signal_quality.or(self.signal_quality)
    }

    /// The stored name when any address still resolves to it, otherwise the
    /// name of the lowest IPv4 address, then IPv6.
    fn hostname(&self, stored: Option<&str>) -> Option<String> {
        if let Some(stored) = stored {
            if self.hostnames.values().any(|name| name == stored) {
                return Some(stored.to_string());
            }
        }
        self.hostnames.values().next().cloned()
    }
}

fn strongest(a: Option<i32>, b: Option<i32>) -> Option<i32> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}

/// Resolver output such as `host.lan.` or blanks is tidied; empty means
/// nothing was resolved.
fn clean_hostname(raw: &str) -> Option<String> {
    let name = raw.trim().trim_end_matches('.');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn push_history(history: &mut VecDeque<i32>, reading: Option<i32>, capacity: usize) {
    if let Some(value) = reading {
        history.push_back(value);
        while history.len() > capacity.max(1) {
            history.pop_front();
        }
    }
}

/// Immutable snapshot of every known device
#[derive(Debug, Clone, Default, Serialize)]
pub struct Registry {
    devices: BTreeMap<MacAddr, Device>,
    cycle: u64,
    updated_at: Option<DateTime<Utc>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, mac: &MacAddr) -> Option<&Device> {
        self.devices.get(mac)
    }

    pub fn contains(&self, mac: &MacAddr) -> bool {
        self.devices.contains_key(mac)
    }

    /// Devices in hardware-address order
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn online_count(&self) -> usize {
        self.devices.values().filter(|d| d.is_online).count()
    }

    /// Sequence number of the cycle that produced this snapshot (0 = none)
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Build the next snapshot from this one and a cycle's observations.
    ///
    /// Devices seen this cycle are created or updated; devices not seen are
    /// kept and marked offline. Nothing is removed here.
    pub fn merge(&self, cycle: &ScanCycle, ctx: &MergeContext<'_>) -> Registry {
        let mut sightings: BTreeMap<&MacAddr, Sighting> = BTreeMap::new();
        for obs in &cycle.observations {
            sightings
                .entry(&obs.hardware_address)
                .or_default()
                .absorb(obs);
        }

        let mut devices = BTreeMap::new();

        for (mac, sighting) in &sightings {
            let device = match self.devices.get(*mac) {
                Some(prior) => Self::update_device(prior, sighting, ctx),
                None => Self::new_device(mac, sighting, ctx),
            };
            devices.insert((*mac).clone(), device);
        }

        for (mac, prior) in &self.devices {
            if devices.contains_key(mac) {
                continue;
            }
            let mut device = prior.clone();
            device.is_online = false;
            device.is_authorized = ctx.allow_list.is_authorized(mac);
            device.confidence = score(device.signal_quality, false);
            devices.insert(mac.clone(), device);
        }

        Registry {
            devices,
            cycle: cycle.sequence,
            updated_at: Some(ctx.now),
        }
    }

    fn new_device(mac: &MacAddr, sighting: &Sighting, ctx: &MergeContext<'_>) -> Device {
        let mut signal_history = VecDeque::new();
        push_history(
            &mut signal_history,
            sighting.effective_signal(),
            ctx.history_capacity,
        );

        let hostname = sighting.hostname(None);
        Device {
            hardware_address: mac.clone(),
            addresses: sighting.addresses.clone(),
            device_type: classify(hostname.as_deref(), mac, None),
            hostname,
            previous_hostname: None,
            vendor: sighting.vendor.clone(),
            signal_quality: sighting.signal_quality,
            precise_signal_quality: sighting.precise_signal_quality,
            confidence: score(sighting.signal_quality, true),
            is_online: true,
            is_authorized: ctx.allow_list.is_authorized(mac),
            first_seen: ctx.now,
            last_seen: ctx.now,
            scan_count: 1,
            signal_history,
            discovery: sighting.methods.clone(),
        }
    }

    fn update_device(prior: &Device, sighting: &Sighting, ctx: &MergeContext<'_>) -> Device {
        let mac = &prior.hardware_address;

        // A failed lookup keeps the stored name; only a different resolved
        // name shifts the old one into previous_hostname.
        let resolved = sighting.hostname(prior.hostname.as_deref());
        let hostname = resolved.clone().or_else(|| prior.hostname.clone());
        let previous_hostname = match (&resolved, &prior.hostname) {
            (Some(new), Some(old)) if new != old => Some(old.clone()),
            _ => prior.previous_hostname.clone(),
        };

        let mut signal_history = prior.signal_history.clone();
        push_history(
            &mut signal_history,
            sighting.effective_signal(),
            ctx.history_capacity,
        );

        Device {
            hardware_address: mac.clone(),
            addresses: prior.addresses.overlay(&sighting.addresses),
            device_type: classify(hostname.as_deref(), mac, Some(prior.device_type)),
            hostname,
            previous_hostname,
            vendor: sighting.vendor.clone().or_else(|| prior.vendor.clone()),
            signal_quality: sighting.signal_quality,
            precise_signal_quality: sighting.precise_signal_quality,
            confidence: score(sighting.signal_quality, true),
            is_online: true,
            is_authorized: ctx.allow_list.is_authorized(mac),
            first_seen: prior.first_seen,
            last_seen: ctx.now.max(prior.first_seen),
            scan_count: prior.scan_count + 1,
            signal_history,
            discovery: sighting.methods.clone(),
        }
    }

    /// Snapshot without offline devices last seen before `cutoff`, plus the
    /// addresses that were dropped. Online devices are never purged.
    pub fn purge_stale(&self, cutoff: DateTime<Utc>) -> (Registry, Vec<MacAddr>) {
        let mut removed = Vec::new();
        let devices = self
            .devices
            .iter()
            .filter(|(mac, device)| {
                let stale = !device.is_online && device.last_seen < cutoff;
                if stale {
                    removed.push((*mac).clone());
                }
                !stale
            })
            .map(|(mac, device)| (mac.clone(), device.clone()))
            .collect();

        let registry = Registry {
            devices,
            cycle: self.cycle,
            updated_at: self.updated_at,
        };
        (registry, removed)
    }
}
