use super::{MacResolver, NeighborEntry, NeighborSource};
use crate::errors::ScanError;
use crate::model::{DiscoveryMethod, MacAddr};
use async_trait::async_trait;
use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

const PROC_ARP: &str = "/proc/net/arp";

/// Kernel neighbor cache.
///
/// Reads `/proc/net/arp` and falls back to `arp -an` where procfs is absent.
/// With IPv6 enabled the NDP cache is added from `ip -6 neigh show`.
pub struct ProcNeighborTable {
    arp_path: PathBuf,
    include_ipv6: bool,
    command_timeout: Duration,
}

impl ProcNeighborTable {
    pub fn new(include_ipv6: bool) -> Self {
        Self {
            arp_path: PathBuf::from(PROC_ARP),
            include_ipv6,
            command_timeout: Duration::from_secs(3),
        }
    }

    /// Read the ARP table from another file (a fixture, usually)
    pub fn with_arp_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.arp_path = path.into();
        self
    }

    async fn ipv4_entries(&self) -> Result<Vec<NeighborEntry>, ScanError> {
        match tokio::fs::read_to_string(&self.arp_path).await {
            Ok(contents) => Ok(parse_proc_arp(&contents)),
            Err(e) => {
                tracing::debug!(
                    path = %self.arp_path.display(),
                    error = %e,
                    "ARP table unreadable, trying arp command"
                );
                let output = self.run("arp", &["-an"]).await?;
                Ok(parse_arp_command(&output))
            }
        }
    }

    async fn ipv6_entries(&self) -> Result<Vec<NeighborEntry>, ScanError> {
        let output = self.run("ip", &["-6", "neigh", "show"]).await?;
        Ok(parse_ip_neigh(&output))
    }

    async fn run(&self, program: &'static str, args: &[&str]) -> Result<String, ScanError> {
        let output = timeout(self.command_timeout, Command::new(program).args(args).output())
            .await
            .map_err(|_| ScanError::ProbeTimeout(self.command_timeout))??;

        if !output.status.success() {
            return Err(ScanError::unavailable(
                program,
                format!("exited with {}", output.status),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl NeighborSource for ProcNeighborTable {
    fn name(&self) -> &'static str {
        "kernel neighbor table"
    }

    async fn enumerate(&self) -> Result<Vec<NeighborEntry>, ScanError> {
        let mut entries = self.ipv4_entries().await?;

        if self.include_ipv6 {
            match self.ipv6_entries().await {
                Ok(v6) => entries.extend(v6),
                Err(e) => tracing::debug!(error = %e, "IPv6 neighbor cache unavailable"),
            }
        }

        Ok(entries)
    }
}

/// This host's own adapters, reported with their configured addresses
#[derive(Debug, Default)]
pub struct LocalAdapters;

#[async_trait]
impl NeighborSource for LocalAdapters {
    fn name(&self) -> &'static str {
        "local adapters"
    }

    async fn enumerate(&self) -> Result<Vec<NeighborEntry>, ScanError> {
        let interfaces = tokio::task::spawn_blocking(NetworkInterface::show)
            .await
            .map_err(|e| ScanError::unavailable("local adapters", e.to_string()))??;

        let mut entries = Vec::new();
        for interface in interfaces {
            let Some(mac) = interface
                .mac_addr
                .as_deref()
                .and_then(|raw| MacAddr::parse(raw).ok())
                .filter(|m| !m.is_unspecified())
            else {
                continue;
            };

            for addr in &interface.addr {
                let ip = addr.ip();
                if ip.is_loopback() || ip.is_unspecified() {
                    continue;
                }
                entries.push(NeighborEntry::new(mac.clone(), ip, DiscoveryMethod::Adapter));
            }
        }
        Ok(entries)
    }
}

/// Passive address lookup in the kernel ARP cache. Used for discovery
/// responders when no interface is configured for active ARP.
pub struct NeighborTableMacResolver {
    table: ProcNeighborTable,
}

impl NeighborTableMacResolver {
    pub fn new() -> Self {
        Self {
            table: ProcNeighborTable::new(false),
        }
    }
}

impl Default for NeighborTableMacResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MacResolver for NeighborTableMacResolver {
    fn name(&self) -> &'static str {
        "kernel ARP cache"
    }

    async fn resolve(&self, addr: Ipv4Addr, limit: Duration) -> Option<MacAddr> {
        let entries = timeout(limit, self.table.ipv4_entries()).await.ok()?.ok()?;
        entries
            .into_iter()
            .find(|e| e.address == IpAddr::V4(addr))
            .map(|e| e.hardware_address)
    }
}

fn neighbor(address: IpAddr, raw_mac: &str) -> Option<NeighborEntry> {
    let mac = MacAddr::parse(raw_mac).ok()?;
    if mac.is_unspecified() || mac.is_broadcast() {
        return None;
    }
    Some(NeighborEntry::new(mac, address, DiscoveryMethod::Neighbor))
}

/// `/proc/net/arp`: header line, then
/// `IP  HW-type  Flags  HW-address  Mask  Device`.
/// Flags `0x0` marks an incomplete entry.
pub(crate) fn parse_proc_arp(contents: &str) -> Vec<NeighborEntry> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 || fields[2] == "0x0" {
                return None;
            }
            let ip: IpAddr = fields[0].parse().ok()?;
            neighbor(ip, fields[3])
        })
        .collect()
}

/// `arp -an`: `? (192.168.1.1) at aa:bb:cc:dd:ee:ff [ether] on eth0`
pub(crate) fn parse_arp_command(output: &str) -> Vec<NeighborEntry> {
    output
        .lines()
        .filter_map(|line| {
            let open = line.find('(')?;
            let close = line[open..].find(')')? + open;
            let ip: IpAddr = line[open + 1..close].parse().ok()?;
            let mut rest = line[close + 1..].split_whitespace();
            if rest.next()? != "at" {
                return None;
            }
            neighbor(ip, rest.next()?)
        })
        .collect()
}

/// `ip -6 neigh show`: `fe80::1 dev eth0 lladdr aa:bb:cc:dd:ee:ff router REACHABLE`.
/// Entries without `lladdr` (FAILED, INCOMPLETE) are skipped.
pub(crate) fn parse_ip_neigh(output: &str) -> Vec<NeighborEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let ip: IpAddr = fields.next()?.parse().ok()?;
            let mac = fields.skip_while(|f| *f != "lladdr").nth(1)?;
            neighbor(ip, mac)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_ARP_SAMPLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         aa:bb:cc:dd:ee:01     *        wlan0
192.168.1.23     0x1         0x0         00:00:00:00:00:00     *        wlan0
192.168.1.40     0x1         0x2         AA:BB:CC:DD:EE:40     *        wlan0
";

    #[test]
    fn proc_arp_skips_incomplete_entries() {
        let entries = parse_proc_arp(PROC_ARP_SAMPLE);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].address, "192.168.1.1".parse::<IpAddr>().unwrap());
        assert_eq!(entries[1].hardware_address.as_str(), "aa:bb:cc:dd:ee:40");
        assert!(entries.iter().all(|e| e.method == DiscoveryMethod::Neighbor));
    }

    #[test]
    fn arp_command_output() {
        let output = "\
? (192.168.1.1) at aa:bb:cc:dd:ee:1 [ether] on en0
? (192.168.1.9) at (incomplete) on en0
router.lan (192.168.1.254) at 0:11:22:33:44:55 on en0 ifscope [ethernet]
";
        let entries = parse_arp_command(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].hardware_address.as_str(), "aa:bb:cc:dd:ee:01");
        assert_eq!(entries[1].hardware_address.as_str(), "00:11:22:33:44:55");
    }

    #[test]
    fn ip_neigh_requires_lladdr() {
        let output = "\
fe80::1 dev wlan0 lladdr aa:bb:cc:dd:ee:01 router REACHABLE
fe80::9 dev wlan0 FAILED
2001:db8::5 dev wlan0 lladdr aa:bb:cc:dd:ee:05 STALE
";
        let entries = parse_ip_neigh(output);
        assert_eq!(entries.len(), 2);
        assert!(entries[1].address.is_ipv6());
    }
}
