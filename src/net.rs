use crate::errors::ScanError;
use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

/// Echo-sweep target generation
pub mod sweep {
    use super::*;

    /// Host addresses `.1` through `.254` of a /24 network
    pub fn sweep_targets(network: &str) -> Result<Vec<Ipv4Addr>, ScanError> {
        let (network_ip, prefix_len) = interface::parse_cidr_network(network)?;
        if prefix_len != 24 {
            return Err(ScanError::InvalidNetwork(format!(
                "only /24 networks can be swept, got /{}",
                prefix_len
            )));
        }

        let [a, b, c, _] = network_ip.octets();
        Ok((1..255).map(|host| Ipv4Addr::new(a, b, c, host)).collect())
    }

    /// Accept either a CIDR network or an interface name
    pub fn resolve_sweep_network(target: &str) -> Result<String, ScanError> {
        if target.contains('/') {
            Ok(target.to_string())
        } else {
            interface::get_network_from_interface(target)
        }
    }
}

/// Network interface detection and management utilities
pub mod interface {
    use super::*;

    /// One usable IPv4 address of a local interface
    #[derive(Debug, Clone)]
    pub struct InterfaceSummary {
        pub name: String,
        pub address: Ipv4Addr,
        pub network: String,
    }

    /// Find the network interface that has an IP address in the target network
    pub fn find_network_interface(
        target_network: &str,
    ) -> Result<Option<String>, ScanError> {
        let (network_ip, prefix_len) = parse_cidr_network(target_network)?;
        tracing::debug!(%network_ip, prefix_len, "looking for interface in network");

        let interfaces = NetworkInterface::show()?;
        for interface in &interfaces {
            for addr in &interface.addr {
                if let IpAddr::V4(ipv4) = addr.ip() {
                    if is_ip_in_subnet(ipv4, network_ip, prefix_len) {
                        tracing::debug!(interface = %interface.name, ip = %ipv4, "selected interface");
                        return Ok(Some(interface.name.clone()));
                    }
                }
            }
        }

        for interface in &interfaces {
            if is_virtual_or_loopback(&interface.name) {
                continue;
            }
            for addr in &interface.addr {
                if let IpAddr::V4(ipv4) = addr.ip() {
                    if !ipv4.is_loopback() && !ipv4.is_unspecified() {
                        tracing::debug!(interface = %interface.name, ip = %ipv4, "using fallback interface");
                        return Ok(Some(interface.name.clone()));
                    }
                }
            }
        }

        tracing::warn!(network = target_network, "no suitable interface for ARP resolution");
        Ok(None)
    }

    pub fn is_virtual_or_loopback(name: &str) -> bool {
        name.starts_with("lo") || name.starts_with("docker") || name.starts_with("veth")
    }

    /// Parse CIDR network notation (e.g., "192.168.1.0/24")
    pub fn parse_cidr_network(network: &str) -> Result<(Ipv4Addr, u8), ScanError> {
        let parts: Vec<&str> = network.split('/').collect();
        if parts.len() != 2 {
            return Err(ScanError::InvalidNetwork(format!(
                "invalid CIDR format: {}",
                network
            )));
        }

        let network_ip = Ipv4Addr::from_str(parts[0])
            .map_err(|e| ScanError::InvalidNetwork(format!("invalid IP address: {}", e)))?;

        let prefix_len = parts[1]
            .parse::<u8>()
            .map_err(|e| ScanError::InvalidNetwork(format!("invalid prefix length: {}", e)))?;

        if prefix_len > 32 {
            return Err(ScanError::InvalidNetwork(
                "invalid prefix length: must be <= 32".to_string(),
            ));
        }

        Ok((network_ip, prefix_len))
    }

    /// Check if an IP address is within a subnet
    pub fn is_ip_in_subnet(ip: Ipv4Addr, network: Ipv4Addr, prefix_len: u8) -> bool {
        if prefix_len > 32 {
            return false;
        }

        let mask = if prefix_len == 0 {
            0
        } else {
            !((1u64 << (32 - prefix_len)) - 1) as u32
        };

        (u32::from(ip) & mask) == (u32::from(network) & mask)
    }

    /// The /24 network an address belongs to
    pub fn calculate_network_cidr(ip: Ipv4Addr) -> String {
        let [a, b, c, _] = ip.octets();
        format!("{}.{}.{}.0/24", a, b, c)
    }

    /// All non-loopback IPv4 addresses of local interfaces
    pub fn list_network_interfaces() -> Result<Vec<InterfaceSummary>, ScanError> {
        let interfaces = NetworkInterface::show()?;
        let mut summaries = Vec::new();
        for interface in interfaces {
            for addr in &interface.addr {
                if let IpAddr::V4(ipv4) = addr.ip() {
                    if !ipv4.is_loopback() && !ipv4.is_unspecified() {
                        summaries.push(InterfaceSummary {
                            name: interface.name.clone(),
                            address: ipv4,
                            network: calculate_network_cidr(ipv4),
                        });
                    }
                }
            }
        }
        Ok(summaries)
    }

    /// Get the network CIDR for a specific interface name
    pub fn get_network_from_interface(interface_name: &str) -> Result<String, ScanError> {
        list_network_interfaces()?
            .into_iter()
            .find(|s| s.name == interface_name)
            .map(|s| s.network)
            .ok_or_else(|| {
                ScanError::NetworkInterfaceCustom(format!(
                    "Interface '{}' not found or has no valid IPv4 address",
                    interface_name
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_covers_host_range_of_a_24() {
        let targets = sweep::sweep_targets("10.0.7.0/24").unwrap();
        assert_eq!(targets.len(), 254);
        assert_eq!(targets[0], Ipv4Addr::new(10, 0, 7, 1));
        assert_eq!(targets[253], Ipv4Addr::new(10, 0, 7, 254));
    }

    #[test]
    fn sweep_rejects_other_prefixes() {
        assert!(matches!(
            sweep::sweep_targets("10.0.0.0/16"),
            Err(ScanError::InvalidNetwork(_))
        ));
        assert!(sweep::sweep_targets("10.0.0.0").is_err());
    }

    #[test]
    fn subnet_membership() {
        let net = Ipv4Addr::new(192, 168, 1, 0);
        assert!(interface::is_ip_in_subnet(Ipv4Addr::new(192, 168, 1, 77), net, 24));
        assert!(!interface::is_ip_in_subnet(Ipv4Addr::new(192, 168, 2, 77), net, 24));
        assert_eq!(
            interface::calculate_network_cidr(Ipv4Addr::new(192, 168, 1, 77)),
            "192.168.1.0/24"
        );
    }
}
