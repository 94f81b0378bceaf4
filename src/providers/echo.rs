use super::{EchoProber, EchoReply, MacResolver};
use crate::errors::ScanError;
use crate::model::MacAddr;
use crate::net::interface;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::time::timeout;

/// ICMP echo through `surge-ping`. Needs raw-socket privileges; without them
/// every probe comes back unreachable.
#[derive(Debug, Clone)]
pub struct SurgeEchoProber {
    payload: Vec<u8>,
}

impl Default for SurgeEchoProber {
    fn default() -> Self {
        Self {
            payload: vec![0; 56],
        }
    }
}

impl SurgeEchoProber {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EchoProber for SurgeEchoProber {
    fn name(&self) -> &'static str {
        "icmp echo"
    }

    async fn probe(&self, addr: IpAddr, probe_timeout: Duration) -> EchoReply {
        match timeout(probe_timeout, surge_ping::ping(addr, &self.payload)).await {
            Ok(Ok((_packet, rtt))) => EchoReply::reached(rtt),
            Ok(Err(e)) => {
                tracing::debug!(%addr, error = %e, "echo failed");
                EchoReply::unreachable()
            }
            Err(_) => EchoReply::unreachable(),
        }
    }
}

/// ARP request on a named interface through `libarp`
#[derive(Debug, Clone)]
pub struct ArpMacResolver {
    interface: String,
}

impl ArpMacResolver {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    /// Pick the interface that sits in (or best reaches) `network`
    pub fn for_network(network: &str) -> Result<Self, ScanError> {
        interface::find_network_interface(network)?
            .map(Self::new)
            .ok_or_else(|| {
                ScanError::unavailable("arp", format!("no interface reaches {}", network))
            })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

#[async_trait]
impl MacResolver for ArpMacResolver {
    fn name(&self) -> &'static str {
        "arp"
    }

    async fn resolve(&self, addr: Ipv4Addr, arp_timeout: Duration) -> Option<MacAddr> {
        let mut client = match libarp::client::ArpClient::new_with_iface_name(&self.interface) {
            Ok(client) => client,
            Err(e) => {
                tracing::debug!(interface = %self.interface, error = ?e, "ARP client unavailable");
                return None;
            }
        };

        match client.ip_to_mac(addr, Some(arp_timeout)).await {
            Ok(mac) => MacAddr::parse(&mac.to_string()).ok(),
            Err(_) => None,
        }
    }
}
