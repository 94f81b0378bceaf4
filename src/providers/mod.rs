use crate::errors::ScanError;
use crate::model::{DiscoveryMethod, MacAddr};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

pub mod discovery;
pub mod echo;
pub mod hostname;
pub mod mdns;
pub mod neighbors;
pub mod ssdp;
pub mod wireless;

pub use discovery::ResolvedNeighbors;
pub use echo::{ArpMacResolver, SurgeEchoProber};
pub use hostname::SystemHostnameResolver;
pub use mdns::MdnsBrowser;
pub use neighbors::{LocalAdapters, NeighborTableMacResolver, ProcNeighborTable};
pub use ssdp::SsdpDiscovery;
pub use wireless::ProcWirelessSignal;

/// One address-to-hardware mapping reported by a neighbor source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub hardware_address: MacAddr,
    pub address: IpAddr,
    /// Name announced by the source itself (mDNS), if any
    pub hostname: Option<String>,
    pub method: DiscoveryMethod,
}

impl NeighborEntry {
    pub fn new(hardware_address: MacAddr, address: IpAddr, method: DiscoveryMethod) -> Self {
        Self {
            hardware_address,
            address,
            hostname: None,
            method,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }
}

/// A responder found by active service discovery. Only the network address
/// is known; the hardware address is resolved afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredHost {
    pub address: IpAddr,
    pub hostname: Option<String>,
}

/// Result of a single echo probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EchoReply {
    pub reachable: bool,
    pub round_trip: Option<Duration>,
}

impl EchoReply {
    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn reached(round_trip: Duration) -> Self {
        Self {
            reachable: true,
            round_trip: Some(round_trip),
        }
    }
}

/// Source of passively known neighbors (kernel caches, local adapters).
///
/// Implementations bound their own running time. An `Err` means the source
/// could not be read at all; the collector logs it and moves on.
#[async_trait]
pub trait NeighborSource: Send + Sync {
    async fn enumerate(&self) -> Result<Vec<NeighborEntry>, ScanError>;

    fn name(&self) -> &'static str;
}

/// Multicast service discovery (SSDP, mDNS-SD). Implementations listen for
/// a bounded window and return every responder heard.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<DiscoveredHost>, ScanError>;

    fn name(&self) -> &'static str;

    /// Method recorded on the resulting observations
    fn method(&self) -> DiscoveryMethod;
}

/// Active reachability probe
#[async_trait]
pub trait EchoProber: Send + Sync {
    /// Never fails: anything short of a reply inside `timeout` is unreachable
    async fn probe(&self, addr: IpAddr, timeout: Duration) -> EchoReply;

    fn name(&self) -> &'static str;
}

/// Precise wireless signal for a hardware address, when one is measurable
#[async_trait]
pub trait WirelessSignalSource: Send + Sync {
    async fn acquire(&self, mac: &MacAddr) -> Option<i32>;

    fn name(&self) -> &'static str;
}

/// Reverse name resolution
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    async fn resolve(&self, addr: IpAddr, timeout: Duration) -> Option<String>;

    fn name(&self) -> &'static str;
}

/// IPv4 address to hardware address resolution, used for sweep responders
#[async_trait]
pub trait MacResolver: Send + Sync {
    async fn resolve(&self, addr: Ipv4Addr, timeout: Duration) -> Option<MacAddr>;

    fn name(&self) -> &'static str;
}
