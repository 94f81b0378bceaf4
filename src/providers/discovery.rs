use super::{DiscoveredHost, MacResolver, NeighborEntry, NeighborSource, ServiceDiscovery};
use crate::errors::ScanError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Parallel hardware-address lookups per discovery pass
const RESOLVE_CONCURRENCY: usize = 16;

/// Turns a [`ServiceDiscovery`] into a [`NeighborSource`] by resolving each
/// responder's hardware address. Responders whose address cannot be
/// resolved (including every IPv6 responder) are dropped.
pub struct ResolvedNeighbors {
    discovery: Arc<dyn ServiceDiscovery>,
    resolver: Arc<dyn MacResolver>,
    arp_timeout: Duration,
}

impl ResolvedNeighbors {
    pub fn new(
        discovery: Arc<dyn ServiceDiscovery>,
        resolver: Arc<dyn MacResolver>,
        arp_timeout: Duration,
    ) -> Self {
        Self {
            discovery,
            resolver,
            arp_timeout,
        }
    }
}

/// One host per address; a named sighting beats an anonymous one
fn unique_hosts(hosts: Vec<DiscoveredHost>) -> BTreeMap<IpAddr, Option<String>> {
    let mut unique: BTreeMap<IpAddr, Option<String>> = BTreeMap::new();
    for host in hosts {
        let slot = unique.entry(host.address).or_default();
        if slot.is_none() {
            *slot = host.hostname;
        }
    }
    unique
}

#[async_trait]
impl NeighborSource for ResolvedNeighbors {
    fn name(&self) -> &'static str {
        self.discovery.name()
    }

    async fn enumerate(&self) -> Result<Vec<NeighborEntry>, ScanError> {
        let hosts = unique_hosts(self.discovery.discover().await?);
        let method = self.discovery.method();
        let heard = hosts.len();

        let lookups = hosts.into_iter().filter_map(|(address, hostname)| match address {
            IpAddr::V4(v4) => Some(async move {
                let mac = self.resolver.resolve(v4, self.arp_timeout).await;
                (address, hostname, mac)
            }),
            IpAddr::V6(_) => None,
        });
        let resolved: Vec<_> = stream::iter(lookups)
            .buffer_unordered(RESOLVE_CONCURRENCY)
            .collect()
            .await;

        let mut entries = Vec::new();
        for (address, hostname, mac) in resolved {
            let Some(mac) = mac else {
                tracing::debug!(%address, source = self.name(), "responder without a resolvable hardware address");
                continue;
            };
            let mut entry = NeighborEntry::new(mac, address, method);
            entry.hostname = hostname;
            entries.push(entry);
        }
        entries.sort_by_key(|e| e.address);

        tracing::debug!(
            source = self.name(),
            heard,
            resolved = entries.len(),
            "discovery responders resolved"
        );
        Ok(entries)
    }
}
