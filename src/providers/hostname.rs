use super::mdns::MdnsBrowser;
use super::HostnameResolver;
use async_trait::async_trait;
use dns_lookup::lookup_addr;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Reverse DNS through the system resolver, optionally falling back to the
/// names heard in the cycle's mDNS-SD browse.
#[derive(Clone, Default)]
pub struct SystemHostnameResolver {
    mdns: Option<Arc<MdnsBrowser>>,
}

impl SystemHostnameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer from `browser` when there is no PTR record
    pub fn with_mdns(mut self, browser: Arc<MdnsBrowser>) -> Self {
        self.mdns = Some(browser);
        self
    }

    async fn reverse_dns(&self, ip: IpAddr, limit: Duration) -> Option<String> {
        let lookup = tokio::task::spawn_blocking(move || lookup_addr(&ip).ok());
        let name = timeout(limit, lookup).await.ok()?.ok()??;
        // Resolvers without a PTR record echo the address back
        if name.parse::<IpAddr>().is_ok() {
            return None;
        }
        Some(name)
    }
}

#[async_trait]
impl HostnameResolver for SystemHostnameResolver {
    fn name(&self) -> &'static str {
        if self.mdns.is_some() {
            "reverse DNS + mDNS-SD"
        } else {
            "reverse DNS"
        }
    }

    async fn resolve(&self, addr: IpAddr, limit: Duration) -> Option<String> {
        if let Some(name) = self.reverse_dns(addr, limit).await {
            return Some(name);
        }
        match &self.mdns {
            Some(browser) => browser.lookup(addr).await,
            None => None,
        }
    }
}
