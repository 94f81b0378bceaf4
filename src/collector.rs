//! Runs every capability provider for one cycle and returns raw observations.
//!
//! Neighbor enumeration comes first and is the only mandatory step; it
//! includes the multicast discovery sources (SSDP, mDNS-SD) when enabled.
//! Each entry is then enriched (echo, hostname, wireless signal) concurrently,
//! alongside the optional echo sweep. Everything shares one cycle deadline;
//! work that has not finished by then is dropped and the observations
//! gathered so far are returned.

use crate::config::ScanConfig;
use crate::confidence::signal_from_round_trip;
use crate::db::oui::MacVendorDatabase;
use crate::errors::ScanError;
use crate::model::{DiscoveryMethod, Observation};
use crate::net::sweep;
use crate::providers::{
    ArpMacResolver, EchoProber, EchoReply, HostnameResolver, LocalAdapters, MacResolver,
    MdnsBrowser, NeighborEntry, NeighborSource, NeighborTableMacResolver, ProcNeighborTable,
    ProcWirelessSignal, ResolvedNeighbors, SsdpDiscovery, SurgeEchoProber,
    SystemHostnameResolver, WirelessSignalSource,
};
use futures::future::{join_all, BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};

/// Extra time a provider gets beyond its own timeout before the collector
/// gives up on it
const PROVIDER_GRACE: Duration = Duration::from_millis(250);

/// Timing and concurrency limits for one collection pass
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub echo_timeout: Duration,
    pub hostname_timeout: Duration,
    pub arp_timeout: Duration,
    pub max_concurrent_probes: usize,
    pub cycle_deadline: Duration,
}

impl From<&ScanConfig> for ProbeSettings {
    fn from(config: &ScanConfig) -> Self {
        Self {
            echo_timeout: config.echo_timeout(),
            hostname_timeout: config.hostname_timeout(),
            arp_timeout: config.arp_timeout(),
            max_concurrent_probes: config.max_concurrent_probes.max(1),
            cycle_deadline: config.cycle_deadline(),
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::from(&ScanConfig::default())
    }
}

struct SweepPlan {
    targets: Vec<Ipv4Addr>,
    resolver: Arc<dyn MacResolver>,
}

/// What the enrichment probes found out about one neighbor entry
#[derive(Debug, Default)]
struct Enrichment {
    reply: EchoReply,
    hostname: Option<String>,
    precise_signal: Option<i32>,
}

impl Enrichment {
    /// A resolved name replaces one the source announced
    fn apply(self, obs: &mut Observation) {
        apply_reply(obs, self.reply);
        if self.hostname.is_some() {
            obs.hostname = self.hostname;
        }
        obs.precise_signal_quality = self.precise_signal;
    }
}

fn apply_reply(obs: &mut Observation, reply: EchoReply) {
    if let (true, Some(rtt)) = (reply.reachable, reply.round_trip) {
        obs.round_trip = Some(rtt);
        obs.signal_quality = Some(signal_from_round_trip(rtt.as_secs_f64() * 1000.0));
    }
}

enum ProbeOutcome {
    Enriched(usize, Enrichment),
    Swept(Option<Observation>),
}

async fn bounded<T>(limit: Duration, fut: impl Future<Output = T>) -> Option<T> {
    timeout(limit + PROVIDER_GRACE, fut).await.ok()
}

/// Gathers one cycle's observations from the configured providers
pub struct ObservationCollector {
    neighbor_sources: Vec<Arc<dyn NeighborSource>>,
    echo: Option<Arc<dyn EchoProber>>,
    hostnames: Option<Arc<dyn HostnameResolver>>,
    wireless: Option<Arc<dyn WirelessSignalSource>>,
    sweep: Option<SweepPlan>,
    vendors: Option<Arc<Mutex<MacVendorDatabase>>>,
    settings: ProbeSettings,
}

impl ObservationCollector {
    /// A collector with no providers; add them with the `with_*` methods
    pub fn new(settings: ProbeSettings) -> Self {
        Self {
            neighbor_sources: Vec::new(),
            echo: None,
            hostnames: None,
            wireless: None,
            sweep: None,
            vendors: None,
            settings,
        }
    }

    /// The default provider set for this host
    pub fn system(config: &ScanConfig) -> Result<Self, ScanError> {
        let mdns = config
            .mdns_discovery
            .then(|| Arc::new(MdnsBrowser::new(config.discovery_window())));
        let mut hostnames = SystemHostnameResolver::new();
        if let Some(browser) = &mdns {
            hostnames = hostnames.with_mdns(browser.clone());
        }

        let mut collector = Self::new(ProbeSettings::from(config))
            .with_neighbor_source(Arc::new(ProcNeighborTable::new(config.enable_ipv6)))
            .with_neighbor_source(Arc::new(LocalAdapters))
            .with_echo_prober(Arc::new(SurgeEchoProber::new()))
            .with_hostname_resolver(Arc::new(hostnames))
            .with_wireless_source(Arc::new(ProcWirelessSignal::new()))
            .with_vendor_database(Arc::new(Mutex::new(MacVendorDatabase::new())));

        // Active ARP on the sweep interface when there is one, else the kernel cache
        let mut mac_resolver: Arc<dyn MacResolver> = Arc::new(NeighborTableMacResolver::new());

        if let Some(target) = config.sweep_network.as_deref() {
            let network = sweep::resolve_sweep_network(target)?;
            let targets = sweep::sweep_targets(&network)?;
            let resolver = Arc::new(ArpMacResolver::for_network(&network)?);
            tracing::info!(
                %network,
                interface = resolver.interface(),
                hosts = targets.len(),
                "echo sweep enabled"
            );
            mac_resolver = Arc::clone(&resolver) as Arc<dyn MacResolver>;
            collector = collector.with_sweep(targets, resolver);
        }

        if config.ssdp_discovery {
            let ssdp = Arc::new(SsdpDiscovery::new(config.discovery_window()));
            collector = collector.with_neighbor_source(Arc::new(ResolvedNeighbors::new(
                ssdp,
                mac_resolver.clone(),
                config.arp_timeout(),
            )));
        }
        if let Some(browser) = mdns {
            collector = collector.with_neighbor_source(Arc::new(ResolvedNeighbors::new(
                browser,
                mac_resolver,
                config.arp_timeout(),
            )));
        }

        Ok(collector)
    }

    pub fn with_neighbor_source(mut self, source: Arc<dyn NeighborSource>) -> Self {
        self.neighbor_sources.push(source);
        self
    }

    pub fn with_echo_prober(mut self, prober: Arc<dyn EchoProber>) -> Self {
        self.echo = Some(prober);
        self
    }

    pub fn with_hostname_resolver(mut self, resolver: Arc<dyn HostnameResolver>) -> Self {
        self.hostnames = Some(resolver);
        self
    }

    pub fn with_wireless_source(mut self, source: Arc<dyn WirelessSignalSource>) -> Self {
        self.wireless = Some(source);
        self
    }

    /// Echo-sweep `targets` each cycle, resolving responders through `resolver`
    pub fn with_sweep(mut self, targets: Vec<Ipv4Addr>, resolver: Arc<dyn MacResolver>) -> Self {
        self.sweep = Some(SweepPlan { targets, resolver });
        self
    }

    pub fn with_vendor_database(mut self, vendors: Arc<Mutex<MacVendorDatabase>>) -> Self {
        self.vendors = Some(vendors);
        self
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Collect this cycle's observations. Provider failures and timeouts
    /// only shrink the result; this never fails.
    pub async fn collect(&self, cycle: u64) -> Vec<Observation> {
        let deadline = Instant::now() + self.settings.cycle_deadline;

        let entries = self.enumerate_neighbors(cycle, deadline).await;
        let mut observations: Vec<Observation> = entries
            .iter()
            .map(|e| {
                let mut obs = Observation::new(e.hardware_address.clone(), e.address, e.method);
                obs.hostname = e.hostname.clone();
                obs
            })
            .collect();

        let known: HashSet<IpAddr> = entries.iter().map(|e| e.address).collect();
        let mut probes: Vec<BoxFuture<'_, ProbeOutcome>> = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                async move { ProbeOutcome::Enriched(index, self.enrich(&entry).await) }.boxed()
            })
            .collect();

        if let (Some(plan), Some(echo)) = (&self.sweep, &self.echo) {
            probes.extend(
                plan.targets
                    .iter()
                    .filter(|ip| !known.contains(&IpAddr::V4(**ip)))
                    .map(|ip| {
                        let ip = *ip;
                        let echo = echo.clone();
                        let resolver = plan.resolver.clone();
                        async move {
                            ProbeOutcome::Swept(self.sweep_one(ip, echo, resolver).await)
                        }
                        .boxed()
                    }),
            );
        }

        let total = probes.len();
        let mut finished = 0usize;
        let mut pending = stream::iter(probes).buffer_unordered(self.settings.max_concurrent_probes);
        loop {
            match timeout_at(deadline, pending.next()).await {
                Ok(Some(ProbeOutcome::Enriched(index, enrichment))) => {
                    finished += 1;
                    if let Some(obs) = observations.get_mut(index) {
                        enrichment.apply(obs);
                    }
                }
                Ok(Some(ProbeOutcome::Swept(found))) => {
                    finished += 1;
                    observations.extend(found);
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        cycle,
                        finished,
                        total,
                        "cycle deadline reached, keeping partial observations"
                    );
                    break;
                }
            }
        }
        drop(pending);

        self.annotate_vendors(&mut observations).await;

        tracing::debug!(cycle, observations = observations.len(), "collection complete");
        observations
    }

    async fn enumerate_neighbors(&self, cycle: u64, deadline: Instant) -> Vec<NeighborEntry> {
        let runs = self.neighbor_sources.iter().map(|source| async move {
            (source.name(), timeout_at(deadline, source.enumerate()).await)
        });

        let mut entries = Vec::new();
        for (name, result) in join_all(runs).await {
            match result {
                Ok(Ok(found)) => {
                    tracing::debug!(
                        cycle,
                        source = name,
                        entries = found.len(),
                        "neighbors enumerated"
                    );
                    entries.extend(found);
                }
                Ok(Err(e)) => {
                    tracing::warn!(cycle, source = name, error = %e, "neighbor source failed")
                }
                Err(_) => {
                    tracing::warn!(cycle, source = name, "neighbor source hit the cycle deadline")
                }
            }
        }
        entries
    }

    async fn enrich(&self, entry: &NeighborEntry) -> Enrichment {
        let echo = async {
            match &self.echo {
                Some(prober) => {
                    let t = self.settings.echo_timeout;
                    bounded(t, prober.probe(entry.address, t)).await.unwrap_or_default()
                }
                None => EchoReply::unreachable(),
            }
        };
        let hostname = self.lookup_hostname(entry.address);
        let precise = async {
            match &self.wireless {
                Some(source) => {
                    let t = self.settings.echo_timeout;
                    bounded(t, source.acquire(&entry.hardware_address)).await.flatten()
                }
                None => None,
            }
        };

        let (reply, hostname, precise_signal) = futures::join!(echo, hostname, precise);
        Enrichment {
            reply,
            hostname,
            precise_signal,
        }
    }

    async fn lookup_hostname(&self, addr: IpAddr) -> Option<String> {
        let resolver = self.hostnames.as_ref()?;
        let t = self.settings.hostname_timeout;
        bounded(t, resolver.resolve(addr, t)).await.flatten()
    }

    async fn sweep_one(
        &self,
        ip: Ipv4Addr,
        echo: Arc<dyn EchoProber>,
        resolver: Arc<dyn MacResolver>,
    ) -> Option<Observation> {
        let t = self.settings.echo_timeout;
        let reply = bounded(t, echo.probe(IpAddr::V4(ip), t)).await?;
        if !reply.reachable {
            return None;
        }

        let arp = self.settings.arp_timeout;
        let Some(mac) = bounded(arp, resolver.resolve(ip, arp)).await.flatten() else {
            tracing::debug!(%ip, "echo responder without a resolvable hardware address");
            return None;
        };

        let mut obs = Observation::new(mac, IpAddr::V4(ip), DiscoveryMethod::EchoSweep);
        apply_reply(&mut obs, reply);
        obs.hostname = self.lookup_hostname(IpAddr::V4(ip)).await;
        Some(obs)
    }

    async fn annotate_vendors(&self, observations: &mut [Observation]) {
        let Some(vendors) = &self.vendors else {
            return;
        };
        let mut db = vendors.lock().await;
        for obs in observations.iter_mut() {
            obs.vendor = db.lookup_vendor(&obs.hardware_address);
        }
    }
}
