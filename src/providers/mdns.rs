use super::{DiscoveredHost, ServiceDiscovery};
use crate::errors::ScanError;
use crate::model::DiscoveryMethod;
use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{timeout, Instant};

/// mDNS-SD service types that usually carry a useful instance name
pub const SERVICES: &[&str] = &[
    "_workstation._tcp.local.",
    "_device-info._tcp.local.",
    "_airplay._tcp.local.",
    "_googlecast._tcp.local.",
    "_ipp._tcp.local.",
    "_printer._tcp.local.",
    "_http._tcp.local.",
    "_ssh._tcp.local.",
    "_homekit._tcp.local.",
];

/// Host name behind a resolved service: the instance label when there is
/// one, otherwise the announced host name, without `.local`.
pub fn instance_hostname(fullname: &str, service: &str, host: &str) -> Option<String> {
    let mut name = fullname
        .trim_end_matches(service)
        .trim_end_matches('.')
        .trim_end_matches(".local");
    if name.is_empty() {
        name = host.trim_end_matches('.').trim_end_matches(".local");
    }
    let name = name.trim();
    if name.is_empty() || name.eq_ignore_ascii_case("localhost") {
        None
    } else {
        Some(name.to_string())
    }
}

/// One mDNS-SD browse per cycle, shared by discovery and hostname lookup.
///
/// [`browse`](Self::browse) runs a single daemon across [`SERVICES`] and
/// remembers who answered. [`lookup`](Self::lookup) answers from that
/// result without touching the network.
pub struct MdnsBrowser {
    window: Duration,
    /// Held for the duration of a browse; at most one daemon at a time
    browsing: Mutex<()>,
    names: RwLock<Arc<HashMap<IpAddr, String>>>,
}

impl MdnsBrowser {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            browsing: Mutex::new(()),
            names: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Name announced for `ip` in the most recent browse
    pub async fn lookup(&self, ip: IpAddr) -> Option<String> {
        self.names.read().await.get(&ip).cloned()
    }

    /// Browse every service for the configured window
    pub async fn browse(&self) -> Result<Vec<DiscoveredHost>, ScanError> {
        let _browsing = self.browsing.lock().await;
        let daemon = ServiceDaemon::new().map_err(|e| ScanError::unavailable("mdns", e.to_string()))?;
        let total_deadline = Instant::now() + self.window;
        let per_service = self.window / SERVICES.len() as u32;
        let mut hosts = Vec::new();

        for &service in SERVICES {
            let service_deadline = std::cmp::min(Instant::now() + per_service, total_deadline);
            let receiver = match daemon.browse(service) {
                Ok(receiver) => receiver,
                Err(e) => {
                    tracing::debug!(service, error = %e, "mDNS browse failed");
                    continue;
                }
            };

            loop {
                let now = Instant::now();
                if now >= service_deadline {
                    break;
                }
                match timeout(service_deadline - now, receiver.recv_async()).await {
                    Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                        let hostname =
                            instance_hostname(info.get_fullname(), service, info.get_hostname());
                        for scoped_ip in info.get_addresses().iter() {
                            hosts.push(DiscoveredHost {
                                address: *scoped_ip,
                                hostname: hostname.clone(),
                            });
                        }
                    }
                    Ok(Ok(_)) => continue,
                    Ok(Err(_)) | Err(_) => break,
                }
            }

            daemon.stop_browse(service).ok();
            if Instant::now() >= total_deadline {
                break;
            }
        }

        daemon.shutdown().ok();
        self.remember(&hosts).await;
        tracing::debug!(responders = hosts.len(), "mDNS browse complete");
        Ok(hosts)
    }

    /// Replace the name table with this browse's answers. The shortest name
    /// per address wins, so `nas` beats `nas [aa:bb:cc:dd:ee:ff]`.
    async fn remember(&self, hosts: &[DiscoveredHost]) {
        let mut names: HashMap<IpAddr, String> = HashMap::new();
        for host in hosts {
            let Some(name) = &host.hostname else {
                continue;
            };
            match names.get(&host.address) {
                Some(existing) if existing.len() <= name.len() => {}
                _ => {
                    names.insert(host.address, name.clone());
                }
            }
        }
        *self.names.write().await = Arc::new(names);
    }
}

#[async_trait]
impl ServiceDiscovery for MdnsBrowser {
    fn name(&self) -> &'static str {
        "mdns"
    }

    fn method(&self) -> DiscoveryMethod {
        DiscoveryMethod::Mdns
    }

    async fn discover(&self) -> Result<Vec<DiscoveredHost>, ScanError> {
        self.browse().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_label_is_preferred() {
        assert_eq!(
            instance_hostname(
                "Living Room TV._googlecast._tcp.local.",
                "_googlecast._tcp.local.",
                "abc123.local."
            )
            .as_deref(),
            Some("Living Room TV")
        );
    }

    #[test]
    fn falls_back_to_host_name() {
        assert_eq!(
            instance_hostname("_ipp._tcp.local.", "_ipp._tcp.local.", "printer-office.local.")
                .as_deref(),
            Some("printer-office")
        );
        assert_eq!(
            instance_hostname("_ipp._tcp.local.", "_ipp._tcp.local.", "localhost.local."),
            None
        );
    }

    #[tokio::test]
    async fn lookup_answers_from_the_last_browse() {
        let browser = MdnsBrowser::new(Duration::from_secs(1));
        let nas: IpAddr = "192.168.1.5".parse().unwrap();
        let tv: IpAddr = "192.168.1.6".parse().unwrap();

        browser
            .remember(&[
                DiscoveredHost {
                    address: nas,
                    hostname: Some("nas [aa:bb:cc:dd:ee:ff]".to_string()),
                },
                DiscoveredHost {
                    address: nas,
                    hostname: Some("nas".to_string()),
                },
                DiscoveredHost {
                    address: tv,
                    hostname: None,
                },
            ])
            .await;
        assert_eq!(browser.lookup(nas).await.as_deref(), Some("nas"));
        assert_eq!(browser.lookup(tv).await, None);

        // A later browse replaces the table
        browser.remember(&[]).await;
        assert_eq!(browser.lookup(nas).await, None);
    }
}
