use super::WirelessSignalSource;
use crate::model::MacAddr;
use async_trait::async_trait;
use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const PROC_WIRELESS: &str = "/proc/net/wireless";

/// Signal level of this host's own wireless adapters, read from
/// `/proc/net/wireless` and keyed by adapter hardware address.
///
/// Other stations are not measurable from here; for them `acquire` returns
/// `None`. Readings are cached briefly so one cycle reads the file once.
pub struct ProcWirelessSignal {
    path: PathBuf,
    ttl: Duration,
    cache: Mutex<Option<(Instant, HashMap<MacAddr, i32>)>>,
}

impl Default for ProcWirelessSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcWirelessSignal {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from(PROC_WIRELESS),
            ttl: Duration::from_secs(2),
            cache: Mutex::new(None),
        }
    }

    async fn levels(&self) -> HashMap<MacAddr, i32> {
        let mut cache = self.cache.lock().await;
        if let Some((at, levels)) = cache.as_ref() {
            if at.elapsed() < self.ttl {
                return levels.clone();
            }
        }

        let levels = self.read_levels().await;
        *cache = Some((Instant::now(), levels.clone()));
        levels
    }

    async fn read_levels(&self) -> HashMap<MacAddr, i32> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(_) => return HashMap::new(),
        };
        let by_interface = parse_proc_wireless(&contents);
        if by_interface.is_empty() {
            return HashMap::new();
        }

        let interfaces = match tokio::task::spawn_blocking(NetworkInterface::show).await {
            Ok(Ok(interfaces)) => interfaces,
            _ => return HashMap::new(),
        };

        interfaces
            .into_iter()
            .filter_map(|iface| {
                let level = *by_interface.get(&iface.name)?;
                let mac = MacAddr::parse(iface.mac_addr.as_deref()?).ok()?;
                Some((mac, level))
            })
            .collect()
    }
}

#[async_trait]
impl WirelessSignalSource for ProcWirelessSignal {
    fn name(&self) -> &'static str {
        "proc wireless"
    }

    async fn acquire(&self, mac: &MacAddr) -> Option<i32> {
        self.levels().await.get(mac).copied()
    }
}

/// Interface name to signal level (dBm). Two header lines, then
/// `wlan0: 0000   54.  -56.  -256  ...`
pub(crate) fn parse_proc_wireless(contents: &str) -> HashMap<String, i32> {
    contents
        .lines()
        .skip(2)
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            let level = rest.split_whitespace().nth(2)?;
            let level: f64 = level.trim_end_matches('.').parse().ok()?;
            Some((name.trim().to_string(), level.round() as i32))
        })
        .collect()
}
