use crate::anomaly::AnomalyEvent;
use crate::errors::ScanError;
use crate::model::{AddressSet, DeviceType, MacAddr};
use crate::registry::{Device, Registry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};

/// One row of the telemetry log: the state of a device after a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub scan_timestamp: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
    pub hostname: Option<String>,
    pub previous_hostname: Option<String>,
    pub hardware_address: MacAddr,
    pub addresses: AddressSet,
    pub signal_quality: Option<i32>,
    pub precise_signal_quality: Option<i32>,
    pub is_online: bool,
    pub confidence: f64,
    pub scan_count: u64,
    pub device_type: DeviceType,
    pub is_authorized: bool,
    pub vendor: Option<String>,
}

impl TelemetryRecord {
    pub fn from_device(device: &Device, scan_timestamp: DateTime<Utc>) -> Self {
        Self {
            scan_timestamp,
            first_seen: device.first_seen,
            hostname: device.hostname.clone(),
            previous_hostname: device.previous_hostname.clone(),
            hardware_address: device.hardware_address.clone(),
            addresses: device.addresses.clone(),
            signal_quality: device.signal_quality,
            precise_signal_quality: device.precise_signal_quality,
            is_online: device.is_online,
            confidence: device.confidence,
            scan_count: device.scan_count,
            device_type: device.device_type,
            is_authorized: device.is_authorized,
            vendor: device.vendor.clone(),
        }
    }

    /// One record per device, in hardware-address order
    pub fn batch(registry: &Registry, scan_timestamp: DateTime<Utc>) -> Vec<Self> {
        registry
            .devices()
            .map(|d| Self::from_device(d, scan_timestamp))
            .collect()
    }
}

/// Destination for per-cycle telemetry batches
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, batch: &[TelemetryRecord]) -> Result<(), ScanError>;

    fn name(&self) -> &'static str;
}

/// Destination for anomaly events, delivered in emission order
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, events: &[AnomalyEvent]) -> Result<(), ScanError>;

    fn name(&self) -> &'static str;
}

/// Append-only JSON-lines file. A batch goes out in a single write so
/// concurrent readers never see half a cycle.
pub struct JsonLinesTelemetryLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesTelemetryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TelemetrySink for JsonLinesTelemetryLog {
    fn name(&self) -> &'static str {
        "json-lines telemetry"
    }

    async fn record(&self, batch: &[TelemetryRecord]) -> Result<(), ScanError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for record in batch {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ScanError::Sink {
                sink: "json-lines telemetry",
                reason: format!("{}: {}", self.path.display(), e),
            })?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Writes each event as a structured log line
#[derive(Debug, Default)]
pub struct TracingEventSink {
    lock: Mutex<()>,
}

impl TracingEventSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventSink for TracingEventSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn emit(&self, events: &[AnomalyEvent]) -> Result<(), ScanError> {
        let _guard = self.lock.lock().await;
        for event in events {
            tracing::warn!(
                kind = event.kind.as_str(),
                mac = %event.hardware_address,
                at = %event.timestamp.to_rfc3339(),
                "{}",
                event.detail
            );
        }
        Ok(())
    }
}

/// Forwards events to an mpsc receiver, e.g. a UI task or a test
pub struct ChannelEventSink {
    tx: Mutex<mpsc::Sender<AnomalyEvent>>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::Sender<AnomalyEvent>) -> Self {
        Self { tx: Mutex::new(tx) }
    }

    /// Sink plus the receiving end of a channel holding `capacity` events
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AnomalyEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn emit(&self, events: &[AnomalyEvent]) -> Result<(), ScanError> {
        let tx = self.tx.lock().await;
        for event in events {
            tx.send(event.clone()).await.map_err(|_| ScanError::Sink {
                sink: "channel",
                reason: "receiver dropped".to_string(),
            })?;
        }
        Ok(())
    }
}
