//! lanwatch - continuous LAN device discovery
//!
//! This library tracks devices on the local network across scan cycles:
//! - Neighbor-table, adapter, echo-sweep, SSDP and mDNS-SD discovery behind
//!   capability traits
//! - A MAC-keyed identity registry merged once per cycle
//! - Heuristic device classification and confidence scoring
//! - Anomaly events (new device, rename, unauthorized, weak signal, offline)
//! - Telemetry and event sinks

pub mod anomaly;
pub mod classify;
pub mod collector;
pub mod confidence;
pub mod config;
pub mod constants;
pub mod db;
pub mod errors;
pub mod model;
pub mod net;
pub mod orchestrator;
pub mod policy;
pub mod providers;
pub mod registry;
pub mod sink;
pub mod table;

// Re-export commonly used types for convenience
pub use anomaly::{AnomalyEvent, AnomalyKind};
pub use collector::{ObservationCollector, ProbeSettings};
pub use config::ScanConfig;
pub use db::oui::MacVendorDatabase;
pub use errors::ScanError;
pub use model::{AddressSet, DeviceType, DiscoveryMethod, MacAddr, Observation, ScanCycle};
pub use orchestrator::{CycleOutcome, CycleReport, ScanOrchestrator, ScanState, Trigger};
pub use policy::AllowList;
pub use registry::{Device, MergeContext, Registry};
pub use sink::{
    ChannelEventSink, EventSink, JsonLinesTelemetryLog, TelemetryRecord, TelemetrySink,
    TracingEventSink,
};
