use async_trait::async_trait;
use lanwatch::anomaly::{AnomalyEvent, AnomalyKind};
use lanwatch::collector::{ObservationCollector, ProbeSettings};
use lanwatch::orchestrator::{CycleOutcome, ScanOrchestrator, ScanState, Trigger};
use lanwatch::providers::{NeighborEntry, NeighborSource};
use lanwatch::sink::{ChannelEventSink, JsonLinesTelemetryLog, TelemetryRecord, TelemetrySink};
use lanwatch::{ScanConfig, ScanError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use test_utils::{mac, neighbor_entry, FakeEcho, FakeHostnames, FakeNeighbors};


const PRINTER: &str = "aa:bb:cc:00:00:10";
const PRINTER_IP: &str = "192.168.1.20";

fn settings() -> ProbeSettings {
    ProbeSettings {
        echo_timeout: Duration::from_millis(200),
        hostname_timeout: Duration::from_millis(200),
        arp_timeout: Duration::from_millis(200),
        max_concurrent_probes: 4,
        cycle_deadline: Duration::from_secs(5),
    }
}

struct Harness {
    orchestrator: Arc<ScanOrchestrator>,
    neighbors: FakeNeighbors,
    hostnames: FakeHostnames,
}

fn harness(config: ScanConfig, echo: FakeEcho) -> Harness {
    let neighbors = FakeNeighbors::new(vec![neighbor_entry(PRINTER, PRINTER_IP)]);
    let hostnames = FakeHostnames::default();
    let collector = ObservationCollector::new(settings())
        .with_neighbor_source(Arc::new(neighbors.clone()))
        .with_echo_prober(Arc::new(echo))
        .with_hostname_resolver(Arc::new(hostnames.clone()));
    let orchestrator = ScanOrchestrator::new(config, collector).unwrap();
    Harness {
        orchestrator: Arc::new(orchestrator),
        neighbors,
        hostnames,
    }
}

fn completed(outcome: CycleOutcome) -> lanwatch::CycleReport {
    match outcome {
        CycleOutcome::Completed(report) => report,
        other => panic!("expected a completed cycle, got {:?}", other),
    }
}

fn kinds(events: &[AnomalyEvent]) -> Vec<AnomalyKind> {
    events.iter().map(|e| e.kind).collect()
}

#[tokio::test]
async fn test_printer_lifecycle_through_the_orchestrator() {
    let h = harness(ScanConfig::default(), FakeEcho::new(&[(PRINTER_IP, 2)]));

    // Strong first sighting: new device, confidence 0.95, no type yet
    let report = completed(h.orchestrator.run_cycle(Trigger::Manual).await.unwrap());
    assert_eq!(report.sequence, 1);
    assert_eq!(kinds(&report.events), vec![AnomalyKind::NewDevice]);
    let snapshot = h.orchestrator.snapshot().await;
    let device = snapshot.get(&mac(PRINTER)).unwrap();
    assert_eq!(device.confidence, 0.95);
    assert_eq!(device.device_type.as_str(), "unknown");

    // Name appears
    h.hostnames.set(PRINTER_IP, "printer-office");
    let report = completed(h.orchestrator.run_cycle(Trigger::Manual).await.unwrap());
    assert!(report.events.is_empty());
    let snapshot = h.orchestrator.snapshot().await;
    let device = snapshot.get(&mac(PRINTER)).unwrap();
    assert_eq!(device.device_type.as_str(), "printer");
    assert_eq!(device.previous_hostname, None);
    assert_eq!(device.scan_count, 2);

    // Gone
    h.neighbors.set(Vec::new());
    let report = completed(h.orchestrator.run_cycle(Trigger::Periodic).await.unwrap());
    assert_eq!(kinds(&report.events), vec![AnomalyKind::DeviceOffline]);
    let snapshot = h.orchestrator.snapshot().await;
    let device = snapshot.get(&mac(PRINTER)).unwrap();
    assert!(!device.is_online);
    assert_eq!(device.scan_count, 2);

    // Back, renamed
    h.neighbors.set(vec![neighbor_entry(PRINTER, PRINTER_IP)]);
    h.hostnames.set(PRINTER_IP, "printer-office-v2");
    let report = completed(h.orchestrator.run_cycle(Trigger::Manual).await.unwrap());
    assert_eq!(kinds(&report.events), vec![AnomalyKind::HostnameChanged]);
    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(
        snapshot.get(&mac(PRINTER)).unwrap().previous_hostname.as_deref(),
        Some("printer-office")
    );
    assert_eq!(snapshot.cycle(), 4);
    assert_eq!(h.orchestrator.state(), ScanState::Idle);
}

#[tokio::test]
async fn test_trigger_while_scanning_is_skipped() {
    let echo = FakeEcho::new(&[(PRINTER_IP, 2)]).with_delay(Duration::from_millis(150));
    let h = harness(ScanConfig::default(), echo);

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_cycle(Trigger::Periodic).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.orchestrator.state(), ScanState::Scanning);

    let second = h.orchestrator.run_cycle(Trigger::Manual).await.unwrap();
    assert!(matches!(second, CycleOutcome::Skipped));

    let report = completed(first.await.unwrap().unwrap());
    assert_eq!(report.sequence, 1);
    assert_eq!(h.orchestrator.snapshot().await.len(), 1);
    assert_eq!(h.orchestrator.state(), ScanState::Idle);
}

#[tokio::test]
async fn test_concurrent_triggers_never_duplicate_devices() {
    let echo = FakeEcho::new(&[(PRINTER_IP, 2)]).with_delay(Duration::from_millis(20));
    let h = harness(ScanConfig::default(), echo);

    let mut handles = Vec::new();
    for _ in 0..6 {
        let orchestrator = h.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.run_cycle(Trigger::Manual).await
        }));
    }
    let mut completed_cycles = 0;
    for handle in handles {
        if let CycleOutcome::Completed(_) = handle.await.unwrap().unwrap() {
            completed_cycles += 1;
        }
    }
    assert!(completed_cycles >= 1);

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(
        snapshot.get(&mac(PRINTER)).unwrap().scan_count,
        completed_cycles as u64
    );
}

#[tokio::test]
async fn test_shutdown_abandons_a_scanning_cycle() {
    let echo = FakeEcho::new(&[(PRINTER_IP, 2)]).with_delay(Duration::from_millis(150));
    let h = harness(ScanConfig::default(), echo);

    let cycle = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_cycle(Trigger::Manual).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.orchestrator.shutdown();

    assert!(matches!(
        cycle.await.unwrap().unwrap(),
        CycleOutcome::Abandoned
    ));
    assert!(h.orchestrator.snapshot().await.is_empty());
    assert_eq!(h.orchestrator.state(), ScanState::Idle);

    // No new cycles after shutdown
    assert!(matches!(
        h.orchestrator.run_cycle(Trigger::Manual).await.unwrap(),
        CycleOutcome::Skipped
    ));
}

#[tokio::test]
async fn test_telemetry_is_written_before_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("telemetry.jsonl");
    let (events, mut rx) = ChannelEventSink::channel(16);

    let neighbors = FakeNeighbors::new(vec![neighbor_entry(PRINTER, PRINTER_IP)]);
    let collector = ObservationCollector::new(settings()).with_neighbor_source(Arc::new(neighbors));
    let orchestrator = ScanOrchestrator::new(ScanConfig::default(), collector)
        .unwrap()
        .with_telemetry_sink(Arc::new(JsonLinesTelemetryLog::new(&path)))
        .with_event_sink(Arc::new(events));

    completed(orchestrator.run_cycle(Trigger::Manual).await.unwrap());

    let event = rx.recv().await.unwrap();
    assert_eq!(event.kind, AnomalyKind::NewDevice);
    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 1);
}

struct BrokenTelemetry {
    calls: AtomicUsize,
}

#[async_trait]
impl TelemetrySink for BrokenTelemetry {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn record(&self, _batch: &[TelemetryRecord]) -> Result<(), ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ScanError::Sink {
            sink: "broken",
            reason: "disk full".to_string(),
        })
    }
}

#[tokio::test]
async fn test_telemetry_failure_aborts_notification_and_returns_to_idle() {
    let (events, mut rx) = ChannelEventSink::channel(16);
    let telemetry = Arc::new(BrokenTelemetry {
        calls: AtomicUsize::new(0),
    });

    let neighbors = FakeNeighbors::new(vec![neighbor_entry(PRINTER, PRINTER_IP)]);
    let collector = ObservationCollector::new(settings()).with_neighbor_source(Arc::new(neighbors));
    let orchestrator = ScanOrchestrator::new(ScanConfig::default(), collector)
        .unwrap()
        .with_telemetry_sink(telemetry.clone())
        .with_event_sink(Arc::new(events));

    let result = orchestrator.run_cycle(Trigger::Manual).await;
    assert!(matches!(result, Err(ScanError::CycleAborted { cycle: 1, .. })));
    assert_eq!(telemetry.calls.load(Ordering::SeqCst), 1);
    assert!(rx.try_recv().is_err());
    assert_eq!(orchestrator.state(), ScanState::Idle);

    // The merged snapshot stays published and later cycles still merge
    assert_eq!(orchestrator.snapshot().await.len(), 1);
    assert!(orchestrator.run_cycle(Trigger::Manual).await.is_err());
    assert_eq!(orchestrator.snapshot().await.cycle(), 2);
}

#[tokio::test]
async fn test_unauthorized_device_reported_once() {
    let config = ScanConfig {
        allow_list: vec!["00:11:22".to_string()],
        ..ScanConfig::default()
    };
    let h = harness(config, FakeEcho::default());

    let first = completed(h.orchestrator.run_cycle(Trigger::Manual).await.unwrap());
    let second = completed(h.orchestrator.run_cycle(Trigger::Manual).await.unwrap());

    assert_eq!(
        kinds(&first.events),
        vec![AnomalyKind::NewDevice, AnomalyKind::UnauthorizedDevice]
    );
    assert!(second.events.is_empty());
}

#[tokio::test]
async fn test_retention_purges_stale_offline_devices() {
    let h = harness(ScanConfig::default(), FakeEcho::default());
    completed(h.orchestrator.run_cycle(Trigger::Manual).await.unwrap());
    h.neighbors.set(Vec::new());
    completed(h.orchestrator.run_cycle(Trigger::Manual).await.unwrap());

    // Seen just now: not stale yet
    let removed = h.orchestrator.purge_stale(chrono::Duration::minutes(10)).await;
    assert_eq!(removed, Some(Vec::new()));
    assert_eq!(h.orchestrator.snapshot().await.len(), 1);

    let removed = h.orchestrator.purge_stale(chrono::Duration::zero()).await;
    assert_eq!(removed, Some(vec![mac(PRINTER)]));
    assert!(h.orchestrator.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_periodic_loop_runs_until_shutdown() {
    let config = ScanConfig {
        scan_interval_secs: 1,
        ..ScanConfig::default()
    };
    let h = harness(config, FakeEcho::default());

    let (handle, mut reports) = h.orchestrator.spawn_periodic();
    let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.trigger, Trigger::Periodic);
    assert_eq!(report.sequence, 1);

    h.orchestrator.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(h.orchestrator.is_shutdown());
}

/// Panics on its first enumeration, then behaves
struct PanicsOnceNeighbors {
    calls: AtomicUsize,
}

#[async_trait]
impl NeighborSource for PanicsOnceNeighbors {
    fn name(&self) -> &'static str {
        "panics once"
    }

    async fn enumerate(&self) -> Result<Vec<NeighborEntry>, ScanError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("neighbor table exploded");
        }
        Ok(vec![neighbor_entry(PRINTER, PRINTER_IP)])
    }
}

#[tokio::test]
async fn test_periodic_loop_survives_a_panicking_cycle() {
    let neighbors = Arc::new(PanicsOnceNeighbors {
        calls: AtomicUsize::new(0),
    });
    let collector = ObservationCollector::new(settings()).with_neighbor_source(neighbors.clone());
    let config = ScanConfig {
        scan_interval_secs: 1,
        ..ScanConfig::default()
    };
    let orchestrator = Arc::new(ScanOrchestrator::new(config, collector).unwrap());

    let (handle, mut reports) = orchestrator.spawn_periodic();
    let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.sequence, 2);
    assert_eq!(report.devices, 1);
    assert!(neighbors.calls.load(Ordering::SeqCst) >= 2);
    assert!(!handle.is_finished());
    assert_eq!(orchestrator.state(), ScanState::Idle);

    orchestrator.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_failed_event_sink_does_not_starve_the_others() {
    let (closed, closed_rx) = ChannelEventSink::channel(4);
    drop(closed_rx);
    let (open, mut open_rx) = ChannelEventSink::channel(4);

    let neighbors = FakeNeighbors::new(vec![neighbor_entry(PRINTER, PRINTER_IP)]);
    let collector = ObservationCollector::new(settings()).with_neighbor_source(Arc::new(neighbors));
    let orchestrator = ScanOrchestrator::new(ScanConfig::default(), collector)
        .unwrap()
        .with_event_sink(Arc::new(closed))
        .with_event_sink(Arc::new(open));

    let result = orchestrator.run_cycle(Trigger::Manual).await;
    assert!(matches!(result, Err(ScanError::CycleAborted { cycle: 1, .. })));
    assert_eq!(open_rx.recv().await.unwrap().kind, AnomalyKind::NewDevice);
    assert_eq!(orchestrator.state(), ScanState::Idle);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = ScanConfig {
        max_concurrent_probes: 0,
        ..ScanConfig::default()
    };
    let collector = ObservationCollector::new(settings());
    assert!(matches!(
        ScanOrchestrator::new(config, collector),
        Err(ScanError::Config(_))
    ));
}

#[test]
fn test_discovery_window_must_fit_the_cycle_deadline() {
    let config = ScanConfig {
        ssdp_discovery: true,
        discovery_window_ms: 30_000,
        cycle_deadline_ms: 20_000,
        ..ScanConfig::default()
    };
    assert!(matches!(
        ScanOrchestrator::new(config, ObservationCollector::new(settings())),
        Err(ScanError::Config(_))
    ));
}
