use lanwatch::anomaly::{AnomalyEvent, AnomalyKind};
use lanwatch::registry::Registry;
use lanwatch::sink::{
    ChannelEventSink, EventSink, JsonLinesTelemetryLog, TelemetryRecord, TelemetrySink,
    TracingEventSink,
};
use std::sync::Arc;
use test_utils::{at_minute, create_observation, mac, merge_cycle};


fn sample_registry() -> Registry {
    merge_cycle(
        &Registry::new(),
        1,
        vec![
            create_observation("aa:bb:cc:00:00:02", "192.168.1.11")
                .with_hostname("printer-office")
                .with_signal(-35),
            create_observation("aa:bb:cc:00:00:01", "192.168.1.10"),
        ],
    )
}

fn event(kind: AnomalyKind, mac_str: &str) -> AnomalyEvent {
    AnomalyEvent {
        kind,
        hardware_address: mac(mac_str),
        detail: format!("{} {}", kind, mac_str),
        timestamp: at_minute(1),
    }
}

#[test]
fn test_telemetry_batch_has_one_record_per_device_in_mac_order() {
    let batch = TelemetryRecord::batch(&sample_registry(), at_minute(1));
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].hardware_address, mac("aa:bb:cc:00:00:01"));
    assert_eq!(batch[1].hostname.as_deref(), Some("printer-office"));
    assert_eq!(batch[1].confidence, 0.95);
    assert!(batch.iter().all(|r| r.scan_timestamp == at_minute(1)));
}

#[tokio::test]
async fn test_json_lines_log_appends_whole_batches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("telemetry.jsonl");
    let log = JsonLinesTelemetryLog::new(&path);

    let registry = sample_registry();
    log.record(&TelemetryRecord::batch(&registry, at_minute(1)))
        .await
        .unwrap();
    log.record(&TelemetryRecord::batch(&registry, at_minute(2)))
        .await
        .unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let records: Vec<TelemetryRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].scan_timestamp, at_minute(1));
    assert_eq!(records[3].scan_timestamp, at_minute(2));
    assert_eq!(records[1].device_type.as_str(), "printer");

    let raw: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(raw["hardware_address"], "aa:bb:cc:00:00:01");
    assert_eq!(raw["device_type"], "unknown");
    assert!(raw["signal_quality"].is_null());
}

#[tokio::test]
async fn test_concurrent_batches_do_not_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("telemetry.jsonl");
    let log = Arc::new(JsonLinesTelemetryLog::new(&path));
    let registry = sample_registry();

    let mut handles = Vec::new();
    for minute in 0..8 {
        let log = log.clone();
        let batch = TelemetryRecord::batch(&registry, at_minute(minute));
        handles.push(tokio::spawn(async move { log.record(&batch).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let contents = std::fs::read_to_string(&path).unwrap();
    let records: Vec<TelemetryRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 16);
    for pair in records.chunks(2) {
        assert_eq!(pair[0].scan_timestamp, pair[1].scan_timestamp);
        assert_eq!(pair[0].hardware_address, mac("aa:bb:cc:00:00:01"));
    }
}

#[tokio::test]
async fn test_unwritable_log_is_a_sink_error() {
    let dir = tempfile::tempdir().unwrap();
    let log = JsonLinesTelemetryLog::new(dir.path().join("missing").join("telemetry.jsonl"));
    let result = log
        .record(&TelemetryRecord::batch(&sample_registry(), at_minute(1)))
        .await;
    assert!(matches!(result, Err(lanwatch::ScanError::Sink { .. })));
}

#[tokio::test]
async fn test_channel_sink_preserves_order() {
    let (sink, mut rx) = ChannelEventSink::channel(8);
    let events = vec![
        event(AnomalyKind::NewDevice, "aa:00:00:00:00:01"),
        event(AnomalyKind::UnauthorizedDevice, "aa:00:00:00:00:01"),
        event(AnomalyKind::WeakSignal, "bb:00:00:00:00:01"),
    ];
    sink.emit(&events).await.unwrap();

    for expected in &events {
        assert_eq!(&rx.recv().await.unwrap(), expected);
    }
}

#[tokio::test]
async fn test_channel_sink_fails_when_receiver_is_gone() {
    let (sink, rx) = ChannelEventSink::channel(1);
    drop(rx);
    let result = sink
        .emit(&[event(AnomalyKind::DeviceOffline, "aa:00:00:00:00:01")])
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_tracing_sink_accepts_events() {
    let sink = TracingEventSink::new();
    assert_eq!(sink.name(), "tracing");
    sink.emit(&[event(AnomalyKind::HostnameChanged, "aa:00:00:00:00:01")])
        .await
        .unwrap();
}
