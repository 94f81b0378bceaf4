//! Scan cycle coordination.
//!
//! [`ScanOrchestrator`] is the single writer of the registry. Every cycle,
//! whether started by the periodic loop or on demand, goes through
//! [`ScanOrchestrator::run_cycle`]:
//!
//! `Idle -> Scanning -> Merging -> Notifying -> Idle`
//!
//! A trigger that arrives while a cycle is in progress is dropped, not
//! queued.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::anomaly::{self, AnomalyEvent};
use crate::collector::ObservationCollector;
use crate::config::ScanConfig;
use crate::errors::ScanError;
use crate::model::{MacAddr, ScanCycle};
use crate::policy::AllowList;
use crate::registry::{MergeContext, Registry};
use crate::sink::{
    EventSink, JsonLinesTelemetryLog, TelemetryRecord, TelemetrySink, TracingEventSink,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScanState {
    Idle = 0,
    Scanning = 1,
    Merging = 2,
    Notifying = 3,
}

impl ScanState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ScanState::Scanning,
            2 => ScanState::Merging,
            3 => ScanState::Notifying,
            _ => ScanState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Periodic,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Periodic => f.write_str("periodic"),
            Trigger::Manual => f.write_str("manual"),
        }
    }
}

/// Summary of a completed cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub sequence: u64,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub observations: usize,
    pub devices: usize,
    pub online: usize,
    pub events: Vec<AnomalyEvent>,
    pub purged: Vec<MacAddr>,
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was already running
    Skipped,
    /// Shutdown was requested while scanning; nothing was merged
    Abandoned,
}

/// Holds the non-idle state for the lifetime of a cycle and puts the
/// orchestrator back to `Idle` on drop, including on early return or panic.
struct CycleGuard<'a> {
    state: &'a AtomicU8,
}

impl<'a> CycleGuard<'a> {
    fn acquire(state: &'a AtomicU8, first: ScanState) -> Option<Self> {
        state
            .compare_exchange(
                ScanState::Idle as u8,
                first as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| Self { state })
    }

    fn advance(&self, next: ScanState) {
        self.state.store(next as u8, Ordering::Release);
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.state.store(ScanState::Idle as u8, Ordering::Release);
    }
}

pub struct ScanOrchestrator {
    config: ScanConfig,
    allow_list: AllowList,
    collector: ObservationCollector,
    registry: RwLock<Arc<Registry>>,
    state: AtomicU8,
    sequence: AtomicU64,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    event_sinks: Vec<Arc<dyn EventSink>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ScanOrchestrator {
    pub fn new(config: ScanConfig, collector: ObservationCollector) -> Result<Self, ScanError> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            allow_list: AllowList::new(&config.allow_list),
            config,
            collector,
            registry: RwLock::new(Arc::new(Registry::new())),
            state: AtomicU8::new(ScanState::Idle as u8),
            sequence: AtomicU64::new(0),
            telemetry: None,
            event_sinks: Vec::new(),
            shutdown_tx,
        })
    }

    /// System providers, the configured telemetry log and a tracing event sink
    pub fn system(config: ScanConfig) -> Result<Self, ScanError> {
        let collector = ObservationCollector::system(&config)?;
        let telemetry_path = config.telemetry_path.clone();
        let mut orchestrator =
            Self::new(config, collector)?.with_event_sink(Arc::new(TracingEventSink::new()));
        if let Some(path) = telemetry_path {
            orchestrator =
                orchestrator.with_telemetry_sink(Arc::new(JsonLinesTelemetryLog::new(path)));
        }
        Ok(orchestrator)
    }

    pub fn with_telemetry_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sinks.push(sink);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn state(&self) -> ScanState {
        ScanState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Current published snapshot. Cheap; never blocks on a running cycle
    /// for longer than the pointer swap.
    pub async fn snapshot(&self) -> Arc<Registry> {
        self.registry.read().await.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stop the periodic loop. A cycle still scanning is abandoned before
    /// it merges; one already merging runs to completion.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    async fn publish(&self, registry: Registry) -> Arc<Registry> {
        let registry = Arc::new(registry);
        *self.registry.write().await = registry.clone();
        registry
    }

    /// Run one scan cycle unless one is already in progress
    pub async fn run_cycle(&self, trigger: Trigger) -> Result<CycleOutcome, ScanError> {
        if self.is_shutdown() {
            return Ok(CycleOutcome::Skipped);
        }
        let Some(guard) = CycleGuard::acquire(&self.state, ScanState::Scanning) else {
            tracing::debug!(%trigger, state = ?self.state(), "cycle already running, trigger ignored");
            return Ok(CycleOutcome::Skipped);
        };

        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::info!(cycle = sequence, %trigger, "scan cycle started");

        let observations = self.collector.collect(sequence).await;
        if self.is_shutdown() {
            tracing::info!(cycle = sequence, "shutdown requested, abandoning cycle");
            return Ok(CycleOutcome::Abandoned);
        }

        guard.advance(ScanState::Merging);
        let previous = self.snapshot().await;
        let now = Utc::now();
        let cycle = ScanCycle::new(sequence, started_at, observations);
        let ctx = MergeContext {
            allow_list: &self.allow_list,
            history_capacity: self.config.signal_history_capacity,
            now,
        };
        let merged = previous.merge(&cycle, &ctx);
        let events = anomaly::detect(&previous, &merged, self.config.weak_signal_threshold, now);

        let (merged, purged) = match self.config.retention() {
            Some(retention) => merged.purge_stale(now - retention),
            None => (merged, Vec::new()),
        };
        if !purged.is_empty() {
            tracing::info!(cycle = sequence, purged = purged.len(), "stale devices purged");
        }
        let current = self.publish(merged).await;

        guard.advance(ScanState::Notifying);
        self.notify(sequence, &current, &events, now).await?;

        let report = CycleReport {
            sequence,
            trigger,
            started_at,
            finished_at: Utc::now(),
            observations: cycle.observations.len(),
            devices: current.len(),
            online: current.online_count(),
            events,
            purged,
        };
        tracing::info!(
            cycle = sequence,
            devices = report.devices,
            online = report.online,
            events = report.events.len(),
            elapsed_ms = clock.elapsed().as_millis() as u64,
            "scan cycle complete"
        );
        Ok(CycleOutcome::Completed(report))
    }

    /// Telemetry first, then events. A telemetry failure withholds the
    /// events; every event sink is tried and the first failure is returned.
    async fn notify(
        &self,
        sequence: u64,
        current: &Registry,
        events: &[AnomalyEvent],
        now: DateTime<Utc>,
    ) -> Result<(), ScanError> {
        if let Some(sink) = &self.telemetry {
            let batch = TelemetryRecord::batch(current, now);
            sink.record(&batch).await.map_err(|e| {
                tracing::error!(cycle = sequence, sink = sink.name(), error = %e, "telemetry write failed");
                ScanError::CycleAborted {
                    cycle: sequence,
                    reason: e.to_string(),
                }
            })?;
        }

        if events.is_empty() {
            return Ok(());
        }
        let mut first_failure = None;
        for sink in &self.event_sinks {
            if let Err(e) = sink.emit(events).await {
                tracing::error!(cycle = sequence, sink = sink.name(), error = %e, "event delivery failed");
                first_failure.get_or_insert(ScanError::CycleAborted {
                    cycle: sequence,
                    reason: e.to_string(),
                });
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop offline devices not seen within `max_age`. Returns `None` when
    /// a cycle is in progress.
    pub async fn purge_stale(&self, max_age: chrono::Duration) -> Option<Vec<MacAddr>> {
        let _guard = CycleGuard::acquire(&self.state, ScanState::Merging)?;
        let current = self.snapshot().await;
        let (purged, removed) = current.purge_stale(Utc::now() - max_age);
        if !removed.is_empty() {
            self.publish(purged).await;
            tracing::info!(purged = removed.len(), "stale devices purged");
        }
        Some(removed)
    }

    /// Run cycles every `scan_interval` until [`shutdown`](Self::shutdown).
    /// Missed ticks are skipped. Completed reports are offered on the
    /// returned channel; they are dropped when the receiver lags.
    ///
    /// Each cycle runs in its own task. A cycle that panics is logged as
    /// failed and the next tick proceeds.
    pub fn spawn_periodic(
        self: &Arc<Self>,
    ) -> (JoinHandle<()>, mpsc::Receiver<CycleReport>) {
        let (tx, rx) = mpsc::channel(16);
        let orchestrator = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(orchestrator.config.scan_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        let cycle = {
                            let orchestrator = Arc::clone(&orchestrator);
                            tokio::spawn(async move { orchestrator.run_cycle(Trigger::Periodic).await })
                        };
                        match cycle.await {
                            Ok(Ok(CycleOutcome::Completed(report))) => {
                                let _ = tx.try_send(report);
                            }
                            Ok(Ok(CycleOutcome::Skipped)) => {
                                tracing::debug!("periodic tick skipped, cycle in progress");
                            }
                            Ok(Ok(CycleOutcome::Abandoned)) => break,
                            Ok(Err(e)) => tracing::error!(error = %e, "scan cycle failed"),
                            Err(e) if e.is_panic() => {
                                tracing::error!(error = %e, "scan cycle panicked");
                            }
                            Err(e) => tracing::error!(error = %e, "scan cycle task cancelled"),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::info!("periodic scanning stopped");
        });

        (handle, rx)
    }
}
