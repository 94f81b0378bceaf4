// ==========================================================
//  lanwatch - continuous LAN device discovery
// ==========================================================

use clap::Parser;
use lanwatch::net::interface;
use lanwatch::table::render_registry;
use lanwatch::{
    CycleOutcome, CycleReport, Registry, ScanConfig, ScanError, ScanOrchestrator, Trigger,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "lanwatch", version, about = "Track devices on the local network")]
struct Cli {
    /// Run a single scan cycle and exit
    #[arg(long)]
    once: bool,

    /// Seconds between periodic scan cycles
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Concurrent probe limit
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Authorized hardware address or prefix (repeatable)
    #[arg(long = "allow", value_name = "MAC")]
    allow: Vec<String>,

    /// Append per-cycle telemetry to this JSON-lines file
    #[arg(long, value_name = "PATH")]
    telemetry: Option<PathBuf>,

    /// Echo-sweep a /24 network (CIDR or interface name) each cycle
    #[arg(long, value_name = "CIDR|IFACE")]
    sweep: Option<String>,

    /// Include the IPv6 neighbor cache
    #[arg(long)]
    ipv6: bool,

    /// Browse mDNS-SD services each cycle (also names hosts without PTR records)
    #[arg(long)]
    mdns: bool,

    /// Send an SSDP (UPnP) search each cycle
    #[arg(long)]
    ssdp: bool,

    /// JSON configuration file; flags override its values
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Purge offline devices not seen for this many minutes
    #[arg(long, value_name = "MIN")]
    retention_minutes: Option<u64>,

    /// List network interfaces and exit
    #[arg(long)]
    list: bool,
}

impl Cli {
    fn into_config(self) -> Result<ScanConfig, ScanError> {
        let mut config = match &self.config {
            Some(path) => ScanConfig::from_json_file(path)?,
            None => ScanConfig::default(),
        };

        if let Some(secs) = self.interval {
            config.scan_interval_secs = secs;
        }
        if let Some(jobs) = self.jobs {
            config.max_concurrent_probes = jobs.max(1);
        }
        if !self.allow.is_empty() {
            config.allow_list = self.allow;
        }
        if self.telemetry.is_some() {
            config.telemetry_path = self.telemetry;
        }
        if self.sweep.is_some() {
            config.sweep_network = self.sweep;
        }
        if self.retention_minutes.is_some() {
            config.retention_minutes = self.retention_minutes;
        }
        config.enable_ipv6 |= self.ipv6;
        config.mdns_discovery |= self.mdns;
        config.ssdp_discovery |= self.ssdp;

        config.validate()?;
        Ok(config)
    }
}

fn print_interfaces() -> Result<(), ScanError> {
    let interfaces = interface::list_network_interfaces()?;
    if interfaces.is_empty() {
        println!("No network interfaces with IPv4 addresses found.");
        return Ok(());
    }
    println!("Available network interfaces:");
    for summary in interfaces {
        println!(
            "  {:<12} {:<16} {}",
            summary.name, summary.address, summary.network
        );
    }
    Ok(())
}

fn print_report(report: &CycleReport, registry: &Registry) {
    println!(
        "\nCycle {} ({}): {} devices, {} online, {} events",
        report.sequence,
        report.trigger,
        report.devices,
        report.online,
        report.events.len()
    );
    for event in &report.events {
        println!("  [{}] {}", event.kind, event.detail);
    }
    println!("{}", render_registry(registry));
}

#[tokio::main]
async fn main() -> Result<(), ScanError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lanwatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if cli.list {
        return print_interfaces();
    }

    let once = cli.once;
    let config = cli.into_config()?;
    let orchestrator = Arc::new(ScanOrchestrator::system(config)?);

    if once {
        match orchestrator.run_cycle(Trigger::Manual).await? {
            CycleOutcome::Completed(report) => {
                print_report(&report, &*orchestrator.snapshot().await)
            }
            other => tracing::warn!(outcome = ?other, "scan did not complete"),
        }
        return Ok(());
    }

    let (handle, mut reports) = orchestrator.spawn_periodic();
    loop {
        tokio::select! {
            Some(report) = reports.recv() => {
                print_report(&report, &*orchestrator.snapshot().await);
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "failed to listen for ctrl-c");
                }
                tracing::info!("shutting down");
                orchestrator.shutdown();
                break;
            }
        }
    }

    if let Err(e) = handle.await {
        tracing::error!(error = %e, "periodic scan task ended abnormally");
    }
    Ok(())
}
