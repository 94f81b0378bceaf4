use thiserror::Error;

/// Error types surfaced by the scan engine and its providers
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Provider unavailable ({provider}): {reason}")]
    ProviderUnavailable {
        provider: &'static str,
        reason: String,
    },

    #[error("Probe timed out after {0:?}")]
    ProbeTimeout(std::time::Duration),

    #[error("Invalid hardware address: {0}")]
    InvalidMac(String),

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    #[error("I/O Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network Interface Error: {0}")]
    NetworkInterfaceWrapped(#[from] network_interface::Error),

    #[error("Network Interface Error: {0}")]
    NetworkInterfaceCustom(String),

    #[error("Serialization Error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Sink Error ({sink}): {reason}")]
    Sink { sink: &'static str, reason: String },

    #[error("Scan cycle {cycle} aborted: {reason}")]
    CycleAborted { cycle: u64, reason: String },

    #[error("Error: {0}")]
    Other(String),
}

impl ScanError {
    pub fn unavailable(provider: &'static str, reason: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider,
            reason: reason.into(),
        }
    }
}
