//! Health and liveness types.
//!
//! These types are the serializable view of the gateway's runtime state. The
//! live counters behind them are kept by the bridge framework.

use serde::{Deserialize, Serialize};

/// Radio link state.
///
/// The link starts `Disconnected`, moves through `Resolving` while a serial
/// port is being located, and sits in `Open` while frames flow. Any link
/// error drops it back to `Disconnected`; there is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    #[default]
    Disconnected,
    Resolving,
    Open,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkStatus::Disconnected => write!(f, "disconnected"),
            LinkStatus::Resolving => write!(f, "resolving"),
            LinkStatus::Open => write!(f, "open"),
        }
    }
}

/// Radio device availability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Frames from the device are decoded and written.
    Online,
    /// The device transmits but its frames are dropped (unconfigured or undecodable).
    Degraded,
    /// Never heard from.
    #[default]
    Unknown,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "online"),
            DeviceStatus::Degraded => write!(f, "degraded"),
            DeviceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Per-radio liveness information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceLiveness {
    /// Radio MAC address.
    pub device: String,
    /// Current status.
    pub status: DeviceStatus,
    /// Last frame timestamp (millis since epoch).
    pub last_seen: i64,
    /// Frames received from this radio.
    pub frames: u64,
    /// Last error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Health snapshot of the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Bridge name.
    pub bridge: String,
    /// Overall health status ("healthy", "degraded", "error").
    pub status: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current radio link state.
    pub link: LinkStatus,
    /// Number of times the link was re-established after an error.
    pub link_reconnects: u64,
    /// Frames received from the radio link.
    pub frames_received: u64,
    /// Items written into the register store.
    pub items_written: u64,
    /// Items dropped because the radio is not configured.
    pub items_unconfigured: u64,
    /// Items that failed to decode or persist.
    pub items_failed: u64,
    /// Distinct radios heard since startup.
    pub radios_seen: u64,
}
