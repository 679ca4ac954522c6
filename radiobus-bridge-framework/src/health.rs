//! Bridge health monitoring.
//!
//! [`BridgeHealth`] keeps the live counters for the radio link and the
//! ingestion pipeline, plus per-radio liveness. All recording methods take
//! `&self` so one instance can be shared between the link task, the pipeline
//! and the server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use crate::{DeviceLiveness, DeviceStatus, HealthSnapshot, LinkStatus};

/// Bridge health metrics.
#[derive(Debug)]
pub struct BridgeHealth {
    /// Bridge name.
    bridge_name: String,
    /// Start time for uptime calculation.
    start_time: Instant,
    /// Current radio link state.
    link: RwLock<LinkStatus>,
    /// Successful reopen count after link errors.
    link_reconnects: AtomicU64,
    /// Frames accepted from the link.
    frames_received: AtomicU64,
    /// Items written into the register store.
    items_written: AtomicU64,
    /// Items dropped for unconfigured radios.
    items_unconfigured: AtomicU64,
    /// Items that failed somewhere in the pipeline.
    items_failed: AtomicU64,
    /// Per-radio liveness tracking.
    devices: RwLock<HashMap<String, DeviceState>>,
}

#[derive(Debug, Clone)]
struct DeviceState {
    status: DeviceStatus,
    last_seen: i64,
    frames: u64,
    last_error: Option<String>,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            status: DeviceStatus::Unknown,
            last_seen: 0,
            frames: 0,
            last_error: None,
        }
    }
}

impl BridgeHealth {
    /// Create a new health tracker.
    pub fn new(bridge_name: impl Into<String>) -> Self {
        Self {
            bridge_name: bridge_name.into(),
            start_time: Instant::now(),
            link: RwLock::new(LinkStatus::Disconnected),
            link_reconnects: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            items_written: AtomicU64::new(0),
            items_unconfigured: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Bridge name this tracker reports under.
    pub fn bridge_name(&self) -> &str {
        &self.bridge_name
    }

    /// Update the radio link state.
    pub fn set_link_status(&self, status: LinkStatus) {
        *self.link.write() = status;
    }

    /// Current radio link state.
    pub fn link_status(&self) -> LinkStatus {
        *self.link.read()
    }

    /// Record that the link came back after an error.
    pub fn record_reconnect(&self) {
        self.link_reconnects.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a frame received from a radio.
    pub fn record_frame(&self, device_id: &str) {
        self.frames_received.fetch_add(1, Ordering::SeqCst);

        let mut devices = self.devices.write();
        let state = devices
            .entry(device_id.to_string())
            .or_insert_with(DeviceState::new);
        state.frames += 1;
        state.last_seen = chrono::Utc::now().timestamp_millis();
    }

    /// Record that a radio's values reached the register store.
    pub fn record_written(&self, device_id: &str) {
        self.items_written.fetch_add(1, Ordering::SeqCst);
        self.update_device(device_id, DeviceStatus::Online, None);
    }

    /// Record that a radio's frame was dropped because it is not configured.
    pub fn record_unconfigured(&self, device_id: &str) {
        self.items_unconfigured.fetch_add(1, Ordering::SeqCst);
        self.update_device(
            device_id,
            DeviceStatus::Degraded,
            Some("radio not configured".to_string()),
        );
    }

    /// Record a pipeline failure for a radio.
    pub fn record_failure(&self, device_id: &str, error: &str) {
        self.items_failed.fetch_add(1, Ordering::SeqCst);
        self.update_device(device_id, DeviceStatus::Degraded, Some(error.to_string()));
    }

    fn update_device(&self, device_id: &str, status: DeviceStatus, error: Option<String>) {
        let mut devices = self.devices.write();
        let state = devices
            .entry(device_id.to_string())
            .or_insert_with(DeviceState::new);
        state.status = status;
        state.last_error = error;
    }

    /// Get a snapshot of current health metrics.
    pub fn snapshot(&self) -> HealthSnapshot {
        let link = self.link_status();
        let items_failed = self.items_failed.load(Ordering::SeqCst);
        let items_written = self.items_written.load(Ordering::SeqCst);

        let status = match link {
            LinkStatus::Open if items_failed == 0 || items_written > 0 => "healthy",
            LinkStatus::Open => "degraded",
            LinkStatus::Resolving | LinkStatus::Disconnected => "error",
        };

        HealthSnapshot {
            bridge: self.bridge_name.clone(),
            status: status.to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            link,
            link_reconnects: self.link_reconnects.load(Ordering::SeqCst),
            frames_received: self.frames_received.load(Ordering::SeqCst),
            items_written,
            items_unconfigured: self.items_unconfigured.load(Ordering::SeqCst),
            items_failed,
            radios_seen: self.devices.read().len() as u64,
        }
    }

    /// Get liveness info for a specific radio.
    pub fn device_liveness(&self, device_id: &str) -> Option<DeviceLiveness> {
        self.devices
            .read()
            .get(device_id)
            .map(|state| to_liveness(device_id, state))
    }

    /// Get liveness info for all radios, ordered by address.
    pub fn all_device_liveness(&self) -> Vec<DeviceLiveness> {
        let mut all: Vec<DeviceLiveness> = self
            .devices
            .read()
            .iter()
            .map(|(id, state)| to_liveness(id, state))
            .collect();
        all.sort_by(|a, b| a.device.cmp(&b.device));
        all
    }
}

fn to_liveness(device_id: &str, state: &DeviceState) -> DeviceLiveness {
    DeviceLiveness {
        device: device_id.to_string(),
        status: state.status,
        last_seen: state.last_seen,
        frames: state.frames,
        last_error: state.last_error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_new() {
        let health = BridgeHealth::new("test");
        assert_eq!(health.bridge_name(), "test");

        let snapshot = health.snapshot();
        assert_eq!(snapshot.bridge, "test");
        assert_eq!(snapshot.link, LinkStatus::Disconnected);
        assert_eq!(snapshot.status, "error");
        assert_eq!(snapshot.radios_seen, 0);
    }

    #[test]
    fn test_frame_then_written() {
        let health = BridgeHealth::new("test");
        health.set_link_status(LinkStatus::Open);

        health.record_frame("0013A20042395BE1");
        health.record_written("0013A20042395BE1");

        let liveness = health.device_liveness("0013A20042395BE1").unwrap();
        assert_eq!(liveness.status, DeviceStatus::Online);
        assert_eq!(liveness.frames, 1);
        assert!(liveness.last_seen > 0);
        assert!(liveness.last_error.is_none());

        let snapshot = health.snapshot();
        assert_eq!(snapshot.status, "healthy");
        assert_eq!(snapshot.frames_received, 1);
        assert_eq!(snapshot.items_written, 1);
        assert_eq!(snapshot.radios_seen, 1);
    }

    #[test]
    fn test_unconfigured_marks_degraded() {
        let health = BridgeHealth::new("test");

        health.record_frame("AABBCCDDEEFF0011");
        health.record_unconfigured("AABBCCDDEEFF0011");

        let liveness = health.device_liveness("AABBCCDDEEFF0011").unwrap();
        assert_eq!(liveness.status, DeviceStatus::Degraded);
        assert_eq!(liveness.last_error.as_deref(), Some("radio not configured"));
        assert_eq!(health.snapshot().items_unconfigured, 1);
    }

    #[test]
    fn test_recovery_clears_error() {
        let health = BridgeHealth::new("test");

        health.record_failure("r1", "payload truncated");
        assert_eq!(
            health.device_liveness("r1").unwrap().status,
            DeviceStatus::Degraded
        );

        health.record_written("r1");
        let liveness = health.device_liveness("r1").unwrap();
        assert_eq!(liveness.status, DeviceStatus::Online);
        assert!(liveness.last_error.is_none());
    }

    #[test]
    fn test_only_failures_is_degraded() {
        let health = BridgeHealth::new("test");
        health.set_link_status(LinkStatus::Open);
        health.record_failure("r1", "bad payload");
        assert_eq!(health.snapshot().status, "degraded");
    }

    #[test]
    fn test_reconnect_counter() {
        let health = BridgeHealth::new("test");
        health.record_reconnect();
        health.record_reconnect();
        assert_eq!(health.snapshot().link_reconnects, 2);
    }

    #[test]
    fn test_all_device_liveness_sorted() {
        let health = BridgeHealth::new("test");
        health.record_frame("B");
        health.record_frame("A");

        let all = health.all_device_liveness();
        let ids: Vec<_> = all.iter().map(|l| l.device.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }
}
