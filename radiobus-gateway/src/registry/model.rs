//! Registry data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A radio bound to a contiguous block of Modbus registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfiguredDevice {
    /// 64-bit radio address as upper-case hex.
    pub mac_address: String,
    /// Human-assigned short name, upper-case.
    pub node_identifier: String,
    /// First register of the block (inclusive).
    pub modbus_start_address: u16,
    /// Last register of the block (inclusive).
    pub modbus_end_address: u16,
}

impl ConfiguredDevice {
    /// Number of registers in the block. A block may cover all 65536.
    pub fn span(&self) -> u32 {
        u32::from(self.modbus_end_address) - u32::from(self.modbus_start_address) + 1
    }

    /// Closed-interval overlap test against `[start, end]`.
    pub fn overlaps(&self, start: u16, end: u16) -> bool {
        end >= self.modbus_start_address && start <= self.modbus_end_address
    }
}

/// Partial update of a configured device. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modbus_start_address: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modbus_end_address: Option<u16>,
}

impl DeviceUpdate {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.mac_address.is_none()
            && self.node_identifier.is_none()
            && self.modbus_start_address.is_none()
            && self.modbus_end_address.is_none()
    }

    /// True when the update touches the address block.
    pub fn changes_addresses(&self) -> bool {
        self.modbus_start_address.is_some() || self.modbus_end_address.is_some()
    }
}

/// A contiguous unassigned range of the register space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressGap {
    /// Range rendered as `"start-end"`.
    pub range: String,
    pub range_start: u16,
    pub range_end: u16,
    pub size: u32,
    /// Whether a full block fits in the gap.
    pub usable: bool,
}

impl AddressGap {
    pub fn new(range_start: u16, range_end: u16, block_size: u16) -> Self {
        let size = u32::from(range_end) - u32::from(range_start) + 1;
        Self {
            range: format!("{range_start}-{range_end}"),
            range_start,
            range_end,
            size,
            usable: size >= u32::from(block_size),
        }
    }
}

/// One entry of a device's history stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub sensor_values: Vec<f64>,
}

impl HistoryRecord {
    pub fn new(sensor_values: Vec<f64>) -> Self {
        Self {
            timestamp: Utc::now(),
            sensor_values,
        }
    }
}
