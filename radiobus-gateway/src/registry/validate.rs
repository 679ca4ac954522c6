//! Field normalization and placement checks shared by register and update.

use super::error::{RegistryError, Result};
use super::model::ConfiguredDevice;

/// Address space and field rules for the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPolicy {
    pub lowest: u16,
    pub highest: u16,
    pub block_size: u16,
    pub mac_length: usize,
    pub address_digits: usize,
}

impl AddressPolicy {
    /// Trim, upper-case and check a mac address.
    pub fn normalize_mac(&self, mac: &str) -> Result<String> {
        let mac = mac.trim().to_uppercase();
        if mac.len() != self.mac_length {
            return Err(RegistryError::Validation(format!(
                "Mac address must be {} characters, got {}",
                self.mac_length,
                mac.len()
            )));
        }
        if !mac.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RegistryError::Validation(format!(
                "Mac address {mac} is not hexadecimal"
            )));
        }
        Ok(mac)
    }

    /// Trim, upper-case and check a node identifier.
    pub fn normalize_node_id(&self, node_id: &str) -> Result<String> {
        let node_id = node_id.trim().to_uppercase();
        if node_id.is_empty() {
            return Err(RegistryError::Validation(
                "Node identifier must not be empty".to_string(),
            ));
        }
        Ok(node_id)
    }

    /// Check the decimal digit count of an address.
    pub fn check_digits(&self, field: &str, address: u16) -> Result<()> {
        let digits = address.to_string().len();
        if digits != self.address_digits {
            return Err(RegistryError::Validation(format!(
                "{field} {address} must have {} digits",
                self.address_digits
            )));
        }
        Ok(())
    }

    /// End of a fresh block starting at `start`.
    pub fn block_end(&self, start: u16) -> Result<u16> {
        let end = u32::from(start) + u32::from(self.block_size) - 1;
        u16::try_from(end)
            .ok()
            .filter(|end| *end <= self.highest)
            .ok_or_else(|| self.out_of_range(start, end))
    }

    /// Check that `[start, end]` lies within the register space.
    pub fn check_bounds(&self, start: u16, end: u16) -> Result<()> {
        if end < start {
            return Err(RegistryError::Validation(format!(
                "End address {end} is below start address {start}"
            )));
        }
        if start < self.lowest || end > self.highest {
            return Err(self.out_of_range(start, u32::from(end)));
        }
        Ok(())
    }

    fn out_of_range(&self, start: u16, end: u32) -> RegistryError {
        RegistryError::Range(format!(
            "Address block {start}-{end} is outside {}-{}",
            self.lowest, self.highest
        ))
    }
}

fn others<'a>(
    devices: &'a [ConfiguredDevice],
    exclude: Option<&'a str>,
) -> impl Iterator<Item = &'a ConfiguredDevice> {
    devices
        .iter()
        .filter(move |d| Some(d.mac_address.as_str()) != exclude)
}

/// Reject a mac or node identifier already held by another device.
pub fn check_unique(
    devices: &[ConfiguredDevice],
    exclude: Option<&str>,
    mac: Option<&str>,
    node_id: Option<&str>,
) -> Result<()> {
    for device in others(devices, exclude) {
        if mac == Some(device.mac_address.as_str()) {
            return Err(RegistryError::Conflict(format!(
                "Mac address already used by {}",
                device.node_identifier
            )));
        }
        if node_id == Some(device.node_identifier.as_str()) {
            return Err(RegistryError::Conflict(format!(
                "Node identifier already used by ({})",
                device.mac_address
            )));
        }
    }
    Ok(())
}

/// Reject a block whose start is taken or which intersects another block.
///
/// `exclude` names the device being updated so its current block is ignored.
pub fn validate_placement(
    devices: &[ConfiguredDevice],
    exclude: Option<&str>,
    start: u16,
    end: u16,
) -> Result<()> {
    if let Some(device) = others(devices, exclude).find(|d| d.modbus_start_address == start) {
        return Err(RegistryError::Conflict(format!(
            "Start address already used by {}",
            device.node_identifier
        )));
    }

    if let Some(device) = others(devices, exclude).find(|d| d.overlaps(start, end)) {
        return Err(RegistryError::Overlap(format!(
            "Address block {start}-{end} overlaps {} ({}-{})",
            device.node_identifier, device.modbus_start_address, device.modbus_end_address
        )));
    }

    Ok(())
}
