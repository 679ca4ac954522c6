//! Device registry and register address allocator.
//!
//! The registry owns the mapping from radio mac addresses to blocks of
//! Modbus registers. Every mutation goes through one writer lock, so
//! validation and commit can never interleave and no two blocks ever
//! overlap. Reads (`lookup`, `list`, `history`) go straight to the store.
//!
//! All store calls carry a deadline; expiry surfaces as
//! [`StoreError::Timeout`].
//!
//! A block size recorded in the store by a resize takes precedence over the
//! configured one.

pub mod error;
pub mod file;
pub mod gaps;
pub mod memory;
pub mod model;
pub mod store;
pub mod validate;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

pub use error::{RegistryError, RegistryResponse, Result, StoreError};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use model::{AddressGap, ConfiguredDevice, DeviceUpdate, HistoryRecord};
pub use store::DeviceStore;
pub use validate::AddressPolicy;

use store::StoreResult;
use validate::{check_unique, validate_placement};

/// Both records touched by a swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapResult {
    pub first: ConfiguredDevice,
    pub second: ConfiguredDevice,
}

/// Device registry over a [`DeviceStore`].
pub struct DeviceRegistry<S> {
    store: Arc<S>,
    /// Writer lock. Holds the policy since resizing changes the block size.
    writer: Mutex<AddressPolicy>,
    timeout: Duration,
}

impl<S: DeviceStore> DeviceRegistry<S> {
    /// Open a registry and rebuild the gap table from the stored devices.
    pub async fn open(store: Arc<S>, policy: AddressPolicy, timeout: Duration) -> Result<Self> {
        let registry = Self {
            store,
            writer: Mutex::new(policy),
            timeout,
        };

        {
            let policy = registry.lock_policy().await?;
            let gaps = registry.refresh_gaps(&policy).await?;
            tracing::info!(
                gaps = gaps.len(),
                lowest = policy.lowest,
                highest = policy.highest,
                block_size = policy.block_size,
                "Device registry opened"
            );
        }

        Ok(registry)
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Current address policy, including a block size set by a resize.
    pub async fn policy(&self) -> Result<AddressPolicy> {
        Ok(self.lock_policy().await?.clone())
    }

    /// Take the writer lock with the block size brought up to date.
    async fn lock_policy(&self) -> Result<MutexGuard<'_, AddressPolicy>> {
        let mut policy = self.writer.lock().await;
        if let Some(stored) = self.call(self.store.block_size()).await? {
            if stored != policy.block_size {
                tracing::info!(
                    configured = policy.block_size,
                    stored,
                    "Using block size recorded by the last resize"
                );
                policy.block_size = stored;
            }
        }
        Ok(policy)
    }

    async fn call<T>(&self, op: impl Future<Output = StoreResult<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(result) => result.map_err(RegistryError::from),
            Err(_) => Err(StoreError::Timeout(self.timeout.as_millis() as u64).into()),
        }
    }

    async fn existing(&self, mac: &str) -> Result<ConfiguredDevice> {
        self.call(self.store.get(mac))
            .await?
            .ok_or_else(|| RegistryError::NotFound(mac.to_string()))
    }

    async fn refresh_gaps(&self, policy: &AddressPolicy) -> Result<Vec<AddressGap>> {
        let devices = self.call(self.store.list()).await?;
        let gaps = gaps::compute_gaps(&devices, policy.lowest, policy.highest, policy.block_size);
        self.call(self.store.replace_gaps(gaps.clone())).await?;
        Ok(gaps)
    }

    /// Register a radio with a block starting at `start_address`.
    pub async fn register(
        &self,
        mac: &str,
        start_address: u16,
        node_id: &str,
    ) -> Result<ConfiguredDevice> {
        let policy = self.lock_policy().await?;
        self.register_locked(&policy, mac, start_address, node_id)
            .await
    }

    /// Register a radio at the start of the first usable gap.
    pub async fn register_next_free(&self, mac: &str, node_id: &str) -> Result<ConfiguredDevice> {
        let policy = self.lock_policy().await?;
        let gaps = self.refresh_gaps(&policy).await?;
        let start = gaps::first_usable(&gaps).ok_or_else(|| {
            RegistryError::Range(format!(
                "No free range of {} registers left in {}-{}",
                policy.block_size, policy.lowest, policy.highest
            ))
        })?;
        self.register_locked(&policy, mac, start, node_id).await
    }

    async fn register_locked(
        &self,
        policy: &AddressPolicy,
        mac: &str,
        start: u16,
        node_id: &str,
    ) -> Result<ConfiguredDevice> {
        let mac = policy.normalize_mac(mac)?;
        let node_id = policy.normalize_node_id(node_id)?;
        policy.check_digits("Start address", start)?;

        let end = policy.block_end(start)?;
        policy.check_bounds(start, end)?;

        let devices = self.call(self.store.list()).await?;
        check_unique(&devices, None, Some(&mac), Some(&node_id))?;
        validate_placement(&devices, None, start, end)?;

        let device = ConfiguredDevice {
            mac_address: mac.clone(),
            node_identifier: node_id,
            modbus_start_address: start,
            modbus_end_address: end,
        };

        self.call(self.store.insert(device.clone())).await?;
        if let Err(e) = self.call(self.store.create_history(&mac)).await {
            if let Err(undo) = self.call(self.store.remove(&mac)).await {
                tracing::error!(mac = %mac, error = %undo, "Failed to undo registration");
            }
            return Err(e);
        }
        self.refresh_gaps(policy).await?;

        tracing::info!(
            mac = %device.mac_address,
            node = %device.node_identifier,
            start = device.modbus_start_address,
            end = device.modbus_end_address,
            "Registered device"
        );

        Ok(device)
    }

    /// Apply a partial update to a registered device.
    pub async fn update(&self, mac: &str, update: DeviceUpdate) -> Result<ConfiguredDevice> {
        let policy = self.lock_policy().await?;

        let mac = mac.trim().to_uppercase();
        let current = self.existing(&mac).await?;

        if update.is_empty() {
            return Err(RegistryError::Validation(
                "Update must set at least one field".to_string(),
            ));
        }

        let new_mac = match &update.mac_address {
            Some(value) => {
                let value = policy.normalize_mac(value)?;
                if value == current.mac_address {
                    return Err(RegistryError::NoOp(format!(
                        "Mac address is already {value}"
                    )));
                }
                Some(value)
            }
            None => None,
        };

        let new_node = match &update.node_identifier {
            Some(value) => {
                let value = policy.normalize_node_id(value)?;
                if value == current.node_identifier {
                    return Err(RegistryError::NoOp(format!(
                        "Node identifier is already {value}"
                    )));
                }
                Some(value)
            }
            None => None,
        };

        if let Some(start) = update.modbus_start_address {
            policy.check_digits("Start address", start)?;
        }
        if let Some(end) = update.modbus_end_address {
            policy.check_digits("End address", end)?;
        }

        let start = update
            .modbus_start_address
            .unwrap_or(current.modbus_start_address);
        let end = match (update.modbus_start_address, update.modbus_end_address) {
            (_, Some(end)) => end,
            // Moving the start alone shifts the whole block.
            (Some(start), None) => {
                let end = u32::from(start) + current.span() - 1;
                u16::try_from(end).map_err(|_| {
                    RegistryError::Range(format!(
                        "Address block {start}-{end} is outside {}-{}",
                        policy.lowest, policy.highest
                    ))
                })?
            }
            (None, None) => current.modbus_end_address,
        };
        if update.changes_addresses()
            && (start, end) == (current.modbus_start_address, current.modbus_end_address)
        {
            return Err(RegistryError::NoOp(format!(
                "Address block is already {start}-{end}"
            )));
        }
        policy.check_bounds(start, end)?;

        let devices = self.call(self.store.list()).await?;
        check_unique(
            &devices,
            Some(&current.mac_address),
            new_mac.as_deref(),
            new_node.as_deref(),
        )?;
        if update.changes_addresses() {
            validate_placement(&devices, Some(&current.mac_address), start, end)?;
        }

        let updated = ConfiguredDevice {
            mac_address: new_mac.clone().unwrap_or_else(|| current.mac_address.clone()),
            node_identifier: new_node.unwrap_or_else(|| current.node_identifier.clone()),
            modbus_start_address: start,
            modbus_end_address: end,
        };

        if let Some(new_mac) = &new_mac {
            self.call(self.store.rename_history(&current.mac_address, new_mac))
                .await?;
        }

        let commit = self
            .call(
                self.store
                    .commit(vec![(current.mac_address.clone(), updated.clone())]),
            )
            .await;
        if let Err(e) = commit {
            if let Some(new_mac) = &new_mac {
                if let Err(undo) = self
                    .call(self.store.rename_history(new_mac, &current.mac_address))
                    .await
                {
                    tracing::error!(
                        mac = %current.mac_address,
                        error = %undo,
                        "Failed to restore history stream"
                    );
                }
            }
            return Err(e);
        }

        if update.changes_addresses() {
            self.refresh_gaps(&policy).await?;
        }

        tracing::info!(
            mac = %current.mac_address,
            new_mac = %updated.mac_address,
            start = updated.modbus_start_address,
            end = updated.modbus_end_address,
            "Updated device"
        );

        Ok(updated)
    }

    /// Remove a device and its history stream.
    pub async fn delete(&self, mac: &str) -> Result<ConfiguredDevice> {
        let policy = self.lock_policy().await?;

        let mac = mac.trim().to_uppercase();
        self.existing(&mac).await?;

        let removed = self.call(self.store.remove(&mac)).await?;
        let dropped = match self.call(self.store.drop_history(&mac)).await {
            Ok(dropped) => dropped,
            Err(e) => {
                tracing::warn!(mac = %mac, error = %e, "Failed to drop history stream");
                false
            }
        };
        self.refresh_gaps(&policy).await?;

        if !dropped {
            return Err(RegistryError::PartialFailure(format!(
                "Device {mac} was removed but its history stream could not be dropped"
            )));
        }

        tracing::info!(mac = %mac, node = %removed.node_identifier, "Deleted device");
        Ok(removed)
    }

    /// Exchange the radios behind two configured locations.
    ///
    /// Both records keep their node identifier and block; their macs and
    /// history streams trade places.
    pub async fn swap(&self, mac_a: &str, mac_b: &str) -> Result<SwapResult> {
        let _policy = self.writer.lock().await;

        let mac_a = mac_a.trim().to_uppercase();
        let mac_b = mac_b.trim().to_uppercase();
        if mac_a == mac_b {
            return Err(RegistryError::Validation(
                "Cannot swap a device with itself".to_string(),
            ));
        }

        let a = self.existing(&mac_a).await?;
        let b = self.existing(&mac_b).await?;

        let first = ConfiguredDevice {
            mac_address: b.mac_address.clone(),
            ..a.clone()
        };
        let second = ConfiguredDevice {
            mac_address: a.mac_address.clone(),
            ..b.clone()
        };

        self.call(self.store.swap_history(&mac_a, &mac_b)).await?;
        let commit = self
            .call(self.store.commit(vec![
                (mac_a.clone(), first.clone()),
                (mac_b.clone(), second.clone()),
            ]))
            .await;
        if let Err(e) = commit {
            if let Err(undo) = self.call(self.store.swap_history(&mac_a, &mac_b)).await {
                tracing::error!(error = %undo, "Failed to restore history streams");
            }
            return Err(e);
        }

        tracing::info!(
            first = %first.node_identifier,
            second = %second.node_identifier,
            "Swapped radios"
        );

        Ok(SwapResult { first, second })
    }

    /// Start address of a device, or `None` if it is not configured.
    pub async fn lookup_start_address(&self, mac: &str) -> Result<Option<u16>> {
        Ok(self.lookup(mac).await?.map(|d| d.modbus_start_address))
    }

    /// Full record of a device, or `None` if it is not configured.
    pub async fn lookup(&self, mac: &str) -> Result<Option<ConfiguredDevice>> {
        let mac = mac.trim().to_uppercase();
        self.call(self.store.get(&mac)).await
    }

    /// All devices ordered by start address.
    pub async fn list(&self) -> Result<Vec<ConfiguredDevice>> {
        let mut devices = self.call(self.store.list()).await?;
        devices.sort_by_key(|d| d.modbus_start_address);
        Ok(devices)
    }

    /// Current gap table, ordered by address.
    pub async fn available_gaps(&self) -> Result<Vec<AddressGap>> {
        self.call(self.store.gaps()).await
    }

    /// Rebuild the gap table from the configured devices.
    pub async fn recompute_gaps(&self) -> Result<Vec<AddressGap>> {
        let policy = self.lock_policy().await?;
        self.refresh_gaps(&policy).await
    }

    /// Resize every block to `block_size` registers.
    ///
    /// Returns the number of records changed. Nothing is committed if any
    /// resized block would leave the register space or overlap its
    /// neighbour.
    pub async fn recompute_all_block_ends(&self, block_size: u16) -> Result<usize> {
        let mut policy = self.lock_policy().await?;

        let space = u32::from(policy.highest) - u32::from(policy.lowest) + 1;
        if block_size == 0 || u32::from(block_size) > space {
            return Err(RegistryError::Validation(format!(
                "Block size must be between 1 and {space}"
            )));
        }

        let mut devices = self.call(self.store.list()).await?;
        devices.sort_by_key(|d| d.modbus_start_address);

        let mut changes = Vec::new();
        for (i, device) in devices.iter().enumerate() {
            let start = device.modbus_start_address;
            let end = u32::from(start) + u32::from(block_size) - 1;
            if end > u32::from(policy.highest) {
                return Err(RegistryError::Range(format!(
                    "{} would end at {end}, past {}",
                    device.node_identifier, policy.highest
                )));
            }
            if let Some(next) = devices.get(i + 1) {
                if end >= u32::from(next.modbus_start_address) {
                    return Err(RegistryError::Overlap(format!(
                        "{} would end at {end}, overlapping {} at {}",
                        device.node_identifier, next.node_identifier, next.modbus_start_address
                    )));
                }
            }

            let end = end as u16;
            if end != device.modbus_end_address {
                changes.push((
                    device.mac_address.clone(),
                    ConfiguredDevice {
                        modbus_end_address: end,
                        ..device.clone()
                    },
                ));
            }
        }

        // Recorded even when no record changes, so later registrations
        // use the new size.
        let changed = changes.len();
        self.call(self.store.commit_resize(changes, block_size))
            .await?;
        policy.block_size = block_size;
        self.refresh_gaps(&policy).await?;

        tracing::info!(block_size, changed, "Resized device blocks");
        Ok(changed)
    }

    /// History stream of a device, oldest first.
    pub async fn history(&self, mac: &str) -> Result<Vec<HistoryRecord>> {
        let mac = mac.trim().to_uppercase();
        self.existing(&mac).await?;
        self.call(self.store.history(&mac)).await
    }

    /// Append decoded values to a device's history stream.
    pub async fn append_history(&self, mac: &str, values: Vec<f64>) -> Result<()> {
        let mac = mac.trim().to_uppercase();
        self.existing(&mac).await?;
        self.call(self.store.append_history(&mac, HistoryRecord::new(values)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn policy() -> AddressPolicy {
        AddressPolicy {
            lowest: 30000,
            highest: 39999,
            block_size: 50,
            mac_length: 16,
            address_digits: 5,
        }
    }

    async fn registry() -> DeviceRegistry<MemoryStore> {
        DeviceRegistry::open(
            Arc::new(MemoryStore::new()),
            policy(),
            Duration::from_secs(1),
        )
        .await
        .unwrap()
    }

    fn mac(n: u64) -> String {
        format!("{n:016X}")
    }

    /// Gaps plus device blocks must cover `[lowest, highest]` exactly once.
    async fn assert_tiles<S: DeviceStore>(registry: &DeviceRegistry<S>) {
        let policy = registry.policy().await.unwrap();
        let mut ranges: Vec<(u32, u32)> = registry
            .list()
            .await
            .unwrap()
            .iter()
            .map(|d| (d.modbus_start_address.into(), d.modbus_end_address.into()))
            .chain(
                registry
                    .available_gaps()
                    .await
                    .unwrap()
                    .iter()
                    .map(|g| (g.range_start.into(), g.range_end.into())),
            )
            .collect();
        ranges.sort_unstable();

        let mut next = u32::from(policy.lowest);
        for (start, end) in ranges {
            assert_eq!(start, next, "hole or overlap at {start}");
            assert!(end >= start);
            next = end + 1;
        }
        assert_eq!(next, u32::from(policy.highest) + 1);
    }

    #[tokio::test]
    async fn test_register_then_overlap() {
        let registry = registry().await;

        let device = registry
            .register("AABBCCDDEEFF0011", 39000, "RADIO-1")
            .await
            .unwrap();
        assert_eq!(device.modbus_end_address, 39049);

        let err = registry
            .register("AABBCCDDEEFF0022", 39020, "RADIO-2")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Overlap(_)), "{err}");
        assert_tiles(&registry).await;
    }

    #[tokio::test]
    async fn test_update_to_same_start_is_noop() {
        let registry = registry().await;
        registry
            .register("AABBCCDDEEFF0011", 39000, "RADIO-1")
            .await
            .unwrap();

        let err = registry
            .update(
                "AABBCCDDEEFF0011",
                DeviceUpdate {
                    modbus_start_address: Some(39000),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NoOp(_)));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let registry = registry().await;
        registry
            .register("aabbccddeeff0011", 30000, "radio-1")
            .await
            .unwrap();

        let err = registry
            .register("AABBCCDDEEFF0011", 31000, "RADIO-9")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(ref m) if m.contains("RADIO-1")));

        let err = registry
            .register("AABBCCDDEEFF0022", 30000, "RADIO-2")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(ref m) if m.starts_with("Start address")));

        let err = registry
            .register("AABBCCDDEEFF0022", 31000, "Radio-1")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(ref m) if m.starts_with("Node identifier")));
    }

    #[tokio::test]
    async fn test_register_validation_and_range() {
        let registry = registry().await;

        for (mac, start, node) in [
            ("AABB", 30000, "R"),
            ("AABBCCDDEEFF00GG", 30000, "R"),
            ("AABBCCDDEEFF0011", 3000, "R"),
            ("AABBCCDDEEFF0011", 30000, " "),
        ] {
            assert!(matches!(
                registry.register(mac, start, node).await,
                Err(RegistryError::Validation(_))
            ));
        }

        assert!(matches!(
            registry.register("AABBCCDDEEFF0011", 39951, "R").await,
            Err(RegistryError::Range(_))
        ));
        assert!(matches!(
            registry.register("AABBCCDDEEFF0011", 29999, "R").await,
            Err(RegistryError::Validation(_)) | Err(RegistryError::Range(_))
        ));
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_next_free() {
        let registry = registry().await;
        registry.register(&mac(1), 30000, "A").await.unwrap();
        registry.register(&mac(2), 30060, "B").await.unwrap();

        // 30050-30059 is too small, so the next block goes after B.
        let device = registry.register_next_free(&mac(3), "C").await.unwrap();
        assert_eq!(device.modbus_start_address, 30110);
        assert_tiles(&registry).await;
    }

    #[tokio::test]
    async fn test_next_free_exhausted() {
        let registry = DeviceRegistry::open(
            Arc::new(MemoryStore::new()),
            AddressPolicy {
                highest: 30099,
                ..policy()
            },
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        registry.register_next_free(&mac(1), "A").await.unwrap();
        registry.register_next_free(&mac(2), "B").await.unwrap();
        assert!(matches!(
            registry.register_next_free(&mac(3), "C").await,
            Err(RegistryError::Range(_))
        ));
    }

    #[tokio::test]
    async fn test_update_start_moves_block() {
        let registry = registry().await;
        registry.register(&mac(1), 30000, "A").await.unwrap();
        registry.register(&mac(2), 30100, "B").await.unwrap();

        let updated = registry
            .update(
                &mac(1),
                DeviceUpdate {
                    modbus_start_address: Some(30200),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.modbus_end_address, 30249);

        // Moving onto B is rejected; moving within its own block is fine.
        assert!(matches!(
            registry
                .update(
                    &mac(1),
                    DeviceUpdate {
                        modbus_start_address: Some(30120),
                        ..Default::default()
                    },
                )
                .await,
            Err(RegistryError::Overlap(_))
        ));
        registry
            .update(
                &mac(1),
                DeviceUpdate {
                    modbus_start_address: Some(30210),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_tiles(&registry).await;
    }

    #[tokio::test]
    async fn test_update_errors() {
        let registry = registry().await;
        registry.register(&mac(1), 30000, "A").await.unwrap();
        registry.register(&mac(2), 30100, "B").await.unwrap();

        assert!(matches!(
            registry.update(&mac(9), DeviceUpdate::default()).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.update(&mac(1), DeviceUpdate::default()).await,
            Err(RegistryError::Validation(_))
        ));
        assert!(matches!(
            registry
                .update(
                    &mac(1),
                    DeviceUpdate {
                        node_identifier: Some("b".into()),
                        ..Default::default()
                    }
                )
                .await,
            Err(RegistryError::Conflict(_))
        ));
        assert!(matches!(
            registry
                .update(
                    &mac(1),
                    DeviceUpdate {
                        modbus_end_address: Some(30100),
                        ..Default::default()
                    }
                )
                .await,
            Err(RegistryError::Overlap(_))
        ));
    }

    #[tokio::test]
    async fn test_update_mac_moves_history() {
        let registry = registry().await;
        registry.register(&mac(1), 30000, "A").await.unwrap();
        registry.append_history(&mac(1), vec![1.5]).await.unwrap();

        let updated = registry
            .update(
                &mac(1),
                DeviceUpdate {
                    mac_address: Some(mac(7)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.mac_address, mac(7));
        assert_eq!(registry.lookup_start_address(&mac(1)).await.unwrap(), None);
        assert_eq!(
            registry.lookup_start_address(&mac(7)).await.unwrap(),
            Some(30000)
        );
        assert_eq!(registry.history(&mac(7)).await.unwrap()[0].sensor_values, vec![1.5]);
    }

    #[tokio::test]
    async fn test_delete() {
        let registry = registry().await;
        registry.register(&mac(1), 30000, "A").await.unwrap();

        registry.delete(&mac(1)).await.unwrap();
        assert!(registry.list().await.unwrap().is_empty());
        assert!(matches!(
            registry.delete(&mac(1)).await,
            Err(RegistryError::NotFound(_))
        ));
        assert_eq!(registry.available_gaps().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_swap_exchanges_radios_and_history() {
        let registry = registry().await;
        registry.register(&mac(1), 30000, "A").await.unwrap();
        registry.register(&mac(2), 30100, "B").await.unwrap();
        registry.append_history(&mac(1), vec![1.0]).await.unwrap();

        let result = registry.swap(&mac(1), &mac(2)).await.unwrap();
        assert_eq!(result.first.node_identifier, "A");
        assert_eq!(result.first.mac_address, mac(2));
        assert_eq!(result.second.mac_address, mac(1));

        // Location A keeps its history under its new radio.
        assert_eq!(registry.history(&mac(2)).await.unwrap().len(), 1);
        assert!(registry.history(&mac(1)).await.unwrap().is_empty());
        assert_eq!(
            registry.lookup_start_address(&mac(2)).await.unwrap(),
            Some(30000)
        );

        assert!(matches!(
            registry.swap(&mac(1), &mac(1)).await,
            Err(RegistryError::Validation(_))
        ));
        assert!(matches!(
            registry.swap(&mac(1), &mac(9)).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resize_blocks() {
        let registry = registry().await;
        registry.register(&mac(1), 30000, "A").await.unwrap();
        registry.register(&mac(2), 30100, "B").await.unwrap();

        assert!(matches!(
            registry.recompute_all_block_ends(101).await,
            Err(RegistryError::Overlap(_))
        ));
        assert_eq!(registry.list().await.unwrap()[0].modbus_end_address, 30049);

        assert_eq!(registry.recompute_all_block_ends(100).await.unwrap(), 2);
        let devices = registry.list().await.unwrap();
        assert_eq!(devices[0].modbus_end_address, 30099);
        assert_eq!(devices[1].modbus_end_address, 30199);
        assert_eq!(registry.policy().await.unwrap().block_size, 100);
        assert_tiles(&registry).await;

        assert_eq!(registry.recompute_all_block_ends(100).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resize_outlives_the_registry() {
        let store = Arc::new(MemoryStore::new());
        let open = || DeviceRegistry::open(store.clone(), policy(), Duration::from_secs(1));

        let serving = open().await.unwrap();
        let cli = open().await.unwrap();
        cli.register(&mac(1), 30000, "A").await.unwrap();
        assert_eq!(cli.recompute_all_block_ends(100).await.unwrap(), 1);
        drop(cli);

        // A registry opened with the configured size of 50 picks up 100.
        let reopened = open().await.unwrap();
        assert_eq!(reopened.policy().await.unwrap().block_size, 100);
        let device = reopened.register_next_free(&mac(2), "B").await.unwrap();
        assert_eq!(device.modbus_start_address, 30100);
        assert_eq!(device.modbus_end_address, 30199);
        assert!(reopened.available_gaps().await.unwrap()[0].usable);

        // So does one that was already open.
        let device = serving.register_next_free(&mac(3), "C").await.unwrap();
        assert_eq!(device.span(), 100);
        assert_tiles(&serving).await;

        assert!(matches!(
            serving.recompute_all_block_ends(10001).await,
            Err(RegistryError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_address_pair() {
        let registry = registry().await;
        registry.register(&mac(1), 30000, "A").await.unwrap();

        // Same end, new start: the block shrinks.
        let shrunk = registry
            .update(
                &mac(1),
                DeviceUpdate {
                    modbus_start_address: Some(30010),
                    modbus_end_address: Some(30049),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(shrunk.span(), 40);
        assert_tiles(&registry).await;

        for update in [
            DeviceUpdate {
                modbus_start_address: Some(30010),
                modbus_end_address: Some(30049),
                ..Default::default()
            },
            DeviceUpdate {
                modbus_end_address: Some(30049),
                ..Default::default()
            },
            DeviceUpdate {
                node_identifier: Some("B".into()),
                modbus_start_address: Some(30010),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                registry.update(&mac(1), update).await,
                Err(RegistryError::NoOp(_))
            ));
        }
        assert_eq!(registry.lookup(&mac(1)).await.unwrap().unwrap(), shrunk);
    }

    #[tokio::test]
    async fn test_random_operations_keep_invariants() {
        let registry = registry().await;
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move || {
            seed = seed
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            seed >> 33
        };

        for _ in 0..300 {
            let id = next() % 12;
            let start = 30000 + (next() % 200) as u16 * 50 + (next() % 3) as u16 * 17;
            match next() % 4 {
                0 | 1 => {
                    let _ = registry.register(&mac(id), start, &format!("N{id}")).await;
                }
                2 => {
                    let _ = registry
                        .update(
                            &mac(id),
                            DeviceUpdate {
                                modbus_start_address: Some(start),
                                ..Default::default()
                            },
                        )
                        .await;
                }
                _ => {
                    let _ = registry.delete(&mac(id)).await;
                }
            }

            let devices = registry.list().await.unwrap();
            for pair in devices.windows(2) {
                assert!(pair[0].modbus_end_address < pair[1].modbus_start_address);
            }
            assert_tiles(&registry).await;
        }
    }

    /// Memory store with injectable failures.
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryStore,
        lose_history: AtomicBool,
        stall: AtomicBool,
    }

    #[async_trait]
    impl DeviceStore for FaultyStore {
        async fn get(&self, mac: &str) -> StoreResult<Option<ConfiguredDevice>> {
            if self.stall.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.inner.get(mac).await
        }
        async fn list(&self) -> StoreResult<Vec<ConfiguredDevice>> {
            self.inner.list().await
        }
        async fn insert(&self, device: ConfiguredDevice) -> StoreResult<()> {
            self.inner.insert(device).await
        }
        async fn commit(&self, changes: Vec<(String, ConfiguredDevice)>) -> StoreResult<()> {
            self.inner.commit(changes).await
        }
        async fn commit_resize(
            &self,
            changes: Vec<(String, ConfiguredDevice)>,
            block_size: u16,
        ) -> StoreResult<()> {
            self.inner.commit_resize(changes, block_size).await
        }
        async fn block_size(&self) -> StoreResult<Option<u16>> {
            self.inner.block_size().await
        }
        async fn remove(&self, mac: &str) -> StoreResult<ConfiguredDevice> {
            self.inner.remove(mac).await
        }
        async fn create_history(&self, mac: &str) -> StoreResult<()> {
            self.inner.create_history(mac).await
        }
        async fn append_history(&self, mac: &str, record: HistoryRecord) -> StoreResult<()> {
            self.inner.append_history(mac, record).await
        }
        async fn history(&self, mac: &str) -> StoreResult<Vec<HistoryRecord>> {
            self.inner.history(mac).await
        }
        async fn rename_history(&self, from: &str, to: &str) -> StoreResult<()> {
            self.inner.rename_history(from, to).await
        }
        async fn swap_history(&self, a: &str, b: &str) -> StoreResult<()> {
            self.inner.swap_history(a, b).await
        }
        async fn drop_history(&self, mac: &str) -> StoreResult<bool> {
            if self.lose_history.load(Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::other("disk gone")));
            }
            self.inner.drop_history(mac).await
        }
        async fn replace_gaps(&self, gaps: Vec<AddressGap>) -> StoreResult<()> {
            self.inner.replace_gaps(gaps).await
        }
        async fn gaps(&self) -> StoreResult<Vec<AddressGap>> {
            self.inner.gaps().await
        }
    }

    #[tokio::test]
    async fn test_delete_reports_partial_failure() {
        let store = Arc::new(FaultyStore::default());
        let registry = DeviceRegistry::open(store.clone(), policy(), Duration::from_secs(1))
            .await
            .unwrap();
        registry.register(&mac(1), 30000, "A").await.unwrap();

        store.lose_history.store(true, Ordering::SeqCst);
        let err = registry.delete(&mac(1)).await.unwrap_err();
        assert!(matches!(err, RegistryError::PartialFailure(_)));

        // The record itself is gone and its block is free again.
        assert!(registry.list().await.unwrap().is_empty());
        assert_tiles(&registry).await;
    }

    #[tokio::test]
    async fn test_store_deadline() {
        let store = Arc::new(FaultyStore::default());
        let registry = DeviceRegistry::open(store.clone(), policy(), Duration::from_millis(20))
            .await
            .unwrap();

        store.stall.store(true, Ordering::SeqCst);
        let err = registry.lookup(&mac(1)).await.unwrap_err();
        assert!(matches!(err, RegistryError::Store(StoreError::Timeout(20))));
    }
}
