//! In-memory device store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::error::StoreError;
use super::model::{AddressGap, ConfiguredDevice, HistoryRecord};
use super::store::{DeviceStore, StoreResult};

#[derive(Debug, Default)]
struct Inner {
    devices: HashMap<String, ConfiguredDevice>,
    history: HashMap<String, Vec<HistoryRecord>>,
    gaps: Vec<AddressGap>,
    block_size: Option<u16>,
}

impl Inner {
    fn apply(&mut self, changes: Vec<(String, ConfiguredDevice)>) -> StoreResult<()> {
        if let Some((mac, _)) = changes.iter().find(|(mac, _)| !self.devices.contains_key(mac)) {
            return Err(StoreError::Missing(mac.clone()));
        }

        for (mac, _) in &changes {
            self.devices.remove(mac);
        }
        for (_, device) in changes {
            self.devices.insert(device.mac_address.clone(), device);
        }
        Ok(())
    }
}

/// Volatile store used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn get(&self, mac: &str) -> StoreResult<Option<ConfiguredDevice>> {
        Ok(self.inner.read().devices.get(mac).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<ConfiguredDevice>> {
        Ok(self.inner.read().devices.values().cloned().collect())
    }

    async fn insert(&self, device: ConfiguredDevice) -> StoreResult<()> {
        self.inner
            .write()
            .devices
            .insert(device.mac_address.clone(), device);
        Ok(())
    }

    async fn commit(&self, changes: Vec<(String, ConfiguredDevice)>) -> StoreResult<()> {
        self.inner.write().apply(changes)
    }

    async fn commit_resize(
        &self,
        changes: Vec<(String, ConfiguredDevice)>,
        block_size: u16,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.apply(changes)?;
        inner.block_size = Some(block_size);
        Ok(())
    }

    async fn block_size(&self) -> StoreResult<Option<u16>> {
        Ok(self.inner.read().block_size)
    }

    async fn remove(&self, mac: &str) -> StoreResult<ConfiguredDevice> {
        self.inner
            .write()
            .devices
            .remove(mac)
            .ok_or_else(|| StoreError::Missing(mac.to_string()))
    }

    async fn create_history(&self, mac: &str) -> StoreResult<()> {
        self.inner
            .write()
            .history
            .insert(mac.to_string(), Vec::new());
        Ok(())
    }

    async fn append_history(&self, mac: &str, record: HistoryRecord) -> StoreResult<()> {
        self.inner
            .write()
            .history
            .entry(mac.to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn history(&self, mac: &str) -> StoreResult<Vec<HistoryRecord>> {
        Ok(self
            .inner
            .read()
            .history
            .get(mac)
            .cloned()
            .unwrap_or_default())
    }

    async fn rename_history(&self, from: &str, to: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let records = inner.history.remove(from).unwrap_or_default();
        inner.history.insert(to.to_string(), records);
        Ok(())
    }

    async fn swap_history(&self, a: &str, b: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let first = inner.history.remove(a).unwrap_or_default();
        let second = inner.history.remove(b).unwrap_or_default();
        inner.history.insert(a.to_string(), second);
        inner.history.insert(b.to_string(), first);
        Ok(())
    }

    async fn drop_history(&self, mac: &str) -> StoreResult<bool> {
        Ok(self.inner.write().history.remove(mac).is_some())
    }

    async fn replace_gaps(&self, gaps: Vec<AddressGap>) -> StoreResult<()> {
        self.inner.write().gaps = gaps;
        Ok(())
    }

    async fn gaps(&self) -> StoreResult<Vec<AddressGap>> {
        Ok(self.inner.read().gaps.clone())
    }
}
