//! Persistence boundary for the registry.

use async_trait::async_trait;

use super::error::StoreError;
use super::model::{AddressGap, ConfiguredDevice, HistoryRecord};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Backing store for configured devices, their history streams and the
/// gap table.
///
/// Implementations only persist; all validation happens in
/// [`DeviceRegistry`](super::DeviceRegistry).
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Fetch one device by mac.
    async fn get(&self, mac: &str) -> StoreResult<Option<ConfiguredDevice>>;

    /// All devices, in no particular order.
    async fn list(&self) -> StoreResult<Vec<ConfiguredDevice>>;

    /// Insert a new device.
    async fn insert(&self, device: ConfiguredDevice) -> StoreResult<()>;

    /// Replace records all-or-nothing.
    ///
    /// Each entry is `(current mac, new record)`; the new record may carry
    /// a different mac. Fails with [`StoreError::Missing`] without changing
    /// anything if a current mac is unknown.
    async fn commit(&self, changes: Vec<(String, ConfiguredDevice)>) -> StoreResult<()>;

    /// Like [`commit`](Self::commit), also recording the block size the
    /// records were resized to.
    async fn commit_resize(
        &self,
        changes: Vec<(String, ConfiguredDevice)>,
        block_size: u16,
    ) -> StoreResult<()>;

    /// Block size recorded by the last resize, if any.
    async fn block_size(&self) -> StoreResult<Option<u16>>;

    /// Remove a device and return it.
    async fn remove(&self, mac: &str) -> StoreResult<ConfiguredDevice>;

    /// Create an empty history stream.
    async fn create_history(&self, mac: &str) -> StoreResult<()>;

    /// Append to a history stream, creating it if needed.
    async fn append_history(&self, mac: &str, record: HistoryRecord) -> StoreResult<()>;

    /// Read a history stream, oldest first.
    async fn history(&self, mac: &str) -> StoreResult<Vec<HistoryRecord>>;

    /// Move a history stream to a new mac.
    async fn rename_history(&self, from: &str, to: &str) -> StoreResult<()>;

    /// Exchange two history streams.
    async fn swap_history(&self, a: &str, b: &str) -> StoreResult<()>;

    /// Delete a history stream. Returns `false` if there was none to drop.
    async fn drop_history(&self, mac: &str) -> StoreResult<bool>;

    /// Replace the gap table wholesale.
    async fn replace_gaps(&self, gaps: Vec<AddressGap>) -> StoreResult<()>;

    /// Current gap table.
    async fn gaps(&self) -> StoreResult<Vec<AddressGap>>;
}
