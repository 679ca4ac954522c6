//! Directory-backed device store.
//!
//! Layout:
//!
//! ```text
//! <dir>/devices.json          {"devices": [...], "gaps": [...], "blockSize": n}
//! <dir>/history/<MAC>.jsonl   one HistoryRecord per line
//! ```
//!
//! `devices.json` is rewritten through a temp file and a rename after every
//! mutation, so a crash leaves either the old or the new table on disk.
//!
//! The `device` subcommands and a running gateway are separate processes
//! sharing one directory, so nothing is cached: every access reads the
//! table the last rename put in place.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::error::StoreError;
use super::model::{AddressGap, ConfiguredDevice, HistoryRecord};
use super::store::{DeviceStore, StoreResult};

const DEVICES_FILE: &str = "devices.json";
const HISTORY_DIR: &str = "history";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Table {
    #[serde(default)]
    devices: Vec<ConfiguredDevice>,
    #[serde(default)]
    gaps: Vec<AddressGap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    block_size: Option<u16>,
}

impl Table {
    fn apply(&mut self, changes: Vec<(String, ConfiguredDevice)>) -> StoreResult<()> {
        if let Some((mac, _)) = changes
            .iter()
            .find(|(mac, _)| !self.devices.iter().any(|d| &d.mac_address == mac))
        {
            return Err(StoreError::Missing(mac.clone()));
        }

        self.devices
            .retain(|d| !changes.iter().any(|(mac, _)| *mac == d.mac_address));
        self.devices
            .extend(changes.into_iter().map(|(_, device)| device));
        Ok(())
    }
}

/// Device store persisted under a directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    writer: Mutex<()>,
}

async fn read_table(path: &Path) -> StoreResult<Table> {
    match fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Table::default()),
        Err(e) => Err(e.into()),
    }
}

impl FileStore {
    /// Open (or create) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join(HISTORY_DIR)).await?;

        let store = Self {
            dir,
            writer: Mutex::new(()),
        };

        let table = store.load().await?;
        tracing::debug!(
            dir = %store.dir.display(),
            devices = table.devices.len(),
            "Opened device store"
        );

        Ok(store)
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn devices_path(&self) -> PathBuf {
        self.dir.join(DEVICES_FILE)
    }

    fn history_path(&self, mac: &str) -> PathBuf {
        self.dir.join(HISTORY_DIR).join(format!("{mac}.jsonl"))
    }

    async fn load(&self) -> StoreResult<Table> {
        read_table(&self.devices_path()).await
    }

    async fn persist(&self, table: &Table) -> StoreResult<()> {
        let path = self.devices_path();
        // Per process, so two writers never share a temp file.
        let tmp = self
            .dir
            .join(format!("{DEVICES_FILE}.{}.tmp", std::process::id()));

        let bytes = serde_json::to_vec_pretty(table)?;
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Apply `change` to the table on disk and write the result back.
    ///
    /// The rename is the commit point: a caller that gives up earlier
    /// leaves the old table in place, one that gives up later has
    /// committed.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Table) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let _writer = self.writer.lock().await;

        let mut table = self.load().await?;
        let out = change(&mut table)?;
        self.persist(&table).await?;
        Ok(out)
    }
}

#[async_trait]
impl DeviceStore for FileStore {
    async fn get(&self, mac: &str) -> StoreResult<Option<ConfiguredDevice>> {
        let table = self.load().await?;
        Ok(table.devices.into_iter().find(|d| d.mac_address == mac))
    }

    async fn list(&self) -> StoreResult<Vec<ConfiguredDevice>> {
        Ok(self.load().await?.devices)
    }

    async fn insert(&self, device: ConfiguredDevice) -> StoreResult<()> {
        self.mutate(|table| {
            table.devices.retain(|d| d.mac_address != device.mac_address);
            table.devices.push(device);
            Ok(())
        })
        .await
    }

    async fn commit(&self, changes: Vec<(String, ConfiguredDevice)>) -> StoreResult<()> {
        self.mutate(|table| table.apply(changes)).await
    }

    async fn commit_resize(
        &self,
        changes: Vec<(String, ConfiguredDevice)>,
        block_size: u16,
    ) -> StoreResult<()> {
        self.mutate(|table| {
            table.apply(changes)?;
            table.block_size = Some(block_size);
            Ok(())
        })
        .await
    }

    async fn block_size(&self) -> StoreResult<Option<u16>> {
        Ok(self.load().await?.block_size)
    }

    async fn remove(&self, mac: &str) -> StoreResult<ConfiguredDevice> {
        self.mutate(|table| {
            let index = table
                .devices
                .iter()
                .position(|d| d.mac_address == mac)
                .ok_or_else(|| StoreError::Missing(mac.to_string()))?;
            Ok(table.devices.remove(index))
        })
        .await
    }

    async fn create_history(&self, mac: &str) -> StoreResult<()> {
        fs::File::create(self.history_path(mac)).await?;
        Ok(())
    }

    async fn append_history(&self, mac: &str, record: HistoryRecord) -> StoreResult<()> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_path(mac))
            .await?;
        file.write_all(&line).await?;
        Ok(())
    }

    async fn history(&self, mac: &str) -> StoreResult<Vec<HistoryRecord>> {
        let content = match fs::read_to_string(self.history_path(mac)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StoreError::from))
            .collect()
    }

    async fn rename_history(&self, from: &str, to: &str) -> StoreResult<()> {
        match fs::rename(self.history_path(from), self.history_path(to)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => self.create_history(to).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn swap_history(&self, a: &str, b: &str) -> StoreResult<()> {
        let path_a = self.history_path(a);
        let path_b = self.history_path(b);
        let tmp = self.dir.join(HISTORY_DIR).join(format!("{a}.swap"));

        if fs::try_exists(&path_a).await? {
            fs::rename(&path_a, &tmp).await?;
        } else {
            fs::File::create(&tmp).await?;
        }
        if fs::try_exists(&path_b).await? {
            fs::rename(&path_b, &path_a).await?;
        } else {
            fs::File::create(&path_a).await?;
        }
        fs::rename(&tmp, &path_b).await?;
        Ok(())
    }

    async fn drop_history(&self, mac: &str) -> StoreResult<bool> {
        match fs::remove_file(self.history_path(mac)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_gaps(&self, gaps: Vec<AddressGap>) -> StoreResult<()> {
        self.mutate(|table| {
            table.gaps = gaps;
            Ok(())
        })
        .await
    }

    async fn gaps(&self) -> StoreResult<Vec<AddressGap>> {
        Ok(self.load().await?.gaps)
    }
}
