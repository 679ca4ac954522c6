//! Ingestion pipeline: decode, look up, write registers, record history.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::decoder::{self, DecodeError};
use crate::registers::{RegisterError, RegisterStore};
use crate::registry::{DeviceRegistry, DeviceStore, RegistryError};
use crate::state::GatewayState;

/// One payload queued by the radio bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestItem {
    pub mac_address: String,
    pub payload: Bytes,
    pub is_first_seen: bool,
    pub received_at: DateTime<Utc>,
}

/// Create the bridge → pipeline channel.
pub fn ingest_channel() -> (UnboundedSender<IngestItem>, UnboundedReceiver<IngestItem>) {
    mpsc::unbounded_channel()
}

/// Errors that drop a single item.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("lookup failed: {0}")]
    Lookup(#[from] RegistryError),

    #[error("register write failed: {0}")]
    Registers(#[from] RegisterError),
}

/// What happened to one item.
#[derive(Debug)]
pub enum ItemOutcome {
    Written { start_address: u16, registers: usize },
    Unconfigured,
    Failed(PipelineError),
}

/// Consumer side of the ingest channel.
pub struct Pipeline<S> {
    registry: Arc<DeviceRegistry<S>>,
    registers: Arc<RegisterStore>,
    state: Arc<GatewayState>,
    record_history: bool,
}

impl<S: DeviceStore> Pipeline<S> {
    pub fn new(
        registry: Arc<DeviceRegistry<S>>,
        registers: Arc<RegisterStore>,
        state: Arc<GatewayState>,
        record_history: bool,
    ) -> Self {
        Self {
            registry,
            registers,
            state,
            record_history,
        }
    }

    /// Process items until every sender is dropped.
    pub async fn run(self, mut rx: UnboundedReceiver<IngestItem>) {
        tracing::info!("Pipeline started");
        while let Some(item) = rx.recv().await {
            self.process(item).await;
        }
        tracing::info!("Ingest channel closed, pipeline stopping");
    }

    /// Process one item. Never fails; the outcome is logged and counted.
    pub async fn process(&self, item: IngestItem) -> ItemOutcome {
        let mac = item.mac_address.as_str();
        let health = self.state.health();

        match self.write(&item).await {
            Ok(Some((start_address, registers))) => {
                health.record_written(mac);
                tracing::debug!(mac = %mac, start = start_address, registers, "Registers updated");
                ItemOutcome::Written {
                    start_address,
                    registers,
                }
            }
            Ok(None) => {
                health.record_unconfigured(mac);
                if item.is_first_seen {
                    tracing::warn!(mac = %mac, "Radio is not configured, dropping its data");
                } else {
                    tracing::debug!(mac = %mac, "Dropping data from unconfigured radio");
                }
                ItemOutcome::Unconfigured
            }
            Err(e) => {
                health.record_failure(mac, &e.to_string());
                tracing::warn!(mac = %mac, error = %e, "Failed to process payload");
                ItemOutcome::Failed(e)
            }
        }
    }

    async fn write(&self, item: &IngestItem) -> Result<Option<(u16, usize)>, PipelineError> {
        let values = decoder::decode(&item.payload)?;

        let Some(device) = self.registry.lookup(&item.mac_address).await? else {
            return Ok(None);
        };

        let start = device.modbus_start_address;
        let written = self.registers.write_device(start, device.span(), &values)?;

        if self.record_history {
            if let Err(e) = self
                .registry
                .append_history(&item.mac_address, values)
                .await
            {
                tracing::warn!(mac = %item.mac_address, error = %e, "Failed to append history");
            }
        }

        Ok(Some((start, written)))
    }
}
