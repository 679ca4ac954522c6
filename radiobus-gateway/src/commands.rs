//! Command-line subcommands.

use clap::Subcommand;

use crate::radio::{LinkError, PortInfo, PortResolver};
use crate::registry::{DeviceRegistry, DeviceStore, DeviceUpdate, RegistryResponse};

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the gateway (default)
    Serve,

    /// List serial ports and their hardware ids
    Ports,

    /// Manage configured radios
    #[command(subcommand)]
    Device(DeviceCommand),
}

/// Registry maintenance. Each prints `{"success": ...}` or `{"error": ...}`.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// List configured radios by start address
    List,

    /// Show unassigned register ranges
    Gaps,

    /// Register a radio at a fixed start address
    Add {
        mac: String,
        start: u16,
        node_id: String,
    },

    /// Register a radio in the first free block
    AddNext { mac: String, node_id: String },

    /// Change fields of a registered radio
    Update {
        mac: String,
        #[arg(long)]
        new_mac: Option<String>,
        #[arg(long)]
        node_id: Option<String>,
        #[arg(long)]
        start: Option<u16>,
        #[arg(long)]
        end: Option<u16>,
    },

    /// Remove a radio and its history
    Delete { mac: String },

    /// Exchange the radios behind two configured locations
    Swap { first: String, second: String },

    /// Resize every block
    Resize { block_size: u16 },

    /// Print a radio's recorded values
    History {
        mac: String,
        /// Only the most recent N records
        #[arg(long)]
        limit: Option<usize>,
    },
}

/// Run one registry command.
pub async fn run_device_command<S: DeviceStore>(
    registry: &DeviceRegistry<S>,
    command: DeviceCommand,
) -> RegistryResponse {
    match command {
        DeviceCommand::List => RegistryResponse::from_result(registry.list().await),
        DeviceCommand::Gaps => RegistryResponse::from_result(registry.available_gaps().await),
        DeviceCommand::Add {
            mac,
            start,
            node_id,
        } => RegistryResponse::from_result(registry.register(&mac, start, &node_id).await),
        DeviceCommand::AddNext { mac, node_id } => {
            RegistryResponse::from_result(registry.register_next_free(&mac, &node_id).await)
        }
        DeviceCommand::Update {
            mac,
            new_mac,
            node_id,
            start,
            end,
        } => {
            let update = DeviceUpdate {
                mac_address: new_mac,
                node_identifier: node_id,
                modbus_start_address: start,
                modbus_end_address: end,
            };
            RegistryResponse::from_result(registry.update(&mac, update).await)
        }
        DeviceCommand::Delete { mac } => RegistryResponse::from_result(registry.delete(&mac).await),
        DeviceCommand::Swap { first, second } => {
            RegistryResponse::from_result(registry.swap(&first, &second).await)
        }
        DeviceCommand::Resize { block_size } => {
            RegistryResponse::from_result(registry.recompute_all_block_ends(block_size).await)
        }
        DeviceCommand::History { mac, limit } => {
            let result = registry.history(&mac).await.map(|mut records| {
                if let Some(limit) = limit {
                    let skip = records.len().saturating_sub(limit);
                    records.drain(..skip);
                }
                records
            });
            RegistryResponse::from_result(result)
        }
    }
}

/// Every serial port, sorted by name.
pub fn list_ports(resolver: &impl PortResolver) -> Result<Vec<PortInfo>, LinkError> {
    let mut ports = resolver.available()?;
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ports)
}
