//! Configuration for the radio gateway.

use std::path::PathBuf;
use std::time::Duration;

use radiobus_bridge_framework::{BridgeConfig, BridgeError, LoggingConfig, Result};
use serde::{Deserialize, Serialize};

use crate::radio::ReconnectPolicy;
use crate::registry::AddressPolicy;
use crate::server::DeviceIdentification;

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Coordinator radio link
    pub radio: RadioConfig,

    /// Device registry and register space
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Modbus TCP server
    #[serde(default)]
    pub modbus: ModbusConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial link to the coordinator radio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Substring of the port's hardware id, usually the USB serial number.
    pub hardware_id_pattern: String,

    /// Serial baud rate (default: 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_baud_rate() -> u32 {
    9600
}

/// Backoff between attempts to reopen the link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Consecutive failures before giving up (default: retry forever)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            max_attempts: self.max_attempts,
        }
    }
}

/// Register space and device store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// First register of the space (inclusive)
    pub lowest_register: u16,

    /// Last register of the space (inclusive)
    pub highest_register: u16,

    /// Registers reserved per radio. A size recorded by `device resize` wins.
    pub block_size: u16,

    /// Hex digits in a radio mac address
    pub mac_length: usize,

    /// Decimal digits in a register address
    pub address_digits: usize,

    /// Directory holding `devices.json` and the history streams
    pub store_dir: PathBuf,

    /// Deadline for a single store operation
    pub store_timeout_ms: u64,

    /// Append every decoded payload to the radio's history stream
    pub record_history: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lowest_register: 30000,
            highest_register: 39999,
            block_size: 50,
            mac_length: 16,
            address_digits: 5,
            store_dir: PathBuf::from("radiobus-data"),
            store_timeout_ms: 2000,
            record_history: true,
        }
    }
}

impl RegistryConfig {
    pub fn policy(&self) -> AddressPolicy {
        AddressPolicy {
            lowest: self.lowest_register,
            highest: self.highest_register,
            block_size: self.block_size,
            mac_length: self.mac_length,
            address_digits: self.address_digits,
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Modbus TCP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    /// Listen address (default: 0.0.0.0:5020)
    pub bind: String,

    /// Read Device Identification objects
    pub identification: DeviceIdentification,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5020".to_string(),
            identification: DeviceIdentification::default(),
        }
    }
}

impl BridgeConfig for GatewayConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<()> {
        if self.radio.hardware_id_pattern.trim().is_empty() {
            return Err(BridgeError::validation(
                "radio.hardware_id_pattern cannot be empty",
            ));
        }

        if self.radio.baud_rate == 0 {
            return Err(BridgeError::validation("radio.baud_rate must be positive"));
        }

        let reconnect = &self.radio.reconnect;
        if reconnect.multiplier < 1.0 {
            return Err(BridgeError::validation(
                "radio.reconnect.multiplier must be at least 1.0",
            ));
        }
        if reconnect.initial_delay_ms > reconnect.max_delay_ms {
            return Err(BridgeError::validation(
                "radio.reconnect.initial_delay_ms exceeds max_delay_ms",
            ));
        }

        let registry = &self.registry;
        if registry.lowest_register > registry.highest_register {
            return Err(BridgeError::validation(format!(
                "registry.lowest_register ({}) is above highest_register ({})",
                registry.lowest_register, registry.highest_register
            )));
        }

        let span = u32::from(registry.highest_register) - u32::from(registry.lowest_register) + 1;
        if registry.block_size == 0 || u32::from(registry.block_size) > span {
            return Err(BridgeError::validation(format!(
                "registry.block_size must be between 1 and {span}"
            )));
        }

        if registry.mac_length == 0 {
            return Err(BridgeError::validation("registry.mac_length must be positive"));
        }

        if !(1..=5).contains(&registry.address_digits) {
            return Err(BridgeError::validation(
                "registry.address_digits must be 1-5",
            ));
        }

        if self.modbus.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(BridgeError::validation(format!(
                "modbus.bind '{}' is not a socket address",
                self.modbus.bind
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config = GatewayConfig::parse(r#"{ radio: { hardware_id_pattern: "A9X8TQ2B" } }"#)
            .unwrap();

        assert_eq!(config.radio.baud_rate, 9600);
        assert_eq!(config.radio.reconnect.initial_delay_ms, 500);
        assert_eq!(config.radio.reconnect.max_delay_ms, 30_000);
        assert_eq!(config.registry.lowest_register, 30000);
        assert_eq!(config.registry.highest_register, 39999);
        assert_eq!(config.registry.block_size, 50);
        assert_eq!(config.registry.store_dir, PathBuf::from("radiobus-data"));
        assert!(config.registry.record_history);
        assert_eq!(config.modbus.bind, "0.0.0.0:5020");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            radio: {
                hardware_id_pattern: "SER=A9X8TQ2B",
                baud_rate: 115200,
                reconnect: { initial_delay_ms: 100, max_delay_ms: 1000, multiplier: 1.5, max_attempts: 10 },
            },
            registry: { lowest_register: 40000, highest_register: 40999, block_size: 20, store_dir: "/var/lib/radiobus" },
            modbus: {
                bind: "127.0.0.1:502",
                identification: { vendor_name: "ACME", product_code: "GW-1" },
            },
            logging: { level: "debug", format: "json" },
        }"#;

        let config = GatewayConfig::parse(json).unwrap();
        assert_eq!(config.radio.baud_rate, 115200);

        let policy = config.radio.reconnect.policy();
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.max_attempts, Some(10));

        let address = config.registry.policy();
        assert_eq!(address.lowest, 40000);
        assert_eq!(address.block_size, 20);
        assert_eq!(address.mac_length, 16);

        assert_eq!(config.modbus.identification.vendor_name, "ACME");
        assert_eq!(config.modbus.identification.product_name, "Radiobus Gateway");
    }

    #[test]
    fn test_radio_section_is_required() {
        assert!(GatewayConfig::parse("{}").is_err());
    }

    #[test]
    fn test_validation() {
        let cases = [
            r#"{ radio: { hardware_id_pattern: " " } }"#,
            r#"{ radio: { hardware_id_pattern: "X", baud_rate: 0 } }"#,
            r#"{ radio: { hardware_id_pattern: "X", reconnect: { multiplier: 0.5 } } }"#,
            r#"{ radio: { hardware_id_pattern: "X" }, registry: { lowest_register: 5, highest_register: 4 } }"#,
            r#"{ radio: { hardware_id_pattern: "X" }, registry: { lowest_register: 0, highest_register: 9, block_size: 11 } }"#,
            r#"{ radio: { hardware_id_pattern: "X" }, registry: { block_size: 0 } }"#,
            r#"{ radio: { hardware_id_pattern: "X" }, registry: { address_digits: 6 } }"#,
            r#"{ radio: { hardware_id_pattern: "X" }, modbus: { bind: "not-an-address" } }"#,
        ];

        for case in cases {
            assert!(
                matches!(
                    GatewayConfig::parse(case),
                    Err(BridgeError::ConfigValidation(_))
                ),
                "accepted {case}"
            );
        }
    }
}
