//! Radiobus Bridge Framework
//!
//! Common abstractions for running the radio-to-Modbus gateway as a
//! long-lived service.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`BridgeHealth`] for live link and ingestion counters
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] for standardized status reporting
//!
//! # Example
//!
//! ```ignore
//! use radiobus_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> radiobus_bridge_framework::Result<()> {
//!     let args = BridgeArgs::parse_with_default("radiobus.json5");
//!     let config = GatewayConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new_with_args("radiobus", config, Some(&args))?;
//!
//!     // Spawn the radio, pipeline and server workers
//!     runner.spawn(my_worker(runner.health()));
//!
//!     // Run until Ctrl+C
//!     runner.run().await
//! }
//! ```

mod args;
mod config;
mod error;
mod health;
mod runner;
mod status;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use health::BridgeHealth;
pub use runner::BridgeRunner;
pub use status::BridgeStatus;

// Re-export commonly used types from radiobus-common
pub use radiobus_common::{
    DeviceLiveness, DeviceStatus, HealthSnapshot, LinkStatus, LogFormat, LoggingConfig,
};
