//! Bridge runner for lifecycle management.

use std::future::Future;
use std::sync::Arc;

use tokio::signal;
use tokio::task::JoinHandle;

use radiobus_common::{LoggingConfig, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::health::BridgeHealth;
use crate::status::BridgeStatus;

/// Bridge runner that manages the lifecycle of the gateway.
///
/// Handles:
/// - Logging initialization
/// - Task spawning and management
/// - Graceful shutdown on Ctrl+C
/// - Status and final health reporting
///
/// # Example
///
/// ```ignore
/// use radiobus_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> radiobus_bridge_framework::Result<()> {
///     let args = BridgeArgs::parse_with_default("radiobus.json5");
///     let config = GatewayConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new_with_args("radiobus", config, Some(&args))?;
///
///     let health = runner.health();
///     runner.spawn(async move {
///         // Worker logic here
///     });
///
///     runner.run().await
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging and status.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Shared health counters.
    health: Arc<BridgeHealth>,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner.
    pub fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None)
    }

    /// Create a new bridge runner with CLI args for log level override.
    ///
    /// Initializes logging from the config, letting `--log-level` win.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        Ok(Self::without_logging(name, config))
    }

    /// Create a runner without touching the global tracing subscriber.
    pub fn without_logging(name: impl Into<String>, config: C) -> Self {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        Self {
            health: Arc::new(BridgeHealth::new(name.clone())),
            name,
            version,
            config,
            tasks: Vec::new(),
        }
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get a handle to the shared health counters.
    pub fn health(&self) -> Arc<BridgeHealth> {
        self.health.clone()
    }

    /// Spawn a worker task.
    ///
    /// The task will be tracked and aborted on shutdown.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Spawn a worker task that returns a Result.
    ///
    /// Errors are logged automatically.
    pub fn spawn_with_error<F, E>(&mut self, name: String, future: F)
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            if let Err(e) = future.await {
                tracing::error!(worker = %name, error = %e, "Worker failed");
            }
        });
        self.tasks.push(handle);
    }

    /// Run the bridge until Ctrl+C is received.
    pub async fn run(self) -> Result<()> {
        self.run_with_metadata(None).await
    }

    /// Run the bridge with custom status metadata until Ctrl+C is received.
    pub async fn run_with_metadata(self, metadata: Option<serde_json::Value>) -> Result<()> {
        self.run_until(metadata, async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await
    }

    /// Run the bridge until `shutdown` resolves.
    ///
    /// This will:
    /// 1. Log "running" status
    /// 2. Wait for the shutdown future
    /// 3. Abort all spawned tasks
    /// 4. Log "offline" status and the final health snapshot
    pub async fn run_until<S>(self, metadata: Option<serde_json::Value>, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let mut status = BridgeStatus::running(&self.name, &self.version);
        if let Some(meta) = metadata {
            status = status.with_metadata(meta);
        }
        status.log();

        tracing::info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        shutdown.await;

        tracing::info!(bridge = %self.name, "Received shutdown signal");

        for task in &self.tasks {
            task.abort();
        }

        for task in self.tasks {
            match task.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::warn!(error = %e, "Worker panicked"),
            }
        }

        let snapshot = self.health.snapshot();
        BridgeStatus::offline(&self.name, &self.version)
            .with_metadata(serde_json::to_value(&snapshot)?)
            .log();

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}
