//! Radiobus gateway binary.
//!
//! Bridges an XBee sensor mesh to Modbus TCP, and manages the radio
//! registry from the command line.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use radiobus_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, BridgeStatus};
use radiobus_gateway::commands::{self, Command, DeviceCommand};
use radiobus_gateway::config::GatewayConfig;
use radiobus_gateway::pipeline::{Pipeline, ingest_channel};
use radiobus_gateway::radio::{PortResolver, RadioBridge, SerialLinkOpener, SerialPortResolver};
use radiobus_gateway::registers::RegisterStore;
use radiobus_gateway::registry::{DeviceRegistry, FileStore};
use radiobus_gateway::server::{self, GatewayService};
use radiobus_gateway::state::GatewayState;

const BRIDGE_NAME: &str = "radiobus";

/// Radio mesh to Modbus TCP gateway.
#[derive(Parser, Debug)]
#[command(name = "radiobus-gateway")]
#[command(about = "Bridges XBee sensor radios to a Modbus TCP register space")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    bridge: BridgeArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    fn parse_with_default(default_config: &'static str) -> Self {
        let matches = Self::command()
            .mut_arg("config", |arg| arg.default_value(default_config))
            .get_matches();

        Self::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_with_default("radiobus.json5");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cli.bridge).await,
        Command::Ports => ports(),
        Command::Device(command) => device(cli.bridge, command).await,
    }
}

fn load_config(args: &BridgeArgs) -> Result<GatewayConfig> {
    GatewayConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))
}

async fn open_registry(config: &GatewayConfig) -> Result<DeviceRegistry<FileStore>> {
    let store = FileStore::open(&config.registry.store_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to open device store at {:?}",
                config.registry.store_dir
            )
        })?;

    let registry = DeviceRegistry::open(
        Arc::new(store),
        config.registry.policy(),
        config.registry.store_timeout(),
    )
    .await?;
    Ok(registry)
}

fn ports() -> Result<()> {
    let ports = commands::list_ports(&SerialPortResolver)?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}\t{}", port.name, port.hardware_id);
    }
    Ok(())
}

async fn device(args: BridgeArgs, command: DeviceCommand) -> Result<()> {
    let config = load_config(&args)?;
    let registry = open_registry(&config).await?;

    let response = commands::run_device_command(&registry, command).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn serve(args: BridgeArgs) -> Result<()> {
    let config = load_config(&args)?;
    let mut runner = BridgeRunner::new_with_args(BRIDGE_NAME, config.clone(), Some(&args))?;
    info!("Loaded configuration from {:?}", args.config);

    let resolver = SerialPortResolver;
    let port = match resolver.resolve(&config.radio.hardware_id_pattern) {
        Ok(port) => port,
        Err(e) => {
            BridgeStatus::error(BRIDGE_NAME, runner.version(), e.to_string()).log();
            error!("Run `radiobus-gateway ports` to list serial ports and their hardware ids");
            return Err(e).context("No radio coordinator found");
        }
    };
    info!(port = %port.name, hardware_id = %port.hardware_id, "Found radio coordinator");

    let registry = Arc::new(open_registry(&config).await?);
    let devices = registry.list().await?;
    info!(devices = devices.len(), "Loaded device registry");

    let registers = Arc::new(RegisterStore::new(
        config.registry.lowest_register,
        config.registry.highest_register,
    ));
    let state = Arc::new(GatewayState::new(runner.health()));
    let (tx, rx) = ingest_channel();

    let bridge = RadioBridge::new(
        config.radio.hardware_id_pattern.clone(),
        resolver,
        SerialLinkOpener::new(config.radio.baud_rate),
        config.radio.reconnect.policy(),
        state.clone(),
        tx,
    );
    runner.spawn_with_error("radio".to_string(), bridge.run(Some(port.clone())));

    let pipeline = Pipeline::new(
        registry.clone(),
        registers.clone(),
        state.clone(),
        config.registry.record_history,
    );
    runner.spawn(pipeline.run(rx));

    let listener = TcpListener::bind(&config.modbus.bind)
        .await
        .with_context(|| format!("Failed to bind Modbus server to {}", config.modbus.bind))?;
    let service = GatewayService::new(registers, config.modbus.identification.clone());
    runner.spawn_with_error("modbus".to_string(), server::serve(listener, service));

    let metadata = serde_json::json!({
        "port": port.name,
        "modbus": config.modbus.bind,
        "devices": devices.len(),
        "registers": format!(
            "{}-{}",
            config.registry.lowest_register, config.registry.highest_register
        ),
        "block_size": config.registry.block_size,
    });

    let result = runner.run_with_metadata(Some(metadata)).await;
    report_unconfigured(&registry, &state).await;
    result?;
    Ok(())
}

/// Log the radios heard during this run that have no register block yet.
async fn report_unconfigured(registry: &DeviceRegistry<FileStore>, state: &GatewayState) {
    let mut unconfigured = Vec::new();
    for mac in state.known_addresses() {
        match registry.lookup(&mac).await {
            Ok(None) => unconfigured.push(mac),
            Ok(Some(_)) => {}
            Err(e) => warn!(mac = %mac, error = %e, "Could not check radio against registry"),
        }
    }
    if !unconfigured.is_empty() {
        warn!(
            radios = ?unconfigured,
            "Heard radios with no register block; see `radiobus-gateway device add-next`"
        );
    }
}
