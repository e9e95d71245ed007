pub mod bridge;
pub mod config;
pub mod device;
pub mod mqtt;
pub mod topics;

#[cfg(test)]
mod testing;

use crate::bridge::Bridge;
use crate::config::Config;
use crate::device::{EmulatedLink, Ooler, SharedDevice};
use crate::mqtt::{MqttConfig, MqttHandler};
use clap::{ArgAction, Parser};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Bridges an Ooler sleep system to an MQTT broker with Home Assistant discovery
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML configuration file
    config: PathBuf,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup(cli.verbose)?;

    let config = Config::load(&cli.config)?;

    // No BLE stack is linked; the device runs against an in-process peripheral.
    warn!(
        "Using an emulated GATT link for {}, no radio traffic will occur",
        config.ooler_mac
    );
    let mut ooler = Ooler::new(
        &config.ooler_mac,
        EmulatedLink::default(),
        config.ooler_settings(),
    );
    ooler.connect().await?;
    info!("Device reports name '{}'", ooler.name().await?);
    let device = SharedDevice::new(ooler);

    let transport = Arc::new(MqttHandler::connect(&MqttConfig::from(&config)).await?);

    let outcome = tokio::select! {
        result = run_bridge(&config, device, transport.clone()) => result,
        signal = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            signal.map_err(|e| eyre!("Failed to listen for ctrl-c: {}", e))
        }
    };

    let status = transport.status();
    info!(
        "Handled {} inbound messages, connection {:?}",
        status.messages_received, status.connection_state
    );
    transport.disconnect().await;

    outcome
}

async fn run_bridge(config: &Config, device: SharedDevice, transport: Arc<MqttHandler>) -> Result<()> {
    let bridge = Bridge::create(config, device, transport)
        .register()
        .await?
        .start();

    let cause = bridge.supervise().await;
    error!("Bridge stopped: {}", cause);
    Err(cause.into())
}

fn setup(verbose: u8) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env(verbose);
    Ok(())
}

fn setup_logging_env(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}
