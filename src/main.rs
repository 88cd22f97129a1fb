//! st-bridge - relay bytes between a serial device and a TCP client
//!
//! Usage:
//!   st-bridge                      Run the bridge (defaults: device 1 @ 115200, 127.0.0.1:10000)
//!   st-bridge --port /dev/ttyACM0  Use an explicit serial port
//!   st-bridge list-ports           List serial ports
//!   st-bridge init-config [PATH]   Write the effective config to a file

use clap::Parser;
use serial_tcp_bridge::cli::{Cli, Command};
use serial_tcp_bridge::config::{self, Config};
use serial_tcp_bridge::error::{BridgeError, Result};
use serial_tcp_bridge::serial::{self, NativeDriver};
use serial_tcp_bridge::shutdown::{self, Shutdown};
use serial_tcp_bridge::{logging, Bridge};
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = config::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    match cli.command {
        Some(Command::ListPorts) => list_ports(),
        Some(Command::InitConfig { ref path }) => init_config(&config, path.clone()),
        None => run_bridge(config),
    }
}

fn list_ports() -> Result<()> {
    let ports = serial::list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

fn init_config(config: &Config, path: Option<std::path::PathBuf>) -> Result<()> {
    let path = match path.or_else(config::default_path) {
        Some(p) => p,
        None => {
            return Err(BridgeError::ConfigValidation {
                field: "path",
                reason: "cannot locate executable directory, pass a path".into(),
            })
        }
    };
    config::save(config, &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn run_bridge(config: Config) -> Result<()> {
    let rt = tokio::runtime::Runtime::new().map_err(|source| BridgeError::Runtime { source })?;

    rt.block_on(async {
        info!("Starting serial service");
        let shutdown = Shutdown::new();
        shutdown::install_signal_handlers(shutdown.clone())?;

        let bridge = Bridge::start(&config, &NativeDriver, shutdown)?;
        bridge.run().await
    })
}
