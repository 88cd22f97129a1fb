//! Command-line interface definition using clap
//!
//! Provides structured argument parsing with automatic help generation.
//! Flags given here override the config file.

use crate::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

// =============================================================================
// CLI Definition
// =============================================================================

/// Relay bytes between a serial device and a TCP client
#[derive(Parser, Debug, Default)]
#[command(name = "st-bridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose debug output
    #[arg(short, long)]
    pub verbose: bool,

    /// Config file (default: st-bridge.toml next to the executable)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to listen on (default: 127.0.0.1)
    #[arg(long, value_name = "ADDR")]
    pub address: Option<String>,

    /// TCP port to listen on (default: 10000)
    #[arg(long, value_name = "PORT")]
    pub tcp_port: Option<u16>,

    /// Serial device index (default: 1)
    #[arg(long, value_name = "N")]
    pub device: Option<u32>,

    /// Serial port path, overrides --device
    #[arg(long, value_name = "PATH")]
    pub port: Option<String>,

    /// Serial baud rate (default: 115200)
    #[arg(long, value_name = "BAUD")]
    pub baud: Option<u32>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Auxiliary commands; without one the bridge runs
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List serial ports visible to the OS
    ListPorts,

    /// Write a config file with the effective settings
    InitConfig {
        /// Destination (default: st-bridge.toml next to the executable)
        path: Option<PathBuf>,
    },
}

impl Cli {
    /// Apply command-line overrides on top of a loaded config
    pub fn apply(&self, config: &mut Config) {
        if let Some(address) = &self.address {
            config.socket.address = address.clone();
        }
        if let Some(port) = self.tcp_port {
            config.socket.port = port;
        }
        if let Some(device) = self.device {
            config.serial.device_id = device;
        }
        if let Some(port) = &self.port {
            config.serial.path = Some(port.clone());
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_defaults() {
        let cli = Cli::parse_from(["st-bridge"]);
        assert!(!cli.verbose);
        assert!(cli.config.is_none());
        assert!(cli.command.is_none());

        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_cli_parse_verbose() {
        let cli = Cli::parse_from(["st-bridge", "-v"]);
        assert!(cli.verbose);

        let cli = Cli::parse_from(["st-bridge", "--verbose"]);
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "st-bridge",
            "--address",
            "0.0.0.0",
            "--tcp-port",
            "12000",
            "--device",
            "3",
            "--baud",
            "9600",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.socket.address, "0.0.0.0");
        assert_eq!(config.socket.port, 12000);
        assert_eq!(config.serial.device_id, 3);
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.path, None);
    }

    #[test]
    fn test_cli_port_path() {
        let cli = Cli::parse_from(["st-bridge", "--port", "/dev/ttyACM0"]);
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.serial.port_name(), "/dev/ttyACM0");
    }

    #[test]
    fn test_cli_parse_list_ports() {
        let cli = Cli::parse_from(["st-bridge", "list-ports"]);
        assert!(matches!(cli.command, Some(Command::ListPorts)));
    }

    #[test]
    fn test_cli_parse_init_config() {
        let cli = Cli::parse_from(["st-bridge", "init-config", "bridge.toml"]);
        match cli.command {
            Some(Command::InitConfig { path }) => {
                assert_eq!(path, Some(PathBuf::from("bridge.toml")));
            }
            _ => panic!("Expected InitConfig command"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_port() {
        assert!(Cli::try_parse_from(["st-bridge", "--tcp-port", "70000"]).is_err());
    }
}
