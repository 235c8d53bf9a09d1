//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bluepack", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Bluetooth adapter to use, e.g. hci0
    #[arg(short, long, global = true)]
    pub adapter: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Advertise the chat service and chat with whoever connects
    Listen,
    /// Dial a peer and chat; inbound peers are still accepted
    Connect {
        /// Peer address, e.g. 00:1A:7D:DA:71:13
        #[arg(long)]
        address: String,
        /// Display name for the peer
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Scan for nearby devices
    Scan {
        /// Scan duration in seconds
        #[arg(short, long)]
        seconds: Option<u64>,
    },
    /// Show adapter status and paired devices
    Status,
    /// Print an example configuration file
    Config {
        /// Write the example to ~/.bluepack/config.toml instead
        #[arg(long)]
        write: bool,
    },
    /// Run two in-memory devices against each other
    Demo,
}
