//! Command handlers for the bluepack CLI

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tracing::{info, warn};

use bluepack_core::{
    ConnectionManager, ConnectionState, LinkConfig, LoopbackAir, PeerAddress, PeerDevice,
};
use bluepack_rfcomm::RfcommRadio;

use crate::chat::ChatSession;
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Listen => Self::handle_listen_command(config).await,
            Commands::Connect { address, name } => {
                Self::handle_connect_command(config, address, name).await
            }
            Commands::Scan { seconds } => Self::handle_scan_command(config, seconds).await,
            Commands::Status => Self::handle_status_command(config).await,
            Commands::Config { write } => Self::handle_config_command(write),
            Commands::Demo => Ok(run_demo(config.link).await?),
        }
    }

    /// Advertise the service and chat with whoever dials in
    async fn handle_listen_command(config: AppConfig) -> Result<()> {
        let radio = Arc::new(RfcommRadio::new(config.rfcomm.clone()).await?);
        if config.cli.make_discoverable {
            if let Err(e) = radio.make_discoverable().await {
                warn!("Could not make {} discoverable: {}", radio.adapter_name(), e);
            }
        }

        let manager = ConnectionManager::new(radio.clone(), config.link.clone())?;
        manager.start().await?;
        info!("Waiting for peers on {}", radio.adapter_name());

        Self::chat(manager, &config).await
    }

    /// Dial a peer while also accepting inbound sessions
    async fn handle_connect_command(
        config: AppConfig,
        address: String,
        name: Option<String>,
    ) -> Result<()> {
        let address: PeerAddress = address.parse()?;
        let peer = match name {
            Some(name) => PeerDevice::new(address.to_string(), name, address),
            None => PeerDevice::from_address(address),
        };

        let radio = Arc::new(RfcommRadio::new(config.rfcomm.clone()).await?);
        let manager = ConnectionManager::new(radio, config.link.clone())?;
        manager.start().await?;

        let attempt = manager.connect_to(peer.clone()).await?;
        info!("Dialing {} (attempt {})", peer, attempt);

        Self::chat(manager, &config).await
    }

    async fn handle_scan_command(config: AppConfig, seconds: Option<u64>) -> Result<()> {
        let seconds = seconds.unwrap_or(config.cli.scan_seconds);
        if seconds == 0 {
            return Err(CliError::InvalidInput(
                "Scan duration must be greater than 0".to_string(),
            ));
        }

        let radio = RfcommRadio::new(config.rfcomm).await?;
        println!("Scanning on {} for {}s...", radio.adapter_name(), seconds);

        let devices = radio.discover(Duration::from_secs(seconds)).await?;
        if devices.is_empty() {
            println!("No devices found");
        } else {
            println!("Found devices:");
            for device in devices {
                println!("  {}", device);
            }
        }
        Ok(())
    }

    async fn handle_status_command(config: AppConfig) -> Result<()> {
        let radio = RfcommRadio::new(config.rfcomm).await?;

        println!("bluepack status");
        println!("===============");
        println!("Adapter: {}", radio.adapter_name());
        println!("Address: {}", radio.local_address().await?);
        println!("Powered: {}", radio.is_powered().await?);

        let paired = radio.paired_devices().await?;
        if paired.is_empty() {
            println!("Paired devices: none");
        } else {
            println!("Paired devices:");
            for device in paired {
                println!("  {}", device);
            }
        }
        Ok(())
    }

    fn handle_config_command(write: bool) -> Result<()> {
        if !write {
            println!("{}", AppConfig::example_config());
            return Ok(());
        }

        let path = AppConfig::default_config_path().ok_or_else(|| {
            CliError::InvalidInput("Could not determine home directory".to_string())
        })?;
        if path.exists() {
            return Err(CliError::InvalidInput(format!(
                "{} already exists",
                path.display()
            )));
        }
        AppConfig::example().save_to_file(&path)?;
        println!("Wrote {}", path.display());
        Ok(())
    }

    async fn chat(manager: ConnectionManager, config: &AppConfig) -> Result<()> {
        let result = ChatSession::new(manager.clone(), config.cli.clone())
            .run()
            .await;
        manager.shutdown().await?;
        result
    }
}

// ----------------------------------------------------------------------------
// Demo
// ----------------------------------------------------------------------------

const DEMO_WAIT: Duration = Duration::from_secs(5);

/// Connect two in-memory devices and exchange a greeting each way
pub async fn run_demo(link: LinkConfig) -> anyhow::Result<()> {
    let air = LoopbackAir::new();
    let bob_address = PeerAddress::new([0x02, 0, 0, 0, 0, 0x02]);
    let alice_radio = air.radio(PeerAddress::new([0x02, 0, 0, 0, 0, 0x01]));
    let bob_radio = air.radio(bob_address);
    let bob_device = bob_radio.device("bob");

    let alice = ConnectionManager::new(Arc::new(alice_radio), link.clone())?;
    let bob = ConnectionManager::new(Arc::new(bob_radio), link)?;

    let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
    let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
    let _alice_sub = alice.subscribe(move |text: &str| {
        let _ = alice_tx.send(text.to_string());
    });
    let _bob_sub = bob.subscribe(move |text: &str| {
        let _ = bob_tx.send(text.to_string());
    });

    alice.start().await?;
    bob.start().await?;
    let service = bob.service();
    tokio::time::timeout(DEMO_WAIT, async {
        while !air.is_listening(bob_address, &service) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("bob never started listening")?;

    println!("alice dials {}", bob_device);
    alice.connect_to(bob_device).await?;
    wait_for_state(&alice, ConnectionState::Connected).await?;
    wait_for_state(&bob, ConnectionState::Connected).await?;

    alice.send_text("hello from alice").await?;
    let heard = tokio::time::timeout(DEMO_WAIT, bob_rx.recv())
        .await
        .context("bob heard nothing")?;
    println!("bob heard: {}", heard.unwrap_or_default());

    bob.send_text("hi alice, bob here").await?;
    let heard = tokio::time::timeout(DEMO_WAIT, alice_rx.recv())
        .await
        .context("alice heard nothing")?;
    println!("alice heard: {}", heard.unwrap_or_default());

    alice.close().await?;
    wait_for_state(&bob, ConnectionState::Listening).await?;
    println!("session closed, bob is listening again");

    alice.shutdown().await?;
    bob.shutdown().await?;
    Ok(())
}

async fn wait_for_state(manager: &ConnectionManager, wanted: ConnectionState) -> anyhow::Result<()> {
    let mut state = manager.watch_state();
    let reached = tokio::time::timeout(DEMO_WAIT, state.wait_for(|current| *current == wanted)).await;
    match reached {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => bail!("manager stopped before reaching {}", wanted),
        Err(_) => bail!("timed out waiting for {}, still {}", wanted, manager.state()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_runs_to_completion() {
        let link = LinkConfig::default().with_accept_retry_delay(Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(10), run_demo(link))
            .await
            .expect("demo timed out")
            .expect("demo failed");
    }

    #[test]
    fn test_config_command_prints_example() {
        assert!(CommandDispatcher::handle_config_command(false).is_ok());
    }
}
