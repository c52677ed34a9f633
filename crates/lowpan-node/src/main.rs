//! lowpan-relay node: entry point.
//!
//! Attaches to a LoWPAN mesh network and relays single-byte values over one
//! TCP connection.  Three roles mirror the sample device applications:
//!
//! ```text
//! lowpan-node receiver                  form/join the network, listen, print values
//! lowpan-node transmitter --address H   form/join the network, dial H, send stdin values
//! lowpan-node scan [--join NAME|--form] survey nearby networks, optionally join or form
//! lowpan-node init-config               write the current settings to the config file
//! ```
//!
//! # Configuration precedence
//!
//! Built-in defaults, then the TOML config file (`--config` or the platform
//! path), then environment variables, then command-line flags.
//!
//! | Variable               | Overrides                 |
//! |------------------------|---------------------------|
//! | `LOWPAN_MASTER_KEY`    | `[network] master_key`    |
//! | `LOWPAN_NETWORK_NAME`  | `[network] name`          |
//! | `LOWPAN_PORT`          | `[link] port`             |
//! | `LOWPAN_SERVER_ADDRESS`| `[link] server_address`   |
//!
//! # Driver
//!
//! This build drives a simulated radio (`SimulatedManager`) with one
//! interface, `wpan0`, that can hear the configured network and one
//! neighbouring network.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use lowpan_core::{
    rssi_to_lqi, AttachmentState, Beacon, BeaconFlags, NetworkIdentity, ValueSample,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lowpan_node::application::scan::ScanOutcome;
use lowpan_node::infrastructure::driver::SimulatedManager;
use lowpan_node::infrastructure::presenter::{LogPresenter, NodeStatus, StatusBoard};
use lowpan_node::infrastructure::storage::config::{
    config_file_path, load_config, save_config, AppConfig,
};
use lowpan_node::node::{Node, NodeOptions, NodeRole};

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "lowpan-node",
    about = "LoWPAN attachment controller and single-link value relay",
    version
)]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// TCP port the receiver listens on and the transmitter dials.
    #[arg(long, global = true, env = "LOWPAN_PORT")]
    port: Option<u16>,

    /// Name of the network to form or join.
    #[arg(long, global = true, env = "LOWPAN_NETWORK_NAME")]
    network_name: Option<String>,

    /// Network master key as hex (32 digits for a 16-byte key).
    #[arg(long, global = true, env = "LOWPAN_MASTER_KEY", hide_env_values = true)]
    master_key: Option<String>,

    /// Log filter used when `RUST_LOG` is not set (e.g. `debug`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Attach, accept one link connection at a time, and print received values.
    Receiver,

    /// Attach, dial the receiver, and send values typed on stdin.
    ///
    /// Each line is a number 0-255, `+` or `-` to step the last value,
    /// `connect` to dial again, or `quit`.
    Transmitter {
        /// Host name or address of the receiver.
        #[arg(long, env = "LOWPAN_SERVER_ADDRESS")]
        address: Option<String>,
    },

    /// Survey nearby networks.
    Scan {
        /// Join the first network advertising this name.
        #[arg(long, conflicts_with = "form")]
        join: Option<String>,

        /// Form a new network with a generated name.
        #[arg(long)]
        form: bool,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,

        /// Scan duration in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Write the effective settings to the config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Folds the flags and environment overrides into `config`.
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.link.port = port;
        }
        if let Some(name) = &self.network_name {
            config.network.name = name.clone();
        }
        if let Some(key) = &self.master_key {
            config.network.master_key = Some(key.clone());
        }
        if let Some(level) = &self.log_level {
            config.node.log_level = level.clone();
        }
        match &self.command {
            Command::Transmitter {
                address: Some(address),
            } => config.link.server_address = address.clone(),
            Command::Scan {
                timeout: Some(secs),
                ..
            } => config.scan.timeout_secs = *secs,
            _ => {}
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply_overrides(&mut config);

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.node.log_level)),
        )
        .init();

    match &cli.command {
        Command::Receiver => run_receiver(&config).await,
        Command::Transmitter { .. } => run_transmitter(&config).await,
        Command::Scan { join, form, json, .. } => {
            run_scan(&config, join.as_deref(), *form, *json).await
        }
        Command::InitConfig { force } => init_config(&config, cli.config, *force),
    }
}

// ── Roles ─────────────────────────────────────────────────────────────────────

async fn run_receiver(config: &AppConfig) -> anyhow::Result<()> {
    config
        .validate_for(NodeRole::Receiver)
        .context("invalid configuration for the receiver")?;
    let options = NodeOptions::from_config(config, NodeRole::Receiver)?;
    let board = Arc::new(StatusBoard::new());
    let node = Node::start(
        simulated_driver(config),
        options,
        Arc::new(LogPresenter::new(Arc::clone(&board))),
    )
    .context("failed to start node")?;

    info!("receiver running on port {}; press Ctrl+C to stop", config.link.port);
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("shutdown signal received");

    node.shutdown().await?;
    info!("{}", board.snapshot().summary());
    Ok(())
}

async fn run_transmitter(config: &AppConfig) -> anyhow::Result<()> {
    config
        .validate_for(NodeRole::Transmitter)
        .context("invalid configuration for the transmitter")?;
    let options = NodeOptions::from_config(config, NodeRole::Transmitter)?;
    let board = Arc::new(StatusBoard::new());
    let node = Node::start(
        simulated_driver(config),
        options,
        Arc::new(LogPresenter::new(Arc::clone(&board))),
    )
    .context("failed to start node")?;

    info!("transmitter ready; type 0-255, '+', '-', 'connect' or 'quit'");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        };
        let Some(line) = line else { break };
        match line.trim() {
            "" => {}
            "quit" | "q" => break,
            "connect" => match node.connect().await {
                Ok(peer) => info!("connected to {peer}"),
                Err(e) => warn!("{e}"),
            },
            "+" => report(node.increment().await),
            "-" => report(node.decrement().await),
            other => match parse_value(other) {
                Ok(value) => match node.send(value).await {
                    Ok(true) => info!("sent {value}"),
                    Ok(false) => warn!("not connected; dropped {value}"),
                    Err(e) => warn!("{e}"),
                },
                Err(e) => warn!("{e:#}"),
            },
        }
    }

    node.shutdown().await?;
    info!("{}", board.snapshot().summary());
    Ok(())
}

async fn run_scan(
    config: &AppConfig,
    join: Option<&str>,
    form: bool,
    json: bool,
) -> anyhow::Result<()> {
    let options = NodeOptions::from_config(config, NodeRole::Scanner)?;
    let scan_timeout = options.controller.scan_timeout;
    let board = Arc::new(StatusBoard::new());
    let node = Node::start(
        simulated_driver(config),
        options,
        Arc::new(LogPresenter::new(Arc::clone(&board))),
    )
    .context("failed to start node")?;
    let mut status = board.subscribe();

    let result = if let Some(name) = join {
        let credential = config
            .credential()
            .context("a master key is required to join a network")?;
        node.scan_and_join(name, credential).await?;
        wait_for_status(&mut status, scan_timeout, |s| {
            s.attachment == AttachmentState::Attached
                || s.attachment == AttachmentState::Fault
                || s.last_scan.as_ref().is_some_and(|scan| scan.outcome == ScanOutcome::NoMatch)
        })
        .await
    } else if form {
        let credential = config
            .credential()
            .context("a master key is required to form a network")?;
        let identity = node.form_new_network(credential).await?;
        info!("requested network '{}'", identity.name);
        wait_for_status(&mut status, scan_timeout, |s| {
            s.attachment == AttachmentState::Attached || s.attachment == AttachmentState::Fault
        })
        .await
    } else {
        node.start_scan().await?;
        wait_for_status(&mut status, scan_timeout, |s| s.scans_completed > 0).await
    };

    node.shutdown().await?;
    let snapshot = result?;

    if json {
        let out = if join.is_none() && !form {
            serde_json::to_string_pretty(&snapshot.beacons)?
        } else {
            serde_json::to_string_pretty(&snapshot)?
        };
        println!("{out}");
    } else {
        for beacon in &snapshot.beacons {
            println!("{beacon}");
        }
        println!("{}", snapshot.summary());
    }

    if snapshot.attachment == AttachmentState::Fault {
        bail!(
            "provisioning failed: {}",
            snapshot.fault.as_deref().unwrap_or("unknown error")
        );
    }
    if join.is_some() && snapshot.attachment != AttachmentState::Attached {
        bail!("network '{}' was not found", join.unwrap_or_default());
    }
    Ok(())
}

fn init_config(config: &AppConfig, path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let target = match path {
        Some(path) => path,
        None => config_file_path()?,
    };
    if target.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite",
            target.display()
        );
    }
    let written = save_config(config, Some(&target))
        .with_context(|| format!("failed to write {}", target.display()))?;
    println!("wrote {}", written.display());
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Simulated radio that hears the configured network and one neighbour.
fn simulated_driver(config: &AppConfig) -> Arc<SimulatedManager> {
    let manager = Arc::new(SimulatedManager::new());
    let iface = manager.add_interface("wpan0");
    for (name, rssi, address) in [
        (config.network.name.as_str(), -52, [0x02, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x01]),
        ("LoWPAN_neighbour", -81, [0x02, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x02]),
    ] {
        iface.add_nearby(Beacon {
            identity: NetworkIdentity::named(name),
            beacon_address: address.to_vec(),
            rssi,
            lqi: rssi_to_lqi(rssi),
            flags: BeaconFlags(BeaconFlags::CAN_ASSIST),
        });
    }
    info!("using simulated LoWPAN driver with interface wpan0");
    manager
}

async fn wait_for_status(
    status: &mut tokio::sync::watch::Receiver<NodeStatus>,
    scan_timeout: Duration,
    done: impl FnMut(&NodeStatus) -> bool,
) -> anyhow::Result<NodeStatus> {
    let limit = scan_timeout + Duration::from_secs(5);
    let snapshot = tokio::time::timeout(limit, status.wait_for(done))
        .await
        .with_context(|| format!("no result within {limit:?}"))?
        .context("node stopped unexpectedly")?
        .clone();
    Ok(snapshot)
}

fn parse_value(text: &str) -> anyhow::Result<ValueSample> {
    let number: i64 = text
        .parse()
        .with_context(|| format!("'{text}' is not a number"))?;
    Ok(ValueSample::from_i64(number)?)
}

fn report(result: Result<ValueSample, lowpan_node::node::NodeError>) {
    match result {
        Ok(value) => info!("value is now {value}"),
        Err(e) => warn!("{e}"),
    }
}
