//! TOML-based configuration for a lowpan-relay node.
//!
//! Reads and writes `AppConfig` at the platform-appropriate config file:
//! - Windows:  `%APPDATA%\LowpanRelay\config.toml`
//! - Linux:    `~/.config/lowpan-relay/config.toml`
//! - macOS:    `~/Library/Application Support/LowpanRelay/config.toml`
//!
//! The binary's `--config <path>` flag replaces the platform path.
//!
//! # Example file
//!
//! ```toml
//! [node]
//! log_level = "info"
//! auto_provision = "form"     # "form", "join" or "manual"
//! form_if_absent = false
//! auto_connect = true
//!
//! [network]
//! name = "lowpan_sample"
//! master_key = "00112233445566778899AABBCCDDEEFF"
//!
//! [link]
//! port = 23456
//! bind_address = "::"
//! server_address = "fe80::20d:6f00:53b:8022%wpan0"
//! connect_timeout_ms = 10000
//!
//! [scan]
//! timeout_secs = 30
//! ```
//!
//! Every field has a default (see the `default_*` helpers), so an empty file
//! or no file at all is a valid configuration.  The defaults alone are *not*
//! enough to run a receiver or transmitter though: the master key has no
//! default and the server address is a placeholder.  [`AppConfig::validate_for`]
//! turns those into startup errors.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lowpan_core::{Credential, CredentialError, NetworkIdentity, ProvisioningParams, DEFAULT_LINK_PORT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::attachment::{AutoProvision, ControllerConfig};
use crate::infrastructure::link::LinkConfig;
use crate::node::NodeRole;

/// Placeholder shipped as the default server address.
pub const SERVER_ADDRESS_PLACEHOLDER: &str = "<DEVICE_SERVER_ADDRESS>";

/// Error type for configuration handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No master key in the file, the environment, or on the command line.
    #[error("no network master key configured (set [network].master_key or LOWPAN_MASTER_KEY)")]
    MissingMasterKey,

    /// The master key is not 32 hex digits.
    #[error("invalid network master key: {0}")]
    InvalidMasterKey(#[from] CredentialError),

    /// The transmitter has no real server address.
    #[error("server address {0:?} is not set; edit [link].server_address or pass --address")]
    PlaceholderServerAddress(String),

    #[error("invalid bind address {value:?}: {source}")]
    InvalidBindAddress {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub scan: ScanSection,
}

/// General node behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSection {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How the node gets onto the network when an interface appears.
    #[serde(default)]
    pub auto_provision: AutoProvision,
    /// Form the target network when a join scan finds no match.
    #[serde(default)]
    pub form_if_absent: bool,
    /// Transmitter only: connect to the server as soon as the node attaches.
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

/// The mesh network to form or join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    #[serde(default = "default_network_name")]
    pub name: String,
    /// 128-bit master key as 32 hex digits.  Never logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_key: Option<String>,
    /// Radio channel to form on; the radio picks when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    /// PAN ID to form with; the radio picks when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panid: Option<u16>,
}

/// Peer link settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkSection {
    /// TCP port the receiver listens on and the transmitter connects to.
    #[serde(default = "default_link_port")]
    pub port: u16,
    /// Address the receiver binds to.  `"::"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Host name or address of the receiver, used by the transmitter.
    #[serde(default = "default_server_address")]
    pub server_address: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Beacon scan settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanSection {
    /// A scan still running after this many seconds is stopped.
    #[serde(default = "default_scan_timeout_secs")]
    pub timeout_secs: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_network_name() -> String {
    "lowpan_sample".to_string()
}
fn default_link_port() -> u16 {
    DEFAULT_LINK_PORT
}
fn default_bind_address() -> String {
    "::".to_string()
}
fn default_server_address() -> String {
    SERVER_ADDRESS_PLACEHOLDER.to_string()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_scan_timeout_secs() -> u64 {
    30
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            auto_provision: AutoProvision::default(),
            form_if_absent: false,
            auto_connect: default_true(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            name: default_network_name(),
            master_key: None,
            channel: None,
            panid: None,
        }
    }
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            port: default_link_port(),
            bind_address: default_bind_address(),
            server_address: default_server_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_scan_timeout_secs(),
        }
    }
}

// ── Derived settings ──────────────────────────────────────────────────────────

impl AppConfig {
    /// Rejects configurations that cannot work for `role`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingMasterKey`] / [`ConfigError::InvalidMasterKey`]
    ///   for the receiver and transmitter, which both provision a network.
    /// - [`ConfigError::PlaceholderServerAddress`] for a transmitter whose
    ///   server address is empty or still the shipped placeholder.
    pub fn validate_for(&self, role: NodeRole) -> Result<(), ConfigError> {
        if matches!(role, NodeRole::Receiver | NodeRole::Transmitter) {
            self.credential()?;
        }
        if role == NodeRole::Transmitter {
            let address = self.link.server_address.trim();
            if address.is_empty() || address.contains('<') {
                return Err(ConfigError::PlaceholderServerAddress(
                    self.link.server_address.clone(),
                ));
            }
        }
        self.link_config()?;
        Ok(())
    }

    /// Parses the configured master key.
    pub fn credential(&self) -> Result<Credential, ConfigError> {
        let hex = self
            .network
            .master_key
            .as_deref()
            .ok_or(ConfigError::MissingMasterKey)?;
        Ok(Credential::master_key_from_hex(hex)?)
    }

    /// Identity used when forming the configured network.
    pub fn network_identity(&self) -> NetworkIdentity {
        let mut identity = NetworkIdentity::named(self.network.name.clone());
        identity.channel = self.network.channel;
        identity.panid = self.network.panid;
        identity
    }

    /// The configured network together with its credential.
    pub fn target(&self) -> Result<ProvisioningParams, ConfigError> {
        Ok(ProvisioningParams::new(
            self.network_identity(),
            self.credential()?,
        ))
    }

    /// Attachment controller settings.  The target is left empty when no
    /// usable master key is configured.
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            target: self.target().ok(),
            auto_provision: self.node.auto_provision,
            scan_timeout: Duration::from_secs(self.scan.timeout_secs),
        }
    }

    pub fn link_config(&self) -> Result<LinkConfig, ConfigError> {
        let bind_address: IpAddr =
            self.link
                .bind_address
                .parse()
                .map_err(|source| ConfigError::InvalidBindAddress {
                    value: self.link.bind_address.clone(),
                    source,
                })?;
        Ok(LinkConfig {
            bind_address,
            connect_timeout: Duration::from_millis(self.link.connect_timeout_ms),
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`, or from the platform path when `None`.
///
/// A missing file yields `AppConfig::default()`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Writes `config` to `path` (or the platform path), creating directories.
///
/// Returns the path written.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Resolves the platform config directory including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("LowpanRelay"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("lowpan-relay"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("LowpanRelay")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
