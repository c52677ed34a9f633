//! State enums reported to the presenter.
//!
//! # Attachment lifecycle
//!
//! ```text
//!            form / join / ensure
//!  Offline ────────────────────────► Attaching ──── attached ───► Attached
//!     ▲                                  │                           │
//!     │                          provisioning error          leave / interface
//!     │                                  ▼                        removed
//!     └──────── interface removed ───── Fault                         │
//!     ◄──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Interface removal forces `Offline` from every state.
//!
//! # Link lifecycle
//!
//! ```text
//!  NoTransport ── transport available ──► Idle ── connect ──► Connecting ──► Connected
//!       ▲                                  ▲                      │              │
//!       │                                  │                 connect failed   EOF / read
//!  transport lost (from any state)    disconnect()                ▼          or write error
//!                                                                Lost ◄──────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Attachment state of the mesh interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttachmentState {
    /// Not a member of any network.
    #[default]
    Offline,
    /// Forming or joining is in progress.
    Attaching,
    /// Active member of a network.
    Attached,
    /// The last provisioning attempt failed.
    Fault,
}

impl AttachmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Attaching => "attaching",
            Self::Attached => "attached",
            Self::Fault => "fault",
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self, Self::Attached)
    }
}

impl fmt::Display for AttachmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role the device plays inside the mesh.  Display only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceRole {
    #[default]
    Detached,
    EndDevice,
    Router,
    Leader,
}

impl InterfaceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detached => "detached",
            Self::EndDevice => "end-device",
            Self::Router => "router",
            Self::Leader => "leader",
        }
    }
}

impl fmt::Display for InterfaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the single peer link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkState {
    /// The mesh transport is not available; nothing can be opened.
    #[default]
    NoTransport,
    /// Transport available, no live connection.
    Idle,
    /// An outbound connection attempt is in progress.
    Connecting,
    /// Exactly one live connection.
    Connected,
    /// The last connection (or connection attempt) failed or was closed by the peer.
    Lost,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoTransport => "no-transport",
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Lost => "lost",
        }
    }

    /// Short status line for the presenter.
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::NoTransport => "No network",
            Self::Idle => "Disconnected",
            Self::Connecting => "Connecting...",
            Self::Connected => "Connected",
            Self::Lost => "Connection lost",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
