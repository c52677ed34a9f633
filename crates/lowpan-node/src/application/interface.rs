//! Driver contract: the seam between the application layer and the wireless
//! subsystem.
//!
//! The wireless subsystem is reached through two traits:
//!
//! - [`LowpanManager`] tells us whether an interface exists and hands out a
//!   callback [`Subscription`] on which every driver event arrives.
//! - [`LowpanInterface`] is one mesh interface: provisioning, scanning, and
//!   read-only status.
//!
//! All driver callbacks (interface presence, interface state, scan results)
//! are folded into one [`DriverEvent`] enum and delivered in order on the
//! subscription channel.  Implementations live in
//! `crate::infrastructure::driver`.

use std::fmt;
use std::sync::Arc;

use lowpan_core::{AttachmentState, Beacon, InterfaceRole, NetworkIdentity, ProvisioningParams};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Error type for driver calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("interface is disabled")]
    Disabled,

    #[error("a scan is already running on the interface")]
    ScanInProgress,

    #[error("driver rejected the request: {0}")]
    Rejected(String),

    #[error("wireless subsystem unavailable: {0}")]
    Unavailable(String),
}

/// One mesh network interface.
///
/// Provisioning calls (`form`, `join`) only *start* the operation; the outcome
/// arrives later as [`DriverEvent::StateChanged`] or
/// [`DriverEvent::ProvisionError`].  An `Err` return means the driver refused
/// the request outright.
#[cfg_attr(test, mockall::automock)]
pub trait LowpanInterface: Send + Sync {
    /// OS-level interface name, e.g. `"wpan0"`.
    fn name(&self) -> String;

    /// Forms a new network with the given identity and credential.
    fn form(&self, params: &ProvisioningParams) -> Result<(), DriverError>;

    /// Joins an existing network.
    fn join(&self, params: &ProvisioningParams) -> Result<(), DriverError>;

    /// Leaves the current network and forgets its identity.
    fn leave(&self) -> Result<(), DriverError>;

    /// Starts a beacon scan; results arrive as [`DriverEvent::BeaconFound`].
    fn start_scan(&self) -> Result<(), DriverError>;

    /// Stops a running scan.  No `ScanFinished` is emitted for a stopped scan.
    fn stop_scan(&self) -> Result<(), DriverError>;

    /// Identity of the network this interface is provisioned for, if any.
    fn provisioned_identity(&self) -> Option<NetworkIdentity>;

    fn state(&self) -> AttachmentState;

    fn role(&self) -> InterfaceRole;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool) -> Result<(), DriverError>;
}

/// An interface together with the id that driver events use to refer to it.
#[derive(Clone)]
pub struct InterfaceHandle {
    pub id: Uuid,
    pub iface: Arc<dyn LowpanInterface>,
}

impl InterfaceHandle {
    pub fn new(iface: Arc<dyn LowpanInterface>) -> Self {
        Self {
            id: Uuid::new_v4(),
            iface,
        }
    }
}

impl fmt::Debug for InterfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceHandle")
            .field("id", &self.id)
            .field("name", &self.iface.name())
            .finish()
    }
}

/// Every callback the wireless subsystem can deliver.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    InterfaceAdded(InterfaceHandle),
    InterfaceRemoved(Uuid),
    StateChanged {
        interface: Uuid,
        state: AttachmentState,
    },
    RoleChanged {
        interface: Uuid,
        role: InterfaceRole,
    },
    IdentityChanged {
        interface: Uuid,
        identity: NetworkIdentity,
    },
    /// An in-flight form/join failed after it was accepted.
    ProvisionError {
        interface: Uuid,
        detail: String,
    },
    BeaconFound {
        interface: Uuid,
        beacon: Beacon,
    },
    /// The driver ended a scan on its own (not via `stop_scan`).
    ScanFinished {
        interface: Uuid,
    },
}

impl DriverEvent {
    /// Id of the interface the event refers to.
    pub fn interface_id(&self) -> Uuid {
        match self {
            Self::InterfaceAdded(handle) => handle.id,
            Self::InterfaceRemoved(id) => *id,
            Self::StateChanged { interface, .. }
            | Self::RoleChanged { interface, .. }
            | Self::IdentityChanged { interface, .. }
            | Self::ProvisionError { interface, .. }
            | Self::BeaconFound { interface, .. }
            | Self::ScanFinished { interface } => *interface,
        }
    }
}

/// A registered driver callback.  Dropping the receiver does not unregister;
/// call [`LowpanManager::unregister_callback`] with `id`.
#[derive(Debug)]
pub struct Subscription {
    pub id: Uuid,
    pub events: mpsc::UnboundedReceiver<DriverEvent>,
}

/// Entry point into the wireless subsystem.
pub trait LowpanManager: Send + Sync {
    /// The interface currently present, if any.
    fn interface(&self) -> Option<InterfaceHandle>;

    /// Registers a callback subscription.  Events for interfaces that already
    /// exist are not replayed; query [`LowpanManager::interface`] afterwards.
    fn register_callback(&self) -> Result<Subscription, DriverError>;

    fn unregister_callback(&self, id: Uuid);
}
