//! In-process simulated wireless subsystem.
//!
//! # Why a simulated driver?
//!
//! The real mesh radio is only reachable on the target hardware.  The
//! simulated driver behaves like a well-mannered radio so that the node can
//! run on any host and so that tests can drive every path the controller
//! handles:
//!
//! - `form` succeeds immediately and reports `Attaching` then `Attached`.
//! - `join` succeeds only if a beacon for the requested network is "in range"
//!   (see [`SimulatedInterface::add_nearby`]); otherwise it reports a
//!   provisioning error.
//! - `start_scan` reports every nearby beacon and, unless told otherwise,
//!   finishes the scan on its own.
//!
//! Events are pushed synchronously into every subscriber's channel while the
//! driver call is still running, which mirrors how a radio daemon queues
//! callbacks.
//!
//! # Failure injection
//!
//! [`SimulatedInterface::reject_next_provision`] makes the next form/join
//! return an error straight away; [`SimulatedInterface::fail_next_provision`]
//! accepts it and then reports a provisioning error.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lowpan_core::{AttachmentState, Beacon, InterfaceRole, NetworkIdentity, ProvisioningParams};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::interface::{
    DriverError, DriverEvent, InterfaceHandle, LowpanInterface, LowpanManager, Subscription,
};

/// Lowest 2.4 GHz 802.15.4 channel.
const FIRST_CHANNEL: u8 = 11;
const CHANNEL_COUNT: u64 = 16;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Event bus ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct EventBus {
    subscribers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<DriverEvent>>>,
}

impl EventBus {
    fn subscribe(&self) -> Subscription {
        let (tx, events) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        lock(&self.subscribers).insert(id, tx);
        Subscription { id, events }
    }

    fn unsubscribe(&self, id: Uuid) -> bool {
        lock(&self.subscribers).remove(&id).is_some()
    }

    fn publish(&self, events: Vec<DriverEvent>) {
        let mut subscribers = lock(&self.subscribers);
        for event in events {
            debug!("sim driver event: {event:?}");
            // Subscribers whose receiver is gone are pruned.
            subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
        }
    }

    fn len(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

// ── Interface ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Radio {
    enabled: bool,
    state: AttachmentState,
    role: InterfaceRole,
    attached_role: InterfaceRole,
    identity: Option<NetworkIdentity>,
    scanning: bool,
    finish_scans: bool,
    nearby: Vec<Beacon>,
    reject_next: Option<DriverError>,
    fail_next: Option<String>,
}

impl Radio {
    fn new() -> Self {
        Self {
            enabled: true,
            state: AttachmentState::Offline,
            role: InterfaceRole::Detached,
            attached_role: InterfaceRole::Detached,
            identity: None,
            scanning: false,
            finish_scans: true,
            nearby: Vec::new(),
            reject_next: None,
            fail_next: None,
        }
    }

    /// Checks shared by form and join.  `Ok(Some(detail))` means the request
    /// is accepted but will fail asynchronously.
    fn admit_provision(&mut self) -> Result<Option<String>, DriverError> {
        if !self.enabled {
            return Err(DriverError::Disabled);
        }
        if let Some(err) = self.reject_next.take() {
            return Err(err);
        }
        Ok(self.fail_next.take())
    }
}

/// A simulated mesh interface.
pub struct SimulatedInterface {
    id: Uuid,
    name: String,
    bus: Arc<EventBus>,
    radio: Mutex<Radio>,
}

impl SimulatedInterface {
    fn new(name: impl Into<String>, bus: Arc<EventBus>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            bus,
            radio: Mutex::new(Radio::new()),
        }
    }

    /// The id this interface's events carry.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Puts a network "in range": it is reported by scans and can be joined.
    pub fn add_nearby(&self, beacon: Beacon) {
        lock(&self.radio).nearby.push(beacon);
    }

    /// Whether scans end on their own after reporting every nearby beacon.
    /// Defaults to `true`.
    pub fn set_finish_scans(&self, finish: bool) {
        lock(&self.radio).finish_scans = finish;
    }

    /// Makes the next form or join return `err` immediately.
    pub fn reject_next_provision(&self, err: DriverError) {
        lock(&self.radio).reject_next = Some(err);
    }

    /// Makes the next form or join be accepted, then fail with `detail`.
    pub fn fail_next_provision(&self, detail: impl Into<String>) {
        lock(&self.radio).fail_next = Some(detail.into());
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.radio).scanning
    }

    fn attach(&self, radio: &mut Radio, identity: NetworkIdentity, role: InterfaceRole) -> Vec<DriverEvent> {
        radio.identity = Some(identity.clone());
        radio.state = AttachmentState::Attached;
        radio.role = role;
        radio.attached_role = role;
        vec![
            DriverEvent::StateChanged {
                interface: self.id,
                state: AttachmentState::Attaching,
            },
            DriverEvent::IdentityChanged {
                interface: self.id,
                identity,
            },
            DriverEvent::RoleChanged {
                interface: self.id,
                role,
            },
            DriverEvent::StateChanged {
                interface: self.id,
                state: AttachmentState::Attached,
            },
        ]
    }

    fn detach(&self, radio: &mut Radio) -> Vec<DriverEvent> {
        radio.state = AttachmentState::Offline;
        radio.role = InterfaceRole::Detached;
        vec![
            DriverEvent::RoleChanged {
                interface: self.id,
                role: InterfaceRole::Detached,
            },
            DriverEvent::StateChanged {
                interface: self.id,
                state: AttachmentState::Offline,
            },
        ]
    }

    fn provision_error(&self, detail: String) -> Vec<DriverEvent> {
        vec![DriverEvent::ProvisionError {
            interface: self.id,
            detail,
        }]
    }
}

impl LowpanInterface for SimulatedInterface {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn form(&self, params: &ProvisioningParams) -> Result<(), DriverError> {
        let events = {
            let mut radio = lock(&self.radio);
            match radio.admit_provision()? {
                Some(detail) => self.provision_error(detail),
                None => {
                    let identity = complete_identity(&params.identity);
                    info!("sim: {} formed {identity}", self.name);
                    self.attach(&mut radio, identity, InterfaceRole::Leader)
                }
            }
        };
        self.bus.publish(events);
        Ok(())
    }

    fn join(&self, params: &ProvisioningParams) -> Result<(), DriverError> {
        let events = {
            let mut radio = lock(&self.radio);
            match radio.admit_provision()? {
                Some(detail) => self.provision_error(detail),
                None => {
                    let found = radio
                        .nearby
                        .iter()
                        .find(|b| b.identity.has_name(&params.identity.name))
                        .map(|b| b.identity.clone());
                    match found {
                        Some(identity) => {
                            info!("sim: {} joined {identity}", self.name);
                            self.attach(&mut radio, identity, InterfaceRole::EndDevice)
                        }
                        None => {
                            let mut events = vec![DriverEvent::StateChanged {
                                interface: self.id,
                                state: AttachmentState::Attaching,
                            }];
                            events.extend(self.provision_error(format!(
                                "network '{}' not found",
                                params.identity.name
                            )));
                            events
                        }
                    }
                }
            }
        };
        self.bus.publish(events);
        Ok(())
    }

    fn leave(&self) -> Result<(), DriverError> {
        let events = {
            let mut radio = lock(&self.radio);
            if radio.identity.take().is_none() {
                return Err(DriverError::Rejected("interface is not provisioned".into()));
            }
            self.detach(&mut radio)
        };
        self.bus.publish(events);
        Ok(())
    }

    fn start_scan(&self) -> Result<(), DriverError> {
        let events = {
            let mut radio = lock(&self.radio);
            if !radio.enabled {
                return Err(DriverError::Disabled);
            }
            if radio.scanning {
                return Err(DriverError::ScanInProgress);
            }
            radio.scanning = true;
            let mut events: Vec<DriverEvent> = radio
                .nearby
                .iter()
                .map(|beacon| DriverEvent::BeaconFound {
                    interface: self.id,
                    beacon: beacon.clone(),
                })
                .collect();
            if radio.finish_scans {
                radio.scanning = false;
                events.push(DriverEvent::ScanFinished { interface: self.id });
            }
            events
        };
        self.bus.publish(events);
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), DriverError> {
        lock(&self.radio).scanning = false;
        Ok(())
    }

    fn provisioned_identity(&self) -> Option<NetworkIdentity> {
        lock(&self.radio).identity.clone()
    }

    fn state(&self) -> AttachmentState {
        lock(&self.radio).state
    }

    fn role(&self) -> InterfaceRole {
        lock(&self.radio).role
    }

    fn is_enabled(&self) -> bool {
        lock(&self.radio).enabled
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), DriverError> {
        let events = {
            let mut radio = lock(&self.radio);
            if radio.enabled == enabled {
                return Ok(());
            }
            radio.enabled = enabled;
            match (enabled, radio.identity.clone()) {
                (false, _) if radio.state != AttachmentState::Offline => self.detach(&mut radio),
                (true, Some(identity)) => {
                    let role = radio.attached_role;
                    self.attach(&mut radio, identity, role)
                }
                _ => Vec::new(),
            }
        };
        self.bus.publish(events);
        Ok(())
    }
}

/// Fills in the radio parameters a forming radio would pick.
fn complete_identity(requested: &NetworkIdentity) -> NetworkIdentity {
    let mut hasher = DefaultHasher::new();
    requested.name.hash(&mut hasher);
    let h = hasher.finish();

    let mut identity = requested.clone();
    if identity.xpanid.is_empty() {
        identity.xpanid = h.to_be_bytes().to_vec();
    }
    identity.panid.get_or_insert((h & 0xFFFF) as u16);
    identity
        .channel
        .get_or_insert(FIRST_CHANNEL + ((h >> 16) % CHANNEL_COUNT) as u8);
    identity
}

// ── Manager ───────────────────────────────────────────────────────────────────

/// Simulated wireless subsystem holding at most one current interface.
#[derive(Default)]
pub struct SimulatedManager {
    bus: Arc<EventBus>,
    current: Mutex<Option<InterfaceHandle>>,
}

impl SimulatedManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an interface and announces it to every subscriber.
    ///
    /// The first interface becomes the one [`LowpanManager::interface`]
    /// returns; later ones are announced but not made current.
    pub fn add_interface(&self, name: impl Into<String>) -> Arc<SimulatedInterface> {
        let iface = Arc::new(SimulatedInterface::new(name, Arc::clone(&self.bus)));
        let dyn_iface: Arc<dyn LowpanInterface> = iface.clone();
        let handle = InterfaceHandle {
            id: iface.id(),
            iface: dyn_iface,
        };
        {
            let mut current = lock(&self.current);
            if current.is_none() {
                *current = Some(handle.clone());
            }
        }
        info!("sim: interface {} ({}) added", iface.name, iface.id);
        self.bus.publish(vec![DriverEvent::InterfaceAdded(handle)]);
        iface
    }

    /// Removes the current interface and announces it.
    pub fn remove_interface(&self) -> Option<Uuid> {
        let handle = lock(&self.current).take()?;
        info!("sim: interface {} removed", handle.id);
        self.bus.publish(vec![DriverEvent::InterfaceRemoved(handle.id)]);
        Some(handle.id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.len()
    }
}

impl LowpanManager for SimulatedManager {
    fn interface(&self) -> Option<InterfaceHandle> {
        lock(&self.current).clone()
    }

    fn register_callback(&self) -> Result<Subscription, DriverError> {
        Ok(self.bus.subscribe())
    }

    fn unregister_callback(&self, id: Uuid) {
        if !self.bus.unsubscribe(id) {
            debug!("sim: callback {id} was not registered");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
