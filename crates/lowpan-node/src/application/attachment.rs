//! AttachmentController: keeps the device attached to its mesh network.
//!
//! # What does the controller do? (for beginners)
//!
//! Before two devices can exchange values they must both be members of the
//! same mesh network.  Getting there is a small state machine:
//!
//! 1. Wait for the wireless subsystem to report an interface.
//! 2. Either *form* a new network, or *scan* for beacons and *join* the one
//!    whose name matches the configured target.
//! 3. Track the interface as it reports `Attaching`, `Attached`, or a
//!    provisioning error.
//!
//! The controller is a plain struct driven by `&mut self` calls.  It is owned
//! by exactly one task (the node pump), which feeds it driver events and user
//! commands in order, so no locking is needed inside.  Everything the outside
//! world should know about is published two ways:
//!
//! - The current [`AttachmentState`] on a `tokio::sync::watch` channel, for
//!   any number of readers that only care about "now".
//! - Every change as an [`AttachmentEvent`] on an unbounded `mpsc` channel,
//!   in order, for the presenter.
//!
//! # Rules worth knowing
//!
//! - Only the first interface is used.  Events for any other interface are
//!   ignored until the first one is removed.
//! - At most one provisioning attempt or scan is in flight; a second request
//!   fails with [`AttachmentError::Busy`] and leaves the first untouched.
//! - Interface removal always wins: the pending attempt is discarded, a
//!   running scan is finished, and the state becomes `Offline`.
//! - A repeated transition to the same state is not re-announced, except
//!   `Fault`, which is announced every time.
//! - Nothing is retried automatically.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use lowpan_core::{
    AttachmentState, Beacon, Credential, InterfaceRole, JoinPolicy, NetworkIdentity,
    ProvisioningParams,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::interface::{DriverError, DriverEvent, InterfaceHandle, LowpanInterface};
use super::scan::{BeaconDisposition, ScanError, ScanPurpose, ScanSession, ScanSummary};

/// Default time a scan may run before it is stopped.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for controller operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("no LoWPAN interface is available")]
    NoInterface,

    #[error("no target network is configured")]
    NoTarget,

    #[error("a scan, join or form is already in progress")]
    Busy,

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}

/// What [`AttachmentController::ensure_interface_attached`] does when the
/// interface is not yet on the target network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutoProvision {
    /// Form the target network.
    #[default]
    Form,
    /// Scan for the target network and join it.
    Join,
    /// Do nothing; provisioning is left to explicit commands.
    Manual,
}

/// Result of an `ensure_interface_attached` call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Already provisioned on the target network; nothing to do.
    AlreadyProvisioned,
    /// A form, join, or scan is already running; nothing to do.
    InFlight,
    /// Auto-provisioning is disabled.
    Manual,
    /// A form request was issued.
    Forming,
    /// A join scan was started.
    Scanning,
}

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// The network to form or join automatically.
    pub target: Option<ProvisioningParams>,
    pub auto_provision: AutoProvision,
    pub scan_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            target: None,
            auto_provision: AutoProvision::default(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }
}

/// Notifications published by the controller, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentEvent {
    /// The attachment state changed.  `detail` is set for `Fault`.
    StateChanged {
        state: AttachmentState,
        detail: Option<String>,
    },
    RoleChanged(InterfaceRole),
    IdentityChanged(NetworkIdentity),
    /// A provisioning or leave request failed.
    ProvisioningError(String),
    /// The interface in use changed; `None` when it was removed.
    InterfaceChanged(Option<String>),
    EnabledChanged(bool),
    BeaconFound(Beacon),
    ScanFinished(ScanSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProvisionKind {
    Form,
    Join,
}

impl fmt::Display for ProvisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Form => "form",
            Self::Join => "join",
        })
    }
}

#[derive(Debug)]
struct PendingRequest {
    kind: ProvisionKind,
    network: String,
}

/// Network attachment state machine for one interface.
pub struct AttachmentController {
    config: ControllerConfig,
    interface: Option<InterfaceHandle>,
    pending: Option<PendingRequest>,
    scan: ScanSession,
    role: InterfaceRole,
    state_tx: watch::Sender<AttachmentState>,
    events: mpsc::UnboundedSender<AttachmentEvent>,
}

impl AttachmentController {
    /// Creates a controller with no interface.
    ///
    /// Returns the controller and the receiver for its [`AttachmentEvent`]s.
    pub fn new(config: ControllerConfig) -> (Self, mpsc::UnboundedReceiver<AttachmentEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(AttachmentState::Offline);
        let controller = Self {
            config,
            interface: None,
            pending: None,
            scan: ScanSession::new(),
            role: InterfaceRole::Detached,
            state_tx,
            events,
        };
        (controller, event_rx)
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn state(&self) -> AttachmentState {
        *self.state_tx.borrow()
    }

    /// A receiver that always holds the current attachment state.
    pub fn subscribe_state(&self) -> watch::Receiver<AttachmentState> {
        self.state_tx.subscribe()
    }

    pub fn role(&self) -> InterfaceRole {
        self.role
    }

    pub fn interface_name(&self) -> Option<String> {
        self.interface.as_ref().map(|h| h.iface.name())
    }

    pub fn target(&self) -> Option<&ProvisioningParams> {
        self.config.target.as_ref()
    }

    /// `true` while a provisioning attempt or a scan is running.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some() || self.scan.is_active()
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_active()
    }

    /// When the running scan must be stopped, if one is running.
    pub fn scan_deadline(&self) -> Option<Instant> {
        self.scan.deadline()
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Makes sure the interface is on the target network, provisioning it
    /// according to [`ControllerConfig::auto_provision`] if not.
    ///
    /// Safe to call repeatedly: it does nothing while the interface is already
    /// provisioned on the target network or while an attempt is in flight.
    ///
    /// # Errors
    ///
    /// - [`AttachmentError::NoInterface`] if no interface is present.
    /// - [`AttachmentError::NoTarget`] if no target network is configured and
    ///   auto-provisioning is enabled.  A manual controller without a target
    ///   answers [`EnsureOutcome::Manual`].
    /// - Any error from starting the form or the join scan.
    pub fn ensure_interface_attached(&mut self) -> Result<EnsureOutcome, AttachmentError> {
        let iface = self.current_iface().ok_or(AttachmentError::NoInterface)?;
        let Some(target) = self.config.target.clone() else {
            if self.config.auto_provision == AutoProvision::Manual {
                return Ok(EnsureOutcome::Manual);
            }
            return Err(AttachmentError::NoTarget);
        };

        if let Some(current) = iface.provisioned_identity() {
            if current.has_name(&target.identity.name) {
                debug!("{} already provisioned on '{}'", iface.name(), current.name);
                return Ok(EnsureOutcome::AlreadyProvisioned);
            }
        }
        if self.is_busy() {
            debug!("attachment attempt already in flight");
            return Ok(EnsureOutcome::InFlight);
        }

        match self.config.auto_provision {
            AutoProvision::Manual => Ok(EnsureOutcome::Manual),
            AutoProvision::Form => {
                self.form(target)?;
                Ok(EnsureOutcome::Forming)
            }
            AutoProvision::Join => {
                self.scan_and_join(JoinPolicy::new(target.identity.name), target.credential)?;
                Ok(EnsureOutcome::Scanning)
            }
        }
    }

    /// Forms a new network.
    ///
    /// # Errors
    ///
    /// - [`AttachmentError::Busy`] if a scan, form, or join is in progress.
    /// - [`AttachmentError::NoInterface`] if no interface is present.
    /// - [`AttachmentError::Driver`] if the driver refused; the refusal is
    ///   also announced as a provisioning error and the state becomes `Fault`.
    pub fn form(&mut self, params: ProvisioningParams) -> Result<(), AttachmentError> {
        self.provision(ProvisionKind::Form, params)
    }

    /// Forms the configured target network.
    pub fn form_target(&mut self) -> Result<(), AttachmentError> {
        let target = self.config.target.clone().ok_or(AttachmentError::NoTarget)?;
        self.form(target)
    }

    /// Joins an existing network.  Errors as for [`form`](Self::form).
    pub fn join(&mut self, params: ProvisioningParams) -> Result<(), AttachmentError> {
        self.provision(ProvisionKind::Join, params)
    }

    /// Scans for the network `policy` names and joins the first match.
    pub fn scan_and_join(
        &mut self,
        policy: JoinPolicy,
        credential: Credential,
    ) -> Result<(), AttachmentError> {
        if self.pending.is_some() {
            return Err(AttachmentError::Busy);
        }
        let iface = self.current_iface();
        self.scan.start(
            iface.as_deref(),
            ScanPurpose::Join { policy, credential },
            self.config.scan_timeout,
        )?;
        Ok(())
    }

    /// Leaves the current network.
    ///
    /// Leaving while not provisioned only logs a warning.  A driver failure is
    /// announced as a provisioning error but is not returned.
    ///
    /// # Errors
    ///
    /// Returns [`AttachmentError::NoInterface`] if no interface is present.
    pub fn leave(&mut self) -> Result<(), AttachmentError> {
        let iface = self.current_iface().ok_or(AttachmentError::NoInterface)?;
        if iface.provisioned_identity().is_none() {
            warn!("leave requested but {} is not provisioned", iface.name());
            return Ok(());
        }

        match iface.leave() {
            Ok(()) => {
                info!("{} left its network", iface.name());
                self.pending = None;
                self.transition(AttachmentState::Offline, None);
            }
            Err(e) => {
                warn!("leave failed on {}: {e}", iface.name());
                self.emit(AttachmentEvent::ProvisioningError(format!("leave failed: {e}")));
            }
        }
        Ok(())
    }

    /// Starts a survey scan that reports every beacon and never joins.
    ///
    /// # Errors
    ///
    /// See [`ScanSession::start`].
    pub fn start_scan(&mut self) -> Result<(), AttachmentError> {
        let iface = self.current_iface();
        self.scan
            .start(iface.as_deref(), ScanPurpose::Survey, self.config.scan_timeout)?;
        Ok(())
    }

    /// Stops the running scan, if any.  Idempotent.
    pub fn stop_scan(&mut self) -> Option<ScanSummary> {
        let iface = self.current_iface();
        let summary = self.scan.stop(iface.as_deref())?;
        self.emit(AttachmentEvent::ScanFinished(summary.clone()));
        Some(summary)
    }

    /// Stops the scan if its deadline has passed.
    pub fn on_scan_deadline(&mut self) -> Option<ScanSummary> {
        let deadline = self.scan.deadline()?;
        if Instant::now() < deadline {
            return None;
        }
        info!("scan timed out");
        self.stop_scan()
    }

    /// Enables or disables the interface.
    ///
    /// # Errors
    ///
    /// [`AttachmentError::NoInterface`] or the driver's error.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<(), AttachmentError> {
        let iface = self.current_iface().ok_or(AttachmentError::NoInterface)?;
        iface.set_enabled(enabled)?;
        info!(
            "{} {}",
            iface.name(),
            if enabled { "enabled" } else { "disabled" }
        );
        self.emit(AttachmentEvent::EnabledChanged(enabled));
        Ok(())
    }

    /// Drops the interface handle.  Last step of shutdown; observers see the
    /// same sequence as for a removed interface, ending in `Offline`.
    pub fn release_interface(&mut self) {
        if self.interface.is_none() {
            return;
        }
        self.on_interface_removed();
    }

    // ── Driver events ─────────────────────────────────────────────────────────

    /// Applies one driver event.
    pub fn handle_driver_event(&mut self, event: DriverEvent) {
        if !matches!(event, DriverEvent::InterfaceAdded(_)) && !self.is_current(event.interface_id())
        {
            debug!("ignoring event for unused interface {}", event.interface_id());
            return;
        }

        match event {
            DriverEvent::InterfaceAdded(handle) => self.on_interface_added(handle),
            DriverEvent::InterfaceRemoved(_) => self.on_interface_removed(),
            DriverEvent::StateChanged { state, .. } => self.on_driver_state(state),
            DriverEvent::RoleChanged { role, .. } => self.set_role(role),
            DriverEvent::IdentityChanged { identity, .. } => {
                info!("network identity is now {identity}");
                self.emit(AttachmentEvent::IdentityChanged(identity));
            }
            DriverEvent::ProvisionError { detail, .. } => self.on_provision_error(detail),
            DriverEvent::BeaconFound { beacon, .. } => self.on_beacon(beacon),
            DriverEvent::ScanFinished { .. } => {
                if let Some(summary) = self.scan.finish() {
                    self.emit(AttachmentEvent::ScanFinished(summary));
                }
            }
        }
    }

    fn on_interface_added(&mut self, handle: InterfaceHandle) {
        if let Some(current) = &self.interface {
            debug!(
                "ignoring interface {} ({}); {} is in use",
                handle.iface.name(),
                handle.id,
                current.id
            );
            return;
        }

        let name = handle.iface.name();
        let state = handle.iface.state();
        let role = handle.iface.role();
        let enabled = handle.iface.is_enabled();
        info!("using interface {name} ({state}, {role})");

        self.interface = Some(handle);
        self.emit(AttachmentEvent::InterfaceChanged(Some(name)));
        self.emit(AttachmentEvent::EnabledChanged(enabled));
        self.set_role(role);
        self.transition(state, None);
    }

    fn on_interface_removed(&mut self) {
        if let Some(handle) = self.interface.take() {
            info!("dropping interface {}", handle.id);
        }
        if let Some(pending) = self.pending.take() {
            info!("discarding {} of '{}'", pending.kind, pending.network);
        }
        if let Some(summary) = self.scan.finish() {
            self.emit(AttachmentEvent::ScanFinished(summary));
        }
        self.emit(AttachmentEvent::InterfaceChanged(None));
        self.set_role(InterfaceRole::Detached);
        self.transition(AttachmentState::Offline, None);
    }

    fn on_driver_state(&mut self, state: AttachmentState) {
        if state != AttachmentState::Attaching {
            self.pending = None;
        }
        self.transition(state, None);
    }

    fn on_provision_error(&mut self, detail: String) {
        warn!("provisioning error: {detail}");
        self.emit(AttachmentEvent::ProvisioningError(detail.clone()));

        let attempt_failed = self.pending.take().is_some()
            || matches!(
                self.state(),
                AttachmentState::Attaching | AttachmentState::Fault
            );
        if attempt_failed {
            self.transition(AttachmentState::Fault, Some(detail));
        }
    }

    fn on_beacon(&mut self, beacon: Beacon) {
        match self.scan.on_beacon(&beacon) {
            BeaconDisposition::Ignored => {}
            BeaconDisposition::Delivered => self.emit(AttachmentEvent::BeaconFound(beacon)),
            BeaconDisposition::Matched(params) => {
                info!("found network {}; joining", beacon.identity);
                self.emit(AttachmentEvent::BeaconFound(beacon));
                self.stop_scan();
                if let Err(e) = self.join(params) {
                    warn!("join after scan match failed: {e}");
                }
            }
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn provision(
        &mut self,
        kind: ProvisionKind,
        params: ProvisioningParams,
    ) -> Result<(), AttachmentError> {
        if self.is_busy() {
            return Err(AttachmentError::Busy);
        }
        let iface = self.current_iface().ok_or(AttachmentError::NoInterface)?;

        info!("requesting {kind} of {} on {}", params.identity, iface.name());
        self.pending = Some(PendingRequest {
            kind,
            network: params.identity.name.clone(),
        });
        self.transition(AttachmentState::Attaching, None);

        let result = match kind {
            ProvisionKind::Form => iface.form(&params),
            ProvisionKind::Join => iface.join(&params),
        };
        if let Err(e) = result {
            self.pending = None;
            let detail = format!("{kind} of '{}' rejected: {e}", params.identity.name);
            warn!("{detail}");
            self.emit(AttachmentEvent::ProvisioningError(detail.clone()));
            self.transition(AttachmentState::Fault, Some(detail));
            return Err(e.into());
        }
        Ok(())
    }

    fn current_iface(&self) -> Option<Arc<dyn LowpanInterface>> {
        self.interface.as_ref().map(|h| Arc::clone(&h.iface))
    }

    fn is_current(&self, id: Uuid) -> bool {
        self.interface.as_ref().is_some_and(|h| h.id == id)
    }

    fn set_role(&mut self, role: InterfaceRole) {
        if role != self.role {
            debug!("role {} -> {role}", self.role);
            self.role = role;
            self.emit(AttachmentEvent::RoleChanged(role));
        }
    }

    fn transition(&mut self, state: AttachmentState, detail: Option<String>) {
        let previous = self.state();
        if previous == state && state != AttachmentState::Fault {
            return;
        }
        info!("attachment {previous} -> {state}");
        self.state_tx.send_replace(state);
        self.emit(AttachmentEvent::StateChanged { state, detail });
    }

    fn emit(&self, event: AttachmentEvent) {
        // A dropped receiver means nobody is listening; that is not an error.
        let _ = self.events.send(event);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::interface::MockLowpanInterface;
    use crate::application::scan::ScanOutcome;
    use lowpan_core::BeaconFlags;
    use tokio_test::{assert_err, assert_ok};

    const SAMPLE_KEY: &str = "FC4262D8F8F79502ABCD326356C610A5";

    fn target(name: &str) -> ProvisioningParams {
        ProvisioningParams::new(
            NetworkIdentity::named(name),
            Credential::master_key_from_hex(SAMPLE_KEY).unwrap(),
        )
    }

    fn controller(
        auto: AutoProvision,
    ) -> (AttachmentController, mpsc::UnboundedReceiver<AttachmentEvent>) {
        AttachmentController::new(ControllerConfig {
            target: Some(target("lowpan_sample")),
            auto_provision: auto,
            scan_timeout: Duration::from_secs(30),
        })
    }

    /// Mock with the status queries every controller path touches.
    fn mock_iface(provisioned: Option<NetworkIdentity>) -> MockLowpanInterface {
        let mut mock = MockLowpanInterface::new();
        mock.expect_name().return_const("wpan0".to_string());
        mock.expect_state().return_const(AttachmentState::Offline);
        mock.expect_role().return_const(InterfaceRole::Detached);
        mock.expect_is_enabled().return_const(true);
        mock.expect_provisioned_identity().return_const(provisioned);
        mock
    }

    fn attach(ctrl: &mut AttachmentController, mock: MockLowpanInterface) -> Uuid {
        let handle = InterfaceHandle::new(Arc::new(mock));
        let id = handle.id;
        ctrl.handle_driver_event(DriverEvent::InterfaceAdded(handle));
        id
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AttachmentEvent>) -> Vec<AttachmentEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn states(events: &[AttachmentEvent]) -> Vec<AttachmentState> {
        events
            .iter()
            .filter_map(|e| match e {
                AttachmentEvent::StateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    fn beacon(name: &str) -> Beacon {
        Beacon {
            identity: NetworkIdentity::named(name).with_panid(0xABCD).with_channel(15),
            beacon_address: vec![0x02, 0x11],
            rssi: -55,
            lqi: 180,
            flags: BeaconFlags(BeaconFlags::CAN_ASSIST),
        }
    }

    // ── Interface presence ────────────────────────────────────────────────────

    #[test]
    fn test_form_without_interface_fails_and_stays_offline() {
        let (mut ctrl, mut rx) = controller(AutoProvision::Form);

        let result = ctrl.form(target("x"));

        assert_eq!(result, Err(AttachmentError::NoInterface));
        assert_eq!(ctrl.state(), AttachmentState::Offline);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_interface_added_is_announced() {
        // Arrange
        let (mut ctrl, mut rx) = controller(AutoProvision::Form);

        // Act
        attach(&mut ctrl, mock_iface(None));

        // Assert
        let events = drain(&mut rx);
        assert!(events.contains(&AttachmentEvent::InterfaceChanged(Some("wpan0".into()))));
        assert!(events.contains(&AttachmentEvent::EnabledChanged(true)));
        assert_eq!(ctrl.interface_name().as_deref(), Some("wpan0"));
    }

    #[test]
    fn test_second_interface_and_its_events_are_ignored() {
        // Arrange
        let (mut ctrl, mut rx) = controller(AutoProvision::Form);
        attach(&mut ctrl, mock_iface(None));
        drain(&mut rx);

        let mut other = MockLowpanInterface::new();
        other.expect_name().return_const("wpan1".to_string());
        let other = InterfaceHandle::new(Arc::new(other));
        let other_id = other.id;

        // Act
        ctrl.handle_driver_event(DriverEvent::InterfaceAdded(other));
        ctrl.handle_driver_event(DriverEvent::StateChanged {
            interface: other_id,
            state: AttachmentState::Attached,
        });
        ctrl.handle_driver_event(DriverEvent::InterfaceRemoved(other_id));

        // Assert
        assert!(drain(&mut rx).is_empty());
        assert_eq!(ctrl.interface_name().as_deref(), Some("wpan0"));
        assert_eq!(ctrl.state(), AttachmentState::Offline);
    }

    #[test]
    fn test_interface_removal_forces_offline_and_discards_attempt() {
        // Arrange
        let (mut ctrl, mut rx) = controller(AutoProvision::Form);
        let mut mock = mock_iface(None);
        mock.expect_form().times(1).returning(|_| Ok(()));
        let id = attach(&mut ctrl, mock);
        assert_ok!(ctrl.form(target("demo")));
        drain(&mut rx);

        // Act
        ctrl.handle_driver_event(DriverEvent::InterfaceRemoved(id));

        // Assert
        let events = drain(&mut rx);
        assert_eq!(states(&events), vec![AttachmentState::Offline]);
        assert!(events.contains(&AttachmentEvent::InterfaceChanged(None)));
        assert!(!ctrl.is_busy());
        assert_eq!(ctrl.form(target("demo")), Err(AttachmentError::NoInterface));
    }

    #[test]
    fn test_interface_removal_finishes_running_scan_once() {
        let (mut ctrl, mut rx) = controller(AutoProvision::Form);
        let mut mock = mock_iface(None);
        mock.expect_start_scan().returning(|| Ok(()));
        let id = attach(&mut ctrl, mock);
        assert_ok!(ctrl.start_scan());
        drain(&mut rx);

        ctrl.handle_driver_event(DriverEvent::InterfaceRemoved(id));
        ctrl.handle_driver_event(DriverEvent::ScanFinished { interface: id });

        let finished = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, AttachmentEvent::ScanFinished(_)))
            .count();
        assert_eq!(finished, 1);
    }

    // ── Form / join ───────────────────────────────────────────────────────────

    #[test]
    fn test_form_then_attached() {
        // Arrange
        let (mut ctrl, mut rx) = controller(AutoProvision::Form);
        let mut mock = mock_iface(None);
        mock.expect_form()
            .withf(|p| p.identity.name == "demo")
            .times(1)
            .returning(|_| Ok(()));
        let id = attach(&mut ctrl, mock);
        let watcher = ctrl.subscribe_state();

        // Act
        assert_ok!(ctrl.form(target("demo")));
        let busy_while_attaching = ctrl.is_busy();
        ctrl.handle_driver_event(DriverEvent::StateChanged {
            interface: id,
            state: AttachmentState::Attached,
        });

        // Assert
        assert!(busy_while_attaching);
        assert!(!ctrl.is_busy());
        assert_eq!(
            states(&drain(&mut rx)),
            vec![AttachmentState::Attaching, AttachmentState::Attached]
        );
        assert_eq!(*watcher.borrow(), AttachmentState::Attached);
    }

    #[test]
    fn test_second_request_while_attaching_is_busy() {
        // Arrange
        let (mut ctrl, _rx) = controller(AutoProvision::Form);
        let mut mock = mock_iface(None);
        mock.expect_form().times(1).returning(|_| Ok(()));
        mock.expect_join().times(0);
        attach(&mut ctrl, mock);
        assert_ok!(ctrl.form(target("demo")));

        // Act
        let join = ctrl.join(target("demo"));
        let form = ctrl.form(target("demo"));

        // Assert: the first attempt is untouched
        assert_eq!(join, Err(AttachmentError::Busy));
        assert_eq!(form, Err(AttachmentError::Busy));
        assert_eq!(ctrl.state(), AttachmentState::Attaching);
        assert!(ctrl.is_busy());
    }

    #[test]
    fn test_driver_rejection_reports_error_and_fault() {
        // Arrange
        let (mut ctrl, mut rx) = controller(AutoProvision::Form);
        let mut mock = mock_iface(None);
        mock.expect_join()
            .returning(|_| Err(DriverError::Rejected("bad key".into())));
        attach(&mut ctrl, mock);
        drain(&mut rx);

        // Act
        let result = ctrl.join(target("demo"));

        // Assert
        assert_err!(&result);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, AttachmentEvent::ProvisioningError(d) if d.contains("bad key"))));
        assert_eq!(
            states(&events),
            vec![AttachmentState::Attaching, AttachmentState::Fault]
        );
        assert!(!ctrl.is_busy(), "a rejected attempt must not stay pending");
    }

    #[test]
    fn test_provision_errors_repeat_fault_every_time() {
        // Arrange
        let (mut ctrl, mut rx) = controller(AutoProvision::Form);
        let mut mock = mock_iface(None);
        mock.expect_form().returning(|_| Ok(()));
        let id = attach(&mut ctrl, mock);
        assert_ok!(ctrl.form(target("demo")));
        drain(&mut rx);

        // Act
        for _ in 0..2 {
            ctrl.handle_driver_event(DriverEvent::ProvisionError {
                interface: id,
                detail: "commissioning timeout".into(),
            });
        }

        // Assert
        let events = drain(&mut rx);
        assert_eq!(
            states(&events),
            vec![AttachmentState::Fault, AttachmentState::Fault]
        );
        assert!(events.contains(&AttachmentEvent::StateChanged {
            state: AttachmentState::Fault,
            detail: Some("commissioning timeout".into()),
        }));
    }

    #[test]
    fn test_provision_error_while_attached_keeps_state() {
        let (mut ctrl, mut rx) = controller(AutoProvision::Form);
        let id = attach(&mut ctrl, mock_iface(None));
        ctrl.handle_driver_event(DriverEvent::StateChanged {
            interface: id,
            state: AttachmentState::Attached,
        });
        drain(&mut rx);

        ctrl.handle_driver_event(DriverEvent::ProvisionError {
            interface: id,
            detail: "late".into(),
        });

        let events = drain(&mut rx);
        assert_eq!(events, vec![AttachmentEvent::ProvisioningError("late".into())]);
        assert_eq!(ctrl.state(), AttachmentState::Attached);
    }

    // ── ensure_interface_attached ─────────────────────────────────────────────

    #[test]
    fn test_ensure_is_noop_when_provisioned_on_target() {
        let (mut ctrl, _rx) = controller(AutoProvision::Form);
        let mut mock = mock_iface(Some(NetworkIdentity::named("lowpan_sample")));
        mock.expect_form().times(0);
        attach(&mut ctrl, mock);

        assert_eq!(
            ctrl.ensure_interface_attached(),
            Ok(EnsureOutcome::AlreadyProvisioned)
        );
    }

    #[test]
    fn test_ensure_twice_forms_once() {
        // Arrange
        let (mut ctrl, _rx) = controller(AutoProvision::Form);
        let mut mock = mock_iface(None);
        mock.expect_form()
            .withf(|p| p.identity.name == "lowpan_sample")
            .times(1)
            .returning(|_| Ok(()));
        attach(&mut ctrl, mock);

        // Act
        let first = ctrl.ensure_interface_attached();
        let second = ctrl.ensure_interface_attached();

        // Assert
        assert_eq!(first, Ok(EnsureOutcome::Forming));
        assert_eq!(second, Ok(EnsureOutcome::InFlight));
    }

    #[test]
    fn test_ensure_without_target_or_interface() {
        let (mut ctrl, _rx) = AttachmentController::new(ControllerConfig::default());
        assert_eq!(
            ctrl.ensure_interface_attached(),
            Err(AttachmentError::NoInterface)
        );
        attach(&mut ctrl, mock_iface(None));
        assert_eq!(ctrl.ensure_interface_attached(), Err(AttachmentError::NoTarget));
    }

    #[test]
    fn test_ensure_manual_without_target_is_manual() {
        // Arrange
        let (mut ctrl, mut rx) = AttachmentController::new(ControllerConfig {
            auto_provision: AutoProvision::Manual,
            ..ControllerConfig::default()
        });
        attach(&mut ctrl, mock_iface(None));
        drain(&mut rx);

        // Act
        let outcome = ctrl.ensure_interface_attached();

        // Assert
        assert_eq!(outcome, Ok(EnsureOutcome::Manual));
        assert_eq!(ctrl.state(), AttachmentState::Offline);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_ensure_manual_does_nothing() {
        let (mut ctrl, _rx) = controller(AutoProvision::Manual);
        let mut mock = mock_iface(None);
        mock.expect_form().times(0);
        attach(&mut ctrl, mock);

        assert_eq!(ctrl.ensure_interface_attached(), Ok(EnsureOutcome::Manual));
        assert_eq!(ctrl.state(), AttachmentState::Offline);
    }

    #[test]
    fn test_ensure_join_scans_then_joins_first_match() {
        // Arrange
        let (mut ctrl, mut rx) = controller(AutoProvision::Join);
        let mut mock = mock_iface(None);
        mock.expect_start_scan().times(1).returning(|| Ok(()));
        mock.expect_stop_scan().times(1).returning(|| Ok(()));
        mock.expect_join()
            .withf(|p| p.identity.name == "lowpan_sample" && p.identity.panid == Some(0xABCD))
            .times(1)
            .returning(|_| Ok(()));
        let id = attach(&mut ctrl, mock);
        drain(&mut rx);

        // Act
        assert_eq!(ctrl.ensure_interface_attached(), Ok(EnsureOutcome::Scanning));
        for name in ["elsewhere", "lowpan_sample", "lowpan_sample"] {
            ctrl.handle_driver_event(DriverEvent::BeaconFound {
                interface: id,
                beacon: beacon(name),
            });
        }
        ctrl.handle_driver_event(DriverEvent::ScanFinished { interface: id });

        // Assert
        let events = drain(&mut rx);
        let beacons = events
            .iter()
            .filter(|e| matches!(e, AttachmentEvent::BeaconFound(_)))
            .count();
        let finished: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                AttachmentEvent::ScanFinished(s) => Some(s.outcome),
                _ => None,
            })
            .collect();
        assert_eq!(beacons, 2);
        assert_eq!(finished, vec![ScanOutcome::Matched]);
        assert_eq!(states(&events), vec![AttachmentState::Attaching]);
    }

    // ── Leave / scan / enable ─────────────────────────────────────────────────

    #[test]
    fn test_leave_when_not_provisioned_is_a_warning_only() {
        let (mut ctrl, mut rx) = controller(AutoProvision::Form);
        let mut mock = mock_iface(None);
        mock.expect_leave().times(0);
        attach(&mut ctrl, mock);
        drain(&mut rx);

        assert_ok!(ctrl.leave());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_leave_goes_offline() {
        let (mut ctrl, mut rx) = controller(AutoProvision::Form);
        let mut mock = mock_iface(Some(NetworkIdentity::named("demo")));
        mock.expect_leave().times(1).returning(|| Ok(()));
        let id = attach(&mut ctrl, mock);
        ctrl.handle_driver_event(DriverEvent::StateChanged {
            interface: id,
            state: AttachmentState::Attached,
        });
        drain(&mut rx);

        assert_ok!(ctrl.leave());

        assert_eq!(states(&drain(&mut rx)), vec![AttachmentState::Offline]);
    }

    #[test]
    fn test_leave_failure_is_reported_not_returned() {
        let (mut ctrl, mut rx) = controller(AutoProvision::Form);
        let mut mock = mock_iface(Some(NetworkIdentity::named("demo")));
        mock.expect_leave()
            .returning(|| Err(DriverError::Unavailable("radio busy".into())));
        attach(&mut ctrl, mock);
        drain(&mut rx);

        assert_ok!(ctrl.leave());

        let events = drain(&mut rx);
        assert!(matches!(&events[..], [AttachmentEvent::ProvisioningError(d)] if d.contains("radio busy")));
    }

    #[test]
    fn test_survey_scan_delivers_beacons_and_blocks_form() {
        // Arrange
        let (mut ctrl, mut rx) = controller(AutoProvision::Form);
        let mut mock = mock_iface(None);
        mock.expect_start_scan().returning(|| Ok(()));
        mock.expect_stop_scan().times(1).returning(|| Ok(()));
        mock.expect_form().times(0);
        let id = attach(&mut ctrl, mock);
        drain(&mut rx);

        // Act
        assert_ok!(ctrl.start_scan());
        ctrl.handle_driver_event(DriverEvent::BeaconFound {
            interface: id,
            beacon: beacon("lowpan_sample"),
        });
        let busy = ctrl.form(target("demo"));
        let summary = ctrl.stop_scan();
        let again = ctrl.stop_scan();

        // Assert
        assert_eq!(busy, Err(AttachmentError::Busy));
        assert_eq!(summary.map(|s| s.outcome), Some(ScanOutcome::Survey));
        assert!(again.is_none());
        let events = drain(&mut rx);
        assert!(matches!(events[0], AttachmentEvent::BeaconFound(_)));
        assert!(matches!(events[1], AttachmentEvent::ScanFinished(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_deadline_stops_scan() {
        // Arrange
        let (mut ctrl, mut rx) = controller(AutoProvision::Form);
        let mut mock = mock_iface(None);
        mock.expect_start_scan().returning(|| Ok(()));
        mock.expect_stop_scan().times(1).returning(|| Ok(()));
        attach(&mut ctrl, mock);
        assert_ok!(ctrl.start_scan());
        drain(&mut rx);

        // Act
        let early = ctrl.on_scan_deadline();
        tokio::time::advance(Duration::from_secs(31)).await;
        let late = ctrl.on_scan_deadline();

        // Assert
        assert!(early.is_none());
        assert!(late.is_some());
        assert!(!ctrl.is_scanning());
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_set_enabled_is_announced() {
        let (mut ctrl, mut rx) = controller(AutoProvision::Form);
        let mut mock = mock_iface(None);
        mock.expect_set_enabled()
            .withf(|enabled| !*enabled)
            .times(1)
            .returning(|_| Ok(()));
        attach(&mut ctrl, mock);
        drain(&mut rx);

        assert_ok!(ctrl.set_enabled(false));

        assert_eq!(drain(&mut rx), vec![AttachmentEvent::EnabledChanged(false)]);
    }

    #[test]
    fn test_release_interface_ends_offline_and_is_idempotent() {
        // Arrange
        let (mut ctrl, mut rx) = controller(AutoProvision::Manual);
        let id = attach(&mut ctrl, mock_iface(None));
        ctrl.handle_driver_event(DriverEvent::StateChanged {
            interface: id,
            state: AttachmentState::Attached,
        });
        drain(&mut rx);

        // Act
        ctrl.release_interface();
        ctrl.release_interface();

        // Assert
        let events = drain(&mut rx);
        assert!(events.contains(&AttachmentEvent::InterfaceChanged(None)));
        assert_eq!(states(&events), vec![AttachmentState::Offline]);
        assert!(ctrl.interface_name().is_none());
    }
}
