//! Node runtime: wires the driver, the attachment controller, the link relay
//! and a presenter together.
//!
//! # How it fits together (for beginners)
//!
//! [`Node::start`] spawns one *pump* task.  The pump owns the
//! [`AttachmentController`] and processes, one at a time and in order:
//!
//! - driver notifications (interface added/removed, state, identity, beacons),
//! - commands sent by [`Node`] methods (form, join, scan, ...), each answered
//!   on a `oneshot` reply channel,
//! - controller and relay events, which it forwards to the [`Presenter`],
//! - the scan deadline.
//!
//! The pump also ties the two state machines together: when the interface
//! reaches `Attached` the relay's transport comes up (a receiver starts
//! listening, a transmitter dials its server); when it leaves `Attached` the
//! transport goes away and any live connection is closed.
//!
//! The [`LinkRelay`] itself is shared: [`Node::send`] writes values directly
//! through it without going through the pump.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use lowpan_core::{
    generate_network_name, AttachmentState, Credential, JoinPolicy, LinkState, NetworkIdentity,
    ProvisioningParams, ValueSample, DEFAULT_LINK_PORT,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::attachment::{
    AttachmentController, AttachmentError, AttachmentEvent, AutoProvision, ControllerConfig,
    EnsureOutcome,
};
use crate::application::interface::{DriverError, DriverEvent, LowpanManager};
use crate::application::scan::{ScanOutcome, ScanSummary};
use crate::infrastructure::link::{LinkConfig, LinkError, LinkEvent, LinkRelay};
use crate::infrastructure::presenter::{Presenter, PresenterEvent};
use crate::infrastructure::storage::config::{AppConfig, ConfigError};

// ── Roles and options ─────────────────────────────────────────────────────────

/// What the node does once its interface is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Accepts one link connection at a time and reports received values.
    Receiver,
    /// Dials the configured server and sends values.
    Transmitter,
    /// Only surveys (and optionally joins) networks; no link.
    Scanner,
}

/// Settings for [`Node::start`].
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub role: NodeRole,
    pub controller: ControllerConfig,
    pub link: LinkConfig,
    /// Port the receiver listens on and the transmitter dials.
    pub port: u16,
    /// Host the transmitter dials.
    pub server_address: Option<String>,
    /// Transmitter: dial automatically once attached.
    pub auto_connect: bool,
    /// Form the target network when a join scan does not find it.
    pub form_if_absent: bool,
}

impl NodeOptions {
    /// Options with no target network and the default link settings.
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            controller: ControllerConfig::default(),
            link: LinkConfig::default(),
            port: DEFAULT_LINK_PORT,
            server_address: None,
            auto_connect: true,
            form_if_absent: false,
        }
    }

    /// Builds options from the loaded configuration.
    ///
    /// The scanner never provisions on its own, whatever the file says.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidBindAddress`] if the link bind address is bad.
    pub fn from_config(config: &AppConfig, role: NodeRole) -> Result<Self, ConfigError> {
        let mut controller = config.controller_config();
        if role == NodeRole::Scanner {
            controller.auto_provision = AutoProvision::Manual;
        }
        let server_address = match role {
            NodeRole::Transmitter => Some(config.link.server_address.trim().to_string()),
            _ => None,
        };
        Ok(Self {
            role,
            controller,
            link: config.link_config()?,
            port: config.link.port,
            server_address,
            auto_connect: config.node.auto_connect,
            form_if_absent: config.node.form_if_absent,
        })
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("cannot subscribe to driver notifications: {0}")]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("no server address configured")]
    NoServerAddress,

    #[error("the node runtime has stopped")]
    Stopped,
}

// ── Commands ──────────────────────────────────────────────────────────────────

type Reply<T> = oneshot::Sender<Result<T, AttachmentError>>;

enum NodeCommand {
    Ensure(Reply<EnsureOutcome>),
    Form(ProvisioningParams, Reply<()>),
    Join(ProvisioningParams, Reply<()>),
    ScanAndJoin(JoinPolicy, Credential, Reply<()>),
    Leave(Reply<()>),
    StartScan(Reply<()>),
    StopScan(oneshot::Sender<Option<ScanSummary>>),
    SetEnabled(bool, Reply<()>),
    Shutdown(oneshot::Sender<()>),
}

// ── Node handle ───────────────────────────────────────────────────────────────

/// Handle to a running node.
///
/// Dropping the handle without calling [`Node::shutdown`] still stops the
/// pump (its command channel closes) and runs the same shutdown sequence.
pub struct Node {
    role: NodeRole,
    port: u16,
    server_address: Option<String>,
    commands: mpsc::UnboundedSender<NodeCommand>,
    attachment: watch::Receiver<AttachmentState>,
    relay: LinkRelay,
    last_sent: AtomicU8,
    pump: JoinHandle<()>,
}

impl Node {
    /// Subscribes to `manager`, adopts its current interface (if any) and
    /// spawns the pump task.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`NodeError::Driver`] if the driver refuses the subscription.
    pub fn start(
        manager: Arc<dyn LowpanManager>,
        options: NodeOptions,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self, NodeError> {
        let subscription = manager.register_callback()?;
        let (controller, attachment_events) = AttachmentController::new(options.controller.clone());
        let (relay, link_events) = LinkRelay::new(options.link.clone());
        let attachment = controller.subscribe_state();
        let (commands, command_rx) = mpsc::unbounded_channel();

        let mut pump = Pump {
            role: options.role,
            port: options.port,
            server_address: options.server_address.clone(),
            auto_connect: options.auto_connect,
            form_if_absent: options.form_if_absent,
            controller,
            manager: Arc::clone(&manager),
            subscription: subscription.id,
            relay: relay.clone(),
            presenter,
            attached: false,
            connecting: None,
        };
        if let Some(handle) = manager.interface() {
            pump.on_driver_event(DriverEvent::InterfaceAdded(handle));
        }

        info!("node started as {:?}", options.role);
        let task = tokio::spawn(pump.run(
            subscription.events,
            command_rx,
            attachment_events,
            link_events,
        ));

        Ok(Self {
            role: options.role,
            port: options.port,
            server_address: options.server_address,
            commands,
            attachment,
            relay,
            last_sent: AtomicU8::new(ValueSample::MIN.get()),
            pump: task,
        })
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn attachment_state(&self) -> AttachmentState {
        *self.attachment.borrow()
    }

    pub fn subscribe_attachment(&self) -> watch::Receiver<AttachmentState> {
        self.attachment.clone()
    }

    pub fn link_state(&self) -> LinkState {
        self.relay.state()
    }

    pub fn subscribe_link(&self) -> watch::Receiver<LinkState> {
        self.relay.subscribe_state()
    }

    /// The shared link relay.
    pub fn relay(&self) -> &LinkRelay {
        &self.relay
    }

    /// Waits until the interface is `Attached`.
    ///
    /// # Errors
    ///
    /// [`NodeError::Stopped`] if the pump exits first.
    pub async fn wait_until_attached(&self) -> Result<(), NodeError> {
        let mut rx = self.attachment.clone();
        rx.wait_for(AttachmentState::is_attached)
            .await
            .map(|_| ())
            .map_err(|_| NodeError::Stopped)
    }

    // ── Provisioning ──────────────────────────────────────────────────────────

    /// Provisions the configured target network if nothing is provisioned.
    pub async fn ensure_attached(&self) -> Result<EnsureOutcome, NodeError> {
        Ok(self.request(NodeCommand::Ensure).await??)
    }

    pub async fn form(&self, params: ProvisioningParams) -> Result<(), NodeError> {
        Ok(self.request(|tx| NodeCommand::Form(params, tx)).await??)
    }

    /// Forms a fresh network with a generated `LoWPAN_<n>` name.
    ///
    /// Returns the identity that was requested.
    pub async fn form_new_network(
        &self,
        credential: Credential,
    ) -> Result<NetworkIdentity, NodeError> {
        let identity = NetworkIdentity::named(generate_network_name());
        info!("forming new network '{}'", identity.name);
        self.form(ProvisioningParams::new(identity.clone(), credential))
            .await?;
        Ok(identity)
    }

    pub async fn join(&self, params: ProvisioningParams) -> Result<(), NodeError> {
        Ok(self.request(|tx| NodeCommand::Join(params, tx)).await??)
    }

    /// Scans for `network_name` and joins the first matching beacon.
    pub async fn scan_and_join(
        &self,
        network_name: &str,
        credential: Credential,
    ) -> Result<(), NodeError> {
        let policy = JoinPolicy::new(network_name);
        Ok(self
            .request(|tx| NodeCommand::ScanAndJoin(policy, credential, tx))
            .await??)
    }

    pub async fn leave(&self) -> Result<(), NodeError> {
        Ok(self.request(NodeCommand::Leave).await??)
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<(), NodeError> {
        Ok(self
            .request(|tx| NodeCommand::SetEnabled(enabled, tx))
            .await??)
    }

    // ── Scanning ──────────────────────────────────────────────────────────────

    /// Starts a survey scan; results arrive at the presenter.
    pub async fn start_scan(&self) -> Result<(), NodeError> {
        Ok(self.request(NodeCommand::StartScan).await??)
    }

    /// Stops the scan in progress.  `None` if nothing was scanning.
    pub async fn stop_scan(&self) -> Result<Option<ScanSummary>, NodeError> {
        self.request(NodeCommand::StopScan).await
    }

    // ── Link ──────────────────────────────────────────────────────────────────

    /// Dials the configured server.
    ///
    /// # Errors
    ///
    /// [`NodeError::NoServerAddress`] when no server is configured, otherwise
    /// whatever [`LinkRelay::connect`] reports.
    pub async fn connect(&self) -> Result<SocketAddr, NodeError> {
        let host = self
            .server_address
            .as_deref()
            .filter(|host| !host.is_empty())
            .ok_or(NodeError::NoServerAddress)?;
        Ok(self.relay.connect(host, self.port).await?)
    }

    /// Sends one value.  Returns `false` if it was dropped for lack of a
    /// connection.  The value becomes the base for [`Node::increment`] and
    /// [`Node::decrement`] either way.
    pub async fn send(&self, value: ValueSample) -> Result<bool, NodeError> {
        self.last_sent.store(value.get(), Ordering::Relaxed);
        Ok(self.relay.send(value).await?)
    }

    /// The last value passed to [`Node::send`].
    pub fn last_sent(&self) -> ValueSample {
        ValueSample(self.last_sent.load(Ordering::Relaxed))
    }

    /// Sends the last value plus one, saturating at 255.
    pub async fn increment(&self) -> Result<ValueSample, NodeError> {
        let next = self.last_sent().increment();
        self.send(next).await?;
        Ok(next)
    }

    /// Sends the last value minus one, saturating at 0.
    pub async fn decrement(&self) -> Result<ValueSample, NodeError> {
        let next = self.last_sent().decrement();
        self.send(next).await?;
        Ok(next)
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Stops the scan, closes the link, stops listening, unsubscribes from
    /// the driver and releases the interface, in that order.  Events produced
    /// along the way still reach the presenter.
    pub async fn shutdown(self) -> Result<(), NodeError> {
        let (done, finished) = oneshot::channel();
        if self.commands.send(NodeCommand::Shutdown(done)).is_ok() {
            let _ = finished.await;
        }
        self.pump.await.map_err(|e| {
            error!("node pump task failed: {e}");
            NodeError::Stopped
        })
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> NodeCommand,
    ) -> Result<T, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| NodeError::Stopped)?;
        rx.await.map_err(|_| NodeError::Stopped)
    }
}

// ── Pump task ─────────────────────────────────────────────────────────────────

struct Pump {
    role: NodeRole,
    port: u16,
    server_address: Option<String>,
    auto_connect: bool,
    form_if_absent: bool,
    controller: AttachmentController,
    manager: Arc<dyn LowpanManager>,
    subscription: Uuid,
    relay: LinkRelay,
    presenter: Arc<dyn Presenter>,
    /// Whether the relay transport is currently up.
    attached: bool,
    /// Automatic dial started when the interface attached.
    connecting: Option<JoinHandle<()>>,
}

impl Pump {
    async fn run(
        mut self,
        mut driver: mpsc::UnboundedReceiver<DriverEvent>,
        mut commands: mpsc::UnboundedReceiver<NodeCommand>,
        mut attachment_events: mpsc::UnboundedReceiver<AttachmentEvent>,
        mut link_events: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        loop {
            let deadline = self.controller.scan_deadline();
            tokio::select! {
                // Controller and relay output first, so the presenter has seen
                // the effects of one driver event before the next is applied.
                biased;

                Some(event) = attachment_events.recv() => self.on_attachment_event(event).await,
                Some(event) = link_events.recv() => {
                    self.presenter.present(PresenterEvent::Link(event)).await;
                }
                Some(event) = driver.recv() => self.on_driver_event(event),
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)),
                    if deadline.is_some() =>
                {
                    if let Some(summary) = self.controller.on_scan_deadline() {
                        debug!("scan deadline reached after {} beacon(s)", summary.beacons);
                    }
                }
                command = commands.recv() => match command {
                    Some(NodeCommand::Shutdown(done)) => {
                        self.shutdown().await;
                        self.flush(&mut attachment_events, &mut link_events).await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("node handle dropped");
                        self.shutdown().await;
                        self.flush(&mut attachment_events, &mut link_events).await;
                        break;
                    }
                },
            }
        }
        debug!("node pump exiting");
    }

    fn on_driver_event(&mut self, event: DriverEvent) {
        let added = matches!(event, DriverEvent::InterfaceAdded(_));
        self.controller.handle_driver_event(event);
        if added && self.controller.interface_name().is_some() {
            self.auto_provision();
        }
    }

    fn auto_provision(&mut self) {
        match self.controller.ensure_interface_attached() {
            Ok(outcome) => debug!("ensure attached: {outcome:?}"),
            Err(AttachmentError::NoTarget) => {
                debug!("no target network configured; waiting for commands")
            }
            Err(e) => warn!("automatic provisioning failed: {e}"),
        }
    }

    fn on_command(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::Ensure(reply) => {
                let _ = reply.send(self.controller.ensure_interface_attached());
            }
            NodeCommand::Form(params, reply) => {
                let _ = reply.send(self.controller.form(params));
            }
            NodeCommand::Join(params, reply) => {
                let _ = reply.send(self.controller.join(params));
            }
            NodeCommand::ScanAndJoin(policy, credential, reply) => {
                let _ = reply.send(self.controller.scan_and_join(policy, credential));
            }
            NodeCommand::Leave(reply) => {
                let _ = reply.send(self.controller.leave());
            }
            NodeCommand::StartScan(reply) => {
                let _ = reply.send(self.controller.start_scan());
            }
            NodeCommand::StopScan(reply) => {
                let _ = reply.send(self.controller.stop_scan());
            }
            NodeCommand::SetEnabled(enabled, reply) => {
                let _ = reply.send(self.controller.set_enabled(enabled));
            }
            // Handled by the pump loop.
            NodeCommand::Shutdown(_) => {}
        }
    }

    async fn on_attachment_event(&mut self, event: AttachmentEvent) {
        let state = match &event {
            AttachmentEvent::StateChanged { state, .. } => Some(*state),
            _ => None,
        };
        let form_target = matches!(
            &event,
            AttachmentEvent::ScanFinished(summary)
                if summary.outcome == ScanOutcome::NoMatch && self.form_if_absent
        );

        self.presenter
            .present(PresenterEvent::Attachment(event))
            .await;

        if let Some(state) = state {
            self.on_attachment_state(state).await;
        }
        if form_target {
            info!("target network not found; forming it");
            if let Err(e) = self.controller.form_target() {
                warn!("cannot form target network: {e}");
            }
        }
    }

    async fn on_attachment_state(&mut self, state: AttachmentState) {
        if state.is_attached() && !self.attached {
            self.attached = true;
            self.relay.transport_available();
            match self.role {
                NodeRole::Receiver => {
                    if let Err(e) = self.relay.listen(self.port).await {
                        error!("cannot accept link connections: {e}");
                    }
                }
                NodeRole::Transmitter if self.auto_connect => self.spawn_connect(),
                _ => {}
            }
        } else if !state.is_attached() && self.attached {
            self.attached = false;
            self.relay.transport_lost().await;
        }
    }

    fn spawn_connect(&mut self) {
        let Some(host) = self.server_address.clone().filter(|h| !h.is_empty()) else {
            warn!("no server address configured; not connecting");
            return;
        };
        if let Some(previous) = self.connecting.take() {
            debug!("abandoning previous automatic connect");
            previous.abort();
        }
        let relay = self.relay.clone();
        let port = self.port;
        self.connecting = Some(tokio::spawn(async move {
            if let Err(e) = relay.connect(&host, port).await {
                warn!("automatic connect failed: {e}");
            }
        }));
    }

    async fn shutdown(&mut self) {
        info!("shutting down node");
        if let Some(summary) = self.controller.stop_scan() {
            debug!("scan stopped with {} beacon(s)", summary.beacons);
        }
        if let Some(connecting) = self.connecting.take() {
            let _ = connecting.await;
        }
        self.relay.disconnect().await;
        self.relay.stop_listening().await;
        self.manager.unregister_callback(self.subscription);
        self.controller.release_interface();
    }

    /// Hands events still queued after shutdown to the presenter.
    async fn flush(
        &self,
        attachment_events: &mut mpsc::UnboundedReceiver<AttachmentEvent>,
        link_events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        while let Ok(event) = attachment_events.try_recv() {
            self.presenter
                .present(PresenterEvent::Attachment(event))
                .await;
        }
        while let Ok(event) = link_events.try_recv() {
            self.presenter.present(PresenterEvent::Link(event)).await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::driver::SimulatedManager;
    use crate::infrastructure::presenter::StatusBoard;
    use std::time::Duration;
    use tokio::time::timeout;

    fn credential() -> Credential {
        Credential::from_bytes(vec![0x11; 16]).unwrap()
    }

    fn target(name: &str) -> ProvisioningParams {
        ProvisioningParams::new(NetworkIdentity::named(name), credential())
    }

    fn scanner_options() -> NodeOptions {
        let mut options = NodeOptions::new(NodeRole::Scanner);
        options.controller.auto_provision = AutoProvision::Manual;
        options
    }

    async fn settle<T: Clone>(
        rx: &mut watch::Receiver<T>,
        pred: impl FnMut(&T) -> bool,
    ) -> T {
        timeout(Duration::from_secs(5), rx.wait_for(pred))
            .await
            .expect("timed out")
            .expect("sender dropped")
            .clone()
    }

    #[tokio::test]
    async fn test_auto_provision_forms_target_on_start() {
        // Arrange
        let manager = Arc::new(SimulatedManager::new());
        manager.add_interface("wpan0");
        let board = Arc::new(StatusBoard::new());
        let mut options = NodeOptions::new(NodeRole::Scanner);
        options.controller.target = Some(target("lowpan_sample"));
        options.controller.auto_provision = AutoProvision::Form;

        // Act
        let node = Node::start(manager.clone(), options, board.clone()).unwrap();
        timeout(Duration::from_secs(5), node.wait_until_attached())
            .await
            .unwrap()
            .unwrap();

        // Assert
        let mut status = board.subscribe();
        let snapshot = settle(&mut status, |s| s.network_name.is_some()).await;
        assert_eq!(snapshot.network_name.as_deref(), Some("lowpan_sample"));
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_node_waits_for_commands() {
        let manager = Arc::new(SimulatedManager::new());
        manager.add_interface("wpan0");
        let board = Arc::new(StatusBoard::new());

        let node = Node::start(manager.clone(), scanner_options(), board).unwrap();
        let outcome = node.ensure_attached().await.unwrap();

        assert_eq!(outcome, EnsureOutcome::Manual);
        assert_eq!(node.attachment_state(), AttachmentState::Offline);
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_form_command_attaches_and_brings_transport_up() {
        // Arrange
        let manager = Arc::new(SimulatedManager::new());
        manager.add_interface("wpan0");
        let node = Node::start(
            manager.clone(),
            scanner_options(),
            Arc::new(StatusBoard::new()),
        )
        .unwrap();
        let mut link = node.subscribe_link();

        // Act
        node.form(target("formed")).await.unwrap();
        node.wait_until_attached().await.unwrap();

        // Assert
        let state = settle(&mut link, |s| *s == LinkState::Idle).await;
        assert_eq!(state, LinkState::Idle);
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_form_new_network_uses_generated_name() {
        let manager = Arc::new(SimulatedManager::new());
        manager.add_interface("wpan0");
        let board = Arc::new(StatusBoard::new());
        let node = Node::start(manager.clone(), scanner_options(), board.clone()).unwrap();

        let identity = node.form_new_network(credential()).await.unwrap();
        node.wait_until_attached().await.unwrap();

        assert!(identity.name.starts_with("LoWPAN_"));
        let mut status = board.subscribe();
        let snapshot = settle(&mut status, |s| s.network_name.is_some()).await;
        assert_eq!(snapshot.network_name, Some(identity.name));
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_commands_without_interface_report_no_interface() {
        let manager = Arc::new(SimulatedManager::new());
        let node = Node::start(
            manager.clone(),
            scanner_options(),
            Arc::new(StatusBoard::new()),
        )
        .unwrap();

        let err = node.start_scan().await.unwrap_err();

        assert!(matches!(
            err,
            NodeError::Attachment(AttachmentError::Scan(_)) | NodeError::Attachment(AttachmentError::NoInterface)
        ));
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_without_connection_is_dropped_but_steps_value() {
        // Arrange
        let manager = Arc::new(SimulatedManager::new());
        let node = Node::start(
            manager.clone(),
            NodeOptions::new(NodeRole::Transmitter),
            Arc::new(StatusBoard::new()),
        )
        .unwrap();

        // Act
        let sent = node.send(ValueSample(254)).await.unwrap();
        let up = node.increment().await.unwrap();
        let capped = node.increment().await.unwrap();
        let down = node.decrement().await.unwrap();

        // Assert
        assert!(!sent);
        assert_eq!(up, ValueSample(255));
        assert_eq!(capped, ValueSample(255));
        assert_eq!(down, ValueSample(254));
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_without_server_address_fails() {
        let manager = Arc::new(SimulatedManager::new());
        let node = Node::start(
            manager.clone(),
            NodeOptions::new(NodeRole::Transmitter),
            Arc::new(StatusBoard::new()),
        )
        .unwrap();

        let err = node.connect().await.unwrap_err();

        assert!(matches!(err, NodeError::NoServerAddress));
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_unsubscribes_and_releases_interface() {
        // Arrange
        let manager = Arc::new(SimulatedManager::new());
        manager.add_interface("wpan0");
        let board = Arc::new(StatusBoard::new());
        let node = Node::start(manager.clone(), scanner_options(), board.clone()).unwrap();
        assert_eq!(manager.subscriber_count(), 1);

        // Act
        node.shutdown().await.unwrap();

        // Assert
        assert_eq!(manager.subscriber_count(), 0);
        let snapshot = board.snapshot();
        assert!(snapshot.interface.is_none());
        assert_eq!(snapshot.attachment, AttachmentState::Offline);
    }

    #[test]
    fn test_options_from_config_forces_manual_for_scanner() {
        let mut config = AppConfig::default();
        config.node.auto_provision = AutoProvision::Form;

        let options = NodeOptions::from_config(&config, NodeRole::Scanner).unwrap();

        assert_eq!(options.controller.auto_provision, AutoProvision::Manual);
        assert!(options.server_address.is_none());
        assert_eq!(options.port, DEFAULT_LINK_PORT);
    }

    #[tokio::test]
    async fn test_reconnect_abandons_previous_dial() {
        // Arrange: a pump whose earlier dial is still in flight
        let manager = Arc::new(SimulatedManager::new());
        let (controller, _attachment_events) =
            AttachmentController::new(ControllerConfig::default());
        let (relay, _link_events) = LinkRelay::new(LinkConfig::default());
        let mut pump = Pump {
            role: NodeRole::Transmitter,
            port: DEFAULT_LINK_PORT,
            server_address: Some("127.0.0.1".into()),
            auto_connect: true,
            form_if_absent: false,
            controller,
            manager,
            subscription: Uuid::new_v4(),
            relay,
            presenter: Arc::new(StatusBoard::new()),
            attached: false,
            connecting: None,
        };
        let (alive, gone) = oneshot::channel::<()>();
        pump.connecting = Some(tokio::spawn(async move {
            let _alive = alive;
            std::future::pending::<()>().await
        }));

        // Act
        pump.spawn_connect();

        // Assert: the earlier task was dropped, not left detached
        let previous = timeout(Duration::from_secs(5), gone)
            .await
            .expect("previous dial kept running");
        assert!(previous.is_err());
        let current = pump.connecting.take().expect("no new dial");
        timeout(Duration::from_secs(5), current).await.unwrap().unwrap();
    }
}
