//! Presenter contract and status snapshot.
//!
//! A presenter is whatever shows the node's state to a person: a status LED
//! board, a segment display, a desktop window, or just the log.  It receives
//! every controller and relay notification as a [`PresenterEvent`], in the
//! order each component produced them.
//!
//! - [`StatusBoard`] folds the events into a [`NodeStatus`] snapshot (what a
//!   status screen would show) and publishes it on a `watch` channel.
//! - [`LogPresenter`] writes each event to the log and keeps a board up to
//!   date; the command-line binary uses it.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use lowpan_core::{AttachmentState, Beacon, InterfaceRole, LinkState, ValueSample};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::application::attachment::AttachmentEvent;
use crate::application::scan::{ScanOutcome, ScanSummary};
use crate::infrastructure::link::LinkEvent;

/// Everything a presenter is told about.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenterEvent {
    Attachment(AttachmentEvent),
    Link(LinkEvent),
}

/// Consumer of node notifications.
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn present(&self, event: PresenterEvent);
}

/// What a status screen shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeStatus {
    pub interface: Option<String>,
    pub enabled: bool,
    pub attachment: AttachmentState,
    /// Detail of the last `Fault`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
    pub role: InterfaceRole,
    pub network_name: Option<String>,
    pub link: LinkState,
    pub peer: Option<SocketAddr>,
    pub last_value: Option<ValueSample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Every beacon reported so far.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub beacons: Vec<Beacon>,
    pub scans_completed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scan: Option<ScanSummary>,
}

impl NodeStatus {
    /// Folds one event into the snapshot.
    pub fn apply(&mut self, event: &PresenterEvent) {
        match event {
            PresenterEvent::Attachment(ev) => self.apply_attachment(ev),
            PresenterEvent::Link(ev) => self.apply_link(ev),
        }
    }

    fn apply_attachment(&mut self, event: &AttachmentEvent) {
        match event {
            AttachmentEvent::StateChanged { state, detail } => {
                self.attachment = *state;
                self.fault = if *state == AttachmentState::Fault {
                    detail.clone()
                } else {
                    None
                };
                if *state == AttachmentState::Offline {
                    self.network_name = None;
                }
            }
            AttachmentEvent::RoleChanged(role) => self.role = *role,
            AttachmentEvent::IdentityChanged(identity) => {
                self.network_name = Some(identity.name.clone())
            }
            AttachmentEvent::ProvisioningError(detail) => self.last_error = Some(detail.clone()),
            AttachmentEvent::InterfaceChanged(name) => {
                self.interface = name.clone();
                if name.is_none() {
                    self.enabled = false;
                }
            }
            AttachmentEvent::EnabledChanged(enabled) => self.enabled = *enabled,
            AttachmentEvent::BeaconFound(beacon) => self.beacons.push(beacon.clone()),
            AttachmentEvent::ScanFinished(summary) => {
                self.scans_completed += 1;
                self.last_scan = Some(summary.clone());
            }
        }
    }

    fn apply_link(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::StateChanged(state) => {
                self.link = *state;
                if !state.is_connected() {
                    self.peer = None;
                }
            }
            LinkEvent::ValueReceived(value) => self.last_value = Some(*value),
            LinkEvent::PeerConnected(peer) => self.peer = Some(*peer),
            LinkEvent::Error(message) => self.last_error = Some(message.clone()),
        }
    }

    /// One-line summary, e.g. `"wpan0 attached (leader) on lowpan_sample; link: Connected"`.
    pub fn summary(&self) -> String {
        let iface = self.interface.as_deref().unwrap_or("no interface");
        let network = self.network_name.as_deref().unwrap_or("-");
        format!(
            "{iface} {} ({}) on {network}; link: {}",
            self.attachment,
            self.role,
            self.link.status_text()
        )
    }
}

/// Presenter that maintains a [`NodeStatus`] snapshot.
pub struct StatusBoard {
    status: watch::Sender<NodeStatus>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (status, _) = watch::channel(NodeStatus::default());
        Self { status }
    }

    /// A copy of the current snapshot.
    pub fn snapshot(&self) -> NodeStatus {
        self.status.borrow().clone()
    }

    /// A receiver notified on every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<NodeStatus> {
        self.status.subscribe()
    }
}

#[async_trait]
impl Presenter for StatusBoard {
    async fn present(&self, event: PresenterEvent) {
        self.status.send_modify(|status| status.apply(&event));
    }
}

/// Presenter that logs every event and keeps a [`StatusBoard`] current.
pub struct LogPresenter {
    board: Arc<StatusBoard>,
}

impl LogPresenter {
    pub fn new(board: Arc<StatusBoard>) -> Self {
        Self { board }
    }
}

#[async_trait]
impl Presenter for LogPresenter {
    async fn present(&self, event: PresenterEvent) {
        match &event {
            PresenterEvent::Attachment(AttachmentEvent::StateChanged { state, detail }) => {
                match detail {
                    Some(detail) => warn!("network: {state} ({detail})"),
                    None => info!("network: {state}"),
                }
            }
            PresenterEvent::Attachment(AttachmentEvent::BeaconFound(beacon)) => {
                info!(
                    "beacon: {beacon} quality={}",
                    beacon.signal_quality()
                );
            }
            PresenterEvent::Attachment(AttachmentEvent::ScanFinished(summary)) => {
                let outcome = match summary.outcome {
                    ScanOutcome::Survey => "survey complete",
                    ScanOutcome::Matched => "target found",
                    ScanOutcome::NoMatch => "target not found",
                };
                info!("scan finished: {} beacon(s), {outcome}", summary.beacons);
            }
            PresenterEvent::Attachment(AttachmentEvent::ProvisioningError(detail)) => {
                warn!("provisioning error: {detail}");
            }
            PresenterEvent::Link(LinkEvent::StateChanged(state)) => {
                info!("link: {}", state.status_text());
            }
            PresenterEvent::Link(LinkEvent::ValueReceived(value)) => info!("value: {value}"),
            PresenterEvent::Link(LinkEvent::Error(message)) => warn!("link error: {message}"),
            other => debug!("{other:?}"),
        }
        self.board.present(event).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lowpan_core::NetworkIdentity;

    fn att(ev: AttachmentEvent) -> PresenterEvent {
        PresenterEvent::Attachment(ev)
    }

    #[test]
    fn test_status_tracks_attachment_and_identity() {
        // Arrange
        let mut status = NodeStatus::default();

        // Act
        status.apply(&att(AttachmentEvent::InterfaceChanged(Some("wpan0".into()))));
        status.apply(&att(AttachmentEvent::EnabledChanged(true)));
        status.apply(&att(AttachmentEvent::IdentityChanged(NetworkIdentity::named(
            "lowpan_sample",
        ))));
        status.apply(&att(AttachmentEvent::RoleChanged(InterfaceRole::Leader)));
        status.apply(&att(AttachmentEvent::StateChanged {
            state: AttachmentState::Attached,
            detail: None,
        }));

        // Assert
        assert_eq!(
            status.summary(),
            "wpan0 attached (leader) on lowpan_sample; link: No network"
        );
        assert!(status.enabled);
    }

    #[test]
    fn test_fault_detail_cleared_on_next_state() {
        let mut status = NodeStatus::default();
        status.apply(&att(AttachmentEvent::StateChanged {
            state: AttachmentState::Fault,
            detail: Some("bad key".into()),
        }));
        assert_eq!(status.fault.as_deref(), Some("bad key"));

        status.apply(&att(AttachmentEvent::StateChanged {
            state: AttachmentState::Offline,
            detail: None,
        }));
        assert!(status.fault.is_none());
    }

    #[test]
    fn test_status_tracks_link_and_values() {
        let mut status = NodeStatus::default();
        let peer: SocketAddr = "[::1]:23456".parse().unwrap();

        status.apply(&PresenterEvent::Link(LinkEvent::PeerConnected(peer)));
        status.apply(&PresenterEvent::Link(LinkEvent::StateChanged(LinkState::Connected)));
        status.apply(&PresenterEvent::Link(LinkEvent::ValueReceived(ValueSample(42))));
        assert_eq!(status.peer, Some(peer));
        assert_eq!(status.last_value, Some(ValueSample(42)));

        status.apply(&PresenterEvent::Link(LinkEvent::StateChanged(LinkState::Lost)));
        assert!(status.peer.is_none());
        assert_eq!(status.link.status_text(), "Connection lost");
    }

    #[test]
    fn test_interface_removal_clears_enabled() {
        let mut status = NodeStatus::default();
        status.apply(&att(AttachmentEvent::EnabledChanged(true)));
        status.apply(&att(AttachmentEvent::InterfaceChanged(None)));
        assert!(!status.enabled);
        assert!(status.interface.is_none());
    }

    #[tokio::test]
    async fn test_board_publishes_snapshots() {
        // Arrange
        let board = StatusBoard::new();
        let mut rx = board.subscribe();

        // Act
        board
            .present(att(AttachmentEvent::ScanFinished(ScanSummary {
                beacons: 0,
                outcome: ScanOutcome::Survey,
            })))
            .await;

        // Assert
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().scans_completed, 1);
        assert_eq!(
            board.snapshot().last_scan.map(|s| s.outcome),
            Some(ScanOutcome::Survey)
        );
        assert_eq!(board.snapshot().scans_completed, 1);
    }

    #[tokio::test]
    async fn test_log_presenter_updates_board() {
        let board = Arc::new(StatusBoard::new());
        let presenter = LogPresenter::new(Arc::clone(&board));

        presenter
            .present(PresenterEvent::Link(LinkEvent::ValueReceived(ValueSample(7))))
            .await;

        assert_eq!(board.snapshot().last_value, Some(ValueSample(7)));
    }

    #[test]
    fn test_status_serializes_to_json() {
        let status = NodeStatus::default();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["attachment"], "offline");
        assert_eq!(json["link"], "no-transport");
        assert!(json.get("fault").is_none());
    }
}
