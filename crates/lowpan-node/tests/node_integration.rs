//! Receiver and transmitter nodes talking over loopback, each on its own
//! simulated radio.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use lowpan_core::{
    AttachmentState, Credential, LinkState, NetworkIdentity, ProvisioningParams, ValueSample,
};
use lowpan_node::application::attachment::AutoProvision;
use lowpan_node::infrastructure::driver::SimulatedManager;
use lowpan_node::infrastructure::link::LinkConfig;
use lowpan_node::infrastructure::presenter::{NodeStatus, StatusBoard};
use lowpan_node::node::{Node, NodeOptions, NodeRole};
use tokio::sync::watch;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn options(role: NodeRole, port: u16) -> NodeOptions {
    let mut options = NodeOptions::new(role);
    options.controller.target = Some(ProvisioningParams::new(
        NetworkIdentity::named("lowpan_sample"),
        Credential::from_bytes(vec![0x5a; 16]).unwrap(),
    ));
    options.controller.auto_provision = AutoProvision::Form;
    options.link = LinkConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        connect_timeout: Duration::from_secs(2),
    };
    options.port = port;
    options
}

fn simulated() -> Arc<SimulatedManager> {
    let manager = Arc::new(SimulatedManager::new());
    manager.add_interface("wpan0");
    manager
}

async fn wait_link(node: &Node, state: LinkState) {
    let mut rx = node.subscribe_link();
    timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("link never reached {state:?}"))
        .expect("relay dropped");
}

async fn wait_status(
    rx: &mut watch::Receiver<NodeStatus>,
    done: impl FnMut(&NodeStatus) -> bool,
) -> NodeStatus {
    timeout(WAIT, rx.wait_for(done))
        .await
        .expect("status never matched")
        .expect("board dropped")
        .clone()
}

async fn listening_addr(node: &Node) -> SocketAddr {
    timeout(WAIT, async {
        loop {
            if let Some(addr) = node.relay().local_addr().await {
                return addr;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("receiver never listened")
}

/// A receiver node and the address it accepts on.
async fn start_receiver() -> (Node, Arc<StatusBoard>, SocketAddr) {
    let board = Arc::new(StatusBoard::new());
    let node = Node::start(simulated(), options(NodeRole::Receiver, 0), board.clone()).unwrap();
    timeout(WAIT, node.wait_until_attached())
        .await
        .expect("receiver never attached")
        .unwrap();
    let addr = listening_addr(&node).await;
    (node, board, addr)
}

fn transmitter_options(port: u16) -> NodeOptions {
    let mut options = options(NodeRole::Transmitter, port);
    options.server_address = Some("127.0.0.1".into());
    options
}

#[tokio::test]
async fn test_transmitter_values_reach_receiver() {
    // Arrange
    let (receiver, board, addr) = start_receiver().await;
    let mut status = board.subscribe();
    let transmitter = Node::start(
        simulated(),
        transmitter_options(addr.port()),
        Arc::new(StatusBoard::new()),
    )
    .unwrap();
    wait_link(&transmitter, LinkState::Connected).await;

    // Act
    assert!(transmitter.send(ValueSample(0)).await.unwrap());
    let first = wait_status(&mut status, |s| s.last_value == Some(ValueSample(0))).await;
    assert!(transmitter.send(ValueSample(255)).await.unwrap());
    let second = wait_status(&mut status, |s| s.last_value == Some(ValueSample(255))).await;

    // Assert
    assert_eq!(first.link, LinkState::Connected);
    assert_eq!(second.attachment, AttachmentState::Attached);
    assert_eq!(second.network_name.as_deref(), Some("lowpan_sample"));

    transmitter.shutdown().await.unwrap();
    receiver.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stepping_sends_adjacent_values() {
    let (receiver, board, addr) = start_receiver().await;
    let mut status = board.subscribe();
    let transmitter = Node::start(
        simulated(),
        transmitter_options(addr.port()),
        Arc::new(StatusBoard::new()),
    )
    .unwrap();
    wait_link(&transmitter, LinkState::Connected).await;

    transmitter.send(ValueSample(10)).await.unwrap();
    let up = transmitter.increment().await.unwrap();
    wait_status(&mut status, |s| s.last_value == Some(ValueSample(11))).await;
    let down = transmitter.decrement().await.unwrap();
    wait_status(&mut status, |s| s.last_value == Some(ValueSample(10))).await;

    assert_eq!(up, ValueSample(11));
    assert_eq!(down, ValueSample(10));
    transmitter.shutdown().await.unwrap();
    receiver.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_transmitter_shutdown_is_seen_as_lost() {
    // Arrange
    let (receiver, board, addr) = start_receiver().await;
    let mut status = board.subscribe();
    let transmitter = Node::start(
        simulated(),
        transmitter_options(addr.port()),
        Arc::new(StatusBoard::new()),
    )
    .unwrap();
    wait_link(&receiver, LinkState::Connected).await;

    // Act
    transmitter.shutdown().await.unwrap();

    // Assert
    let snapshot = wait_status(&mut status, |s| s.link == LinkState::Lost).await;
    assert!(snapshot.peer.is_none());
    receiver.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_leaving_the_network_drops_the_link() {
    // Arrange
    let (receiver, _board, addr) = start_receiver().await;
    let transmitter = Node::start(
        simulated(),
        transmitter_options(addr.port()),
        Arc::new(StatusBoard::new()),
    )
    .unwrap();
    wait_link(&transmitter, LinkState::Connected).await;

    // Act
    transmitter.leave().await.unwrap();

    // Assert
    wait_link(&transmitter, LinkState::NoTransport).await;
    wait_link(&receiver, LinkState::Lost).await;
    assert!(!transmitter.send(ValueSample(1)).await.unwrap());

    transmitter.shutdown().await.unwrap();
    receiver.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_receiver_shutdown_closes_link_and_listener() {
    // Arrange
    let (receiver, board, addr) = start_receiver().await;
    let transmitter = Node::start(
        simulated(),
        transmitter_options(addr.port()),
        Arc::new(StatusBoard::new()),
    )
    .unwrap();
    wait_link(&transmitter, LinkState::Connected).await;

    // Act
    receiver.shutdown().await.unwrap();

    // Assert
    wait_link(&transmitter, LinkState::Lost).await;
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    let snapshot = board.snapshot();
    assert!(snapshot.interface.is_none());
    assert_eq!(snapshot.attachment, AttachmentState::Offline);

    transmitter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disabling_interface_takes_transport_down() {
    let (receiver, _board, _addr) = start_receiver().await;

    receiver.set_enabled(false).await.unwrap();

    wait_link(&receiver, LinkState::NoTransport).await;
    let mut attachment = receiver.subscribe_attachment();
    timeout(WAIT, attachment.wait_for(|s| *s == AttachmentState::Offline))
        .await
        .unwrap()
        .unwrap();
    receiver.shutdown().await.unwrap();
}
