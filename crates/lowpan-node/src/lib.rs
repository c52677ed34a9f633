//! lowpan-node library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does lowpan-node do? (for beginners)
//!
//! A node is one small device on a low-power mesh network.  Before it can do
//! anything useful it must be a *member* of a network, which means either
//! forming a new one or finding an existing one by scanning and joining it
//! with the shared master key.
//!
//! Once attached, the node relays a stream of single-byte values over one TCP
//! connection to one peer:
//!
//! 1. A **receiver** forms (or keeps) the network, listens on a well-known
//!    port, and reports every value that arrives.
//! 2. A **transmitter** attaches to the same network, connects to the
//!    receiver's address, and sends values.
//! 3. A **scanner** lists the networks in range and can join one of them or
//!    form a fresh network with a generated name.
//!
//! Only one link connection is ever live; a new one replaces the old.

/// Application layer: driver contract, scan session, attachment controller.
pub mod application;

/// Infrastructure layer: driver adapters, TCP link, config, presenter.
pub mod infrastructure;

/// Node runtime wiring the controller and the link together.
pub mod node;
