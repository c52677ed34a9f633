//! # lowpan-core
//!
//! Shared library for lowpan-relay containing the mesh network domain types,
//! the join-selection policy, and the one-octet value wire protocol.
//!
//! This crate is used by the node runtime and by the tests and benchmarks.
//! It has zero dependencies on OS APIs, radio drivers, or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! lowpan-relay lets a small device attach to a low-power wireless mesh
//! network (a "LoWPAN") and then stream single byte-sized values to exactly
//! one peer on that network.  One device typically runs as the *receiver*
//! (it forms the network and listens on a TCP port) and another as the
//! *transmitter* (it joins or forms the network and dials the receiver).
//!
//! This crate (`lowpan-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – What a network looks like from the device's point of view:
//!   its identity (name, PAN ID, channel), the credential used to join it, the
//!   beacons observed during a scan, and the state enums reported to the user.
//!   It also holds the join-selection policy: which beacon to join.
//!
//! - **`protocol`** – How values travel over the link.  Every value is exactly
//!   one octet on the wire: no header, no delimiter, no acknowledgement.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `lowpan_core::Beacon` instead of `lowpan_core::domain::beacon::Beacon`.
pub use domain::beacon::{rssi_to_lqi, Beacon, BeaconFlags};
pub use domain::identity::{
    generate_network_name, Credential, CredentialError, NetworkIdentity, ProvisioningParams,
};
pub use domain::join_policy::JoinPolicy;
pub use domain::state::{AttachmentState, InterfaceRole, LinkState};
pub use protocol::hex::{bytes_to_addr_hex, bytes_to_hex, hex_to_bytes, HexError};
pub use protocol::value::{ValueError, ValueSample, DEFAULT_LINK_PORT};
