//! Infrastructure layer for a lowpan-relay node.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `lowpan_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`driver`** – Implementations of the driver contract.  The simulated
//!   driver stands in for the wireless subsystem on hosts without a radio and
//!   in tests.
//!
//! - **`link`** – The single-connection TCP value relay: listen, connect,
//!   replace, stream bytes.
//!
//! - **`storage`** – TOML configuration file handling.
//!
//! - **`presenter`** – The presenter contract plus the status snapshot and a
//!   log-based presenter for the command-line binary.

pub mod driver;
pub mod link;
pub mod presenter;
pub mod storage;
