//! Domain entities for lowpan-relay.
//!
//! This module contains pure business logic with no infrastructure dependencies.
//!
//! # What lives here
//!
//! - [`identity`] – `NetworkIdentity`, `Credential`, and the
//!   `ProvisioningParams` pair handed to the radio driver on form/join.
//! - [`beacon`] – A network advertisement observed during a scan.
//! - [`state`] – Attachment, role, and link state enums plus their display text.
//! - [`join_policy`] – Decides which observed beacon the device joins.
//!
//! Code in outer layers (application, infrastructure) depends on the domain,
//! but the domain never depends on them.  Everything here can be compiled and
//! tested without a radio or a network.

pub mod beacon;
pub mod identity;
pub mod join_policy;
pub mod state;
