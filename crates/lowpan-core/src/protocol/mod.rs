//! Wire protocol for the peer link plus byte formatting helpers.
//!
//! - [`value`] – the one-octet value protocol.
//! - [`hex`] – hex encoding used for keys, extended PAN IDs, and addresses.

pub mod hex;
pub mod value;
