//! Network identity, credentials, and provisioning parameters.
//!
//! A [`NetworkIdentity`] names a mesh network: the human-readable network
//! name plus the radio-level identifiers (extended PAN ID, PAN ID, channel).
//! Identities observed in beacons carry all fields; an identity built for
//! *forming* a new network usually only carries the name and lets the radio
//! pick the rest.
//!
//! A [`Credential`] is the shared secret (the network master key) needed to
//! join or form a network.  Its key material is never printed: both `Debug`
//! and `Display` show only the key length.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::hex::{hex_to_bytes, HexError};

/// Length in bytes of a network master key.
pub const MASTER_KEY_LEN: usize = 16;

/// Prefix used for generated network names (`LoWPAN_142`).
pub const GENERATED_NAME_PREFIX: &str = "LoWPAN_";

/// Error type for credential construction.
#[derive(Debug, Error, PartialEq)]
pub enum CredentialError {
    /// No key material was supplied.
    #[error("credential key material is empty")]
    Empty,

    /// The hex string could not be decoded.
    #[error("invalid master key: {0}")]
    InvalidHex(#[from] HexError),

    /// The decoded master key has the wrong length.
    #[error("master key must be {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// The identity of a mesh network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkIdentity {
    /// Human-readable network name, e.g. `"lowpan_sample"`.
    pub name: String,
    /// Extended PAN ID (8 bytes on 802.15.4 networks); empty when unknown.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub xpanid: Vec<u8>,
    /// 16-bit PAN ID; `None` lets the radio choose when forming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panid: Option<u16>,
    /// Radio channel; `None` lets the radio choose when forming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
}

impl NetworkIdentity {
    /// Creates an identity carrying only a network name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            xpanid: Vec::new(),
            panid: None,
            channel: None,
        }
    }

    /// Sets the extended PAN ID.
    pub fn with_xpanid(mut self, xpanid: impl Into<Vec<u8>>) -> Self {
        self.xpanid = xpanid.into();
        self
    }

    /// Sets the PAN ID.
    pub fn with_panid(mut self, panid: u16) -> Self {
        self.panid = Some(panid);
        self
    }

    /// Sets the radio channel.
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Returns `true` when this identity belongs to the network called `name`.
    pub fn has_name(&self, name: &str) -> bool {
        self.name == name
    }
}

impl fmt::Display for NetworkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(panid) = self.panid {
            write!(f, " panid={panid:04X}")?;
        }
        if let Some(channel) = self.channel {
            write!(f, " ch={channel}")?;
        }
        Ok(())
    }
}

/// Shared secret used to join or form a network.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    key_material: Vec<u8>,
}

impl Credential {
    /// Wraps raw key material.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Empty`] if `key_material` is empty.
    pub fn from_bytes(key_material: impl Into<Vec<u8>>) -> Result<Self, CredentialError> {
        let key_material = key_material.into();
        if key_material.is_empty() {
            return Err(CredentialError::Empty);
        }
        Ok(Self { key_material })
    }

    /// Parses a 128-bit master key written as 32 hex digits.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the string is empty, not valid hex, or
    /// does not decode to exactly [`MASTER_KEY_LEN`] bytes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lowpan_core::Credential;
    ///
    /// let cred = Credential::master_key_from_hex("00112233445566778899aabbccddeeff").unwrap();
    /// assert_eq!(cred.len(), 16);
    /// assert!(!format!("{cred:?}").contains("0011"));
    /// ```
    pub fn master_key_from_hex(hex: &str) -> Result<Self, CredentialError> {
        let trimmed = hex.trim();
        if trimmed.is_empty() {
            return Err(CredentialError::Empty);
        }
        let bytes = hex_to_bytes(trimmed)?;
        if bytes.len() != MASTER_KEY_LEN {
            return Err(CredentialError::WrongLength {
                expected: MASTER_KEY_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            key_material: bytes,
        })
    }

    /// Returns the raw key material for handing to the radio driver.
    pub fn key_material(&self) -> &[u8] {
        &self.key_material
    }

    /// Length of the key material in bytes.
    pub fn len(&self) -> usize {
        self.key_material.len()
    }

    /// Always `false`; empty credentials cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.key_material.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key_material", &format_args!("<redacted {} bytes>", self.len()))
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted {}-byte key>", self.len())
    }
}

/// Everything the radio needs to form or join a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningParams {
    pub identity: NetworkIdentity,
    pub credential: Credential,
}

impl ProvisioningParams {
    pub fn new(identity: NetworkIdentity, credential: Credential) -> Self {
        Self {
            identity,
            credential,
        }
    }
}

/// Generates an easily-unique network name such as `"LoWPAN_142"`.
///
/// Used when the user asks to create a brand new network rather than join a
/// scanned one.  The suffix is in `0..1000`.
pub fn generate_network_name() -> String {
    let n: u16 = rand::thread_rng().gen_range(0..1000);
    format!("{GENERATED_NAME_PREFIX}{n}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
