//! The peer-link value protocol.
//!
//! # Wire format (for beginners)
//!
//! The link carries a stream of *values*, each a single unsigned octet
//! (0–255).  There is no header, no length prefix, and no delimiter: every
//! byte on the stream is one value, and a message boundary is simply the
//! byte boundary.  The stream is unidirectional in practice (transmitter →
//! receiver) but nothing stops either side from writing.
//!
//! ```text
//!  ┌────┬────┬────┬────┬─ ─ ─
//!  │ v0 │ v1 │ v2 │ v3 │ ...       one octet per value
//!  └────┴────┴────┴────┴─ ─ ─
//! ```
//!
//! Because every byte is a complete message, a reader can never observe a
//! partial value and needs no buffering beyond one byte.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default TCP port the receiver listens on and the transmitter connects to.
pub const DEFAULT_LINK_PORT: u16 = 23456;

/// Error type for building a [`ValueSample`] from a wider integer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("value {0} is outside 0..=255")]
    OutOfRange(i64),
}

/// One value carried on the link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueSample(pub u8);

impl ValueSample {
    pub const MIN: ValueSample = ValueSample(u8::MIN);
    pub const MAX: ValueSample = ValueSample(u8::MAX);

    /// Encodes the value as its single wire octet.
    pub fn encode(self) -> [u8; 1] {
        [self.0]
    }

    /// Builds a value from an integer, rejecting anything outside 0–255.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lowpan_core::{ValueError, ValueSample};
    ///
    /// assert_eq!(ValueSample::from_i64(200), Ok(ValueSample(200)));
    /// assert_eq!(ValueSample::from_i64(256), Err(ValueError::OutOfRange(256)));
    /// assert_eq!(ValueSample::from_i64(-1), Err(ValueError::OutOfRange(-1)));
    /// ```
    pub fn from_i64(v: i64) -> Result<Self, ValueError> {
        u8::try_from(v).map(Self).map_err(|_| ValueError::OutOfRange(v))
    }

    /// Next value up, saturating at 255.
    pub fn increment(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Next value down, saturating at 0.
    pub fn decrement(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl From<u8> for ValueSample {
    fn from(v: u8) -> Self {
        Self(v)
    }
}

impl fmt::Display for ValueSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
