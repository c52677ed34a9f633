//! Network beacons observed during a scan.
//!
//! A beacon is the advertisement broadcast by a network's leader or border
//! router.  Beacons are ephemeral: the scan produces them one at a time, the
//! join-selection policy looks at each one immediately, and none are stored.
//!
//! RSSI and LQI are for display only; the join policy ignores them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::identity::NetworkIdentity;
use crate::protocol::hex::{bytes_to_addr_hex, bytes_to_hex};

/// RSSI (dBm) mapped to the top of the LQI scale.
const HIGH_RSSI: i32 = -45;
/// RSSI (dBm) mapped to the bottom of the LQI scale.
const LOW_RSSI: i32 = -90;

/// Capability bits advertised in a beacon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeaconFlags(pub u8);

impl BeaconFlags {
    /// The advertising node can assist a joiner (commissioning).
    pub const CAN_ASSIST: u8 = 1 << 0;

    /// Returns `true` if every bit in `flag` is set.
    pub fn is_set(&self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    /// Returns `true` if the `CAN_ASSIST` bit is set.
    pub fn can_assist(&self) -> bool {
        self.is_set(Self::CAN_ASSIST)
    }
}

/// One observed network advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    /// Identity of the advertised network.
    pub identity: NetworkIdentity,
    /// Link-layer address of the advertising node.
    pub beacon_address: Vec<u8>,
    /// Received signal strength in dBm.
    pub rssi: i32,
    /// Link quality indicator, 0–255.
    pub lqi: u8,
    /// Capability bits.
    pub flags: BeaconFlags,
}

impl Beacon {
    /// Network name advertised by this beacon.
    pub fn network_name(&self) -> &str {
        &self.identity.name
    }

    /// Colon-separated hex form of the beacon address, e.g. `"02:00:5e:10"`.
    pub fn address_hex(&self) -> String {
        bytes_to_addr_hex(&self.beacon_address)
    }

    /// RSSI mapped onto the 1–255 link-quality scale for progress-bar display.
    pub fn signal_quality(&self) -> u8 {
        rssi_to_lqi(self.rssi)
    }
}

impl fmt::Display for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} xpanid={} addr={} rssi={} lqi={}",
            self.identity,
            bytes_to_hex(&self.identity.xpanid),
            self.address_hex(),
            self.rssi,
            self.lqi
        )?;
        if self.flags.can_assist() {
            write!(f, " can-assist")?;
        }
        Ok(())
    }
}

/// Approximates an LQI value from an RSSI reading.
///
/// Linearly maps −90 dBm … −45 dBm onto 1 … 255 and clamps outside that range.
///
/// # Examples
///
/// ```rust
/// use lowpan_core::rssi_to_lqi;
///
/// assert_eq!(rssi_to_lqi(-90), 1);
/// assert_eq!(rssi_to_lqi(-45), 255);
/// assert_eq!(rssi_to_lqi(-120), 1);
/// ```
pub fn rssi_to_lqi(rssi: i32) -> u8 {
    let lqi = (rssi - LOW_RSSI) * 254 / (HIGH_RSSI - LOW_RSSI) + 1;
    lqi.clamp(1, 255) as u8
}
