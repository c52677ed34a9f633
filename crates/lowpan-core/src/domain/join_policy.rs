//! Join-selection policy: which scanned network to join.
//!
//! The policy is deliberately simple.  Beacons are considered in the order
//! they arrive; the first beacon whose network name equals the target name
//! wins.  There is no tie-break by signal strength, link quality, or channel,
//! and no de-duplication: the same network heard twice simply matches twice,
//! and the caller stops scanning after the first match.

use tracing::debug;

use super::beacon::Beacon;
use super::identity::{Credential, ProvisioningParams};

/// Name-match join policy for one target network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPolicy {
    target_name: String,
}

impl JoinPolicy {
    pub fn new(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
        }
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Returns `true` if `beacon` advertises the target network.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lowpan_core::{Beacon, BeaconFlags, JoinPolicy, NetworkIdentity};
    ///
    /// let beacon = |name: &str| Beacon {
    ///     identity: NetworkIdentity::named(name),
    ///     beacon_address: vec![1],
    ///     rssi: -60,
    ///     lqi: 0,
    ///     flags: BeaconFlags::default(),
    /// };
    /// let policy = JoinPolicy::new("demo");
    /// assert!(policy.matches(&beacon("demo")));
    /// assert!(!policy.matches(&beacon("other")));
    /// ```
    pub fn matches(&self, beacon: &Beacon) -> bool {
        let hit = beacon.identity.has_name(&self.target_name);
        if !hit {
            debug!(
                "discarding beacon for '{}' (looking for '{}')",
                beacon.network_name(),
                self.target_name
            );
        }
        hit
    }

    /// Builds the parameters used to join the network advertised by `beacon`.
    ///
    /// The beacon's full identity (extended PAN ID, PAN ID, channel) is used so
    /// the radio does not have to rediscover them.
    pub fn join_params(&self, beacon: &Beacon, credential: &Credential) -> ProvisioningParams {
        ProvisioningParams::new(beacon.identity.clone(), credential.clone())
    }
}
