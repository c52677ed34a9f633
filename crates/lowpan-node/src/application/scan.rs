//! ScanSession: one beacon scan from start to its single finish signal.
//!
//! A scan is started either to *survey* (list every network for the user) or
//! to *join* a named network, in which case each beacon is run through the
//! [`JoinPolicy`] as it arrives.
//!
//! # Exactly one finish
//!
//! Whatever ends the scan (an explicit stop, a match, the deadline, the
//! interface disappearing, or the driver finishing on its own) the session
//! hands out a [`ScanSummary`] exactly once.  Every later attempt to finish
//! returns `None`, so callers can emit their "scan finished" notification
//! unconditionally on `Some`.

use std::time::Duration;

use lowpan_core::{Beacon, Credential, JoinPolicy, ProvisioningParams};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::interface::{DriverError, LowpanInterface};

/// Error type for starting a scan.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("a scan is already in progress")]
    AlreadyScanning,

    #[error("no interface to scan with")]
    NoInterface,

    #[error("driver refused to scan: {0}")]
    Driver(#[from] DriverError),
}

/// Why the scan was started.
#[derive(Debug, Clone)]
pub enum ScanPurpose {
    /// Report every beacon; never join.
    Survey,
    /// Join the first beacon the policy accepts.
    Join {
        policy: JoinPolicy,
        credential: Credential,
    },
}

/// What the session did with one beacon.
#[derive(Debug, Clone, PartialEq)]
pub enum BeaconDisposition {
    /// No scan is active; the beacon is stale.
    Ignored,
    /// Passed on to the presenter; no action.
    Delivered,
    /// The join target was found; join with these parameters.
    Matched(ProvisioningParams),
}

/// How a finished scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanOutcome {
    Survey,
    Matched,
    NoMatch,
}

/// Handed out exactly once per started scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub beacons: usize,
    pub outcome: ScanOutcome,
}

#[derive(Debug)]
struct ActiveScan {
    purpose: ScanPurpose,
    deadline: Instant,
    beacons: usize,
    matched: bool,
}

/// State of the (at most one) running scan.
#[derive(Debug, Default)]
pub struct ScanSession {
    active: Option<ActiveScan>,
}

impl ScanSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// When the running scan must be stopped, if one is running.
    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|a| a.deadline)
    }

    /// Starts a scan on `iface`.
    ///
    /// # Errors
    ///
    /// - [`ScanError::AlreadyScanning`] if a scan is running.
    /// - [`ScanError::NoInterface`] if `iface` is `None`.
    /// - [`ScanError::Driver`] if the driver refuses; the session stays idle.
    pub fn start(
        &mut self,
        iface: Option<&dyn LowpanInterface>,
        purpose: ScanPurpose,
        timeout: Duration,
    ) -> Result<(), ScanError> {
        if self.active.is_some() {
            return Err(ScanError::AlreadyScanning);
        }
        let iface = iface.ok_or(ScanError::NoInterface)?;
        iface.start_scan()?;

        match &purpose {
            ScanPurpose::Survey => info!("scanning for networks on {}", iface.name()),
            ScanPurpose::Join { policy, .. } => info!(
                "scanning for network '{}' on {}",
                policy.target_name(),
                iface.name()
            ),
        }
        self.active = Some(ActiveScan {
            purpose,
            deadline: Instant::now() + timeout,
            beacons: 0,
            matched: false,
        });
        Ok(())
    }

    /// Classifies one beacon.  After a [`BeaconDisposition::Matched`] the
    /// caller is expected to [`stop`](Self::stop) the scan.
    pub fn on_beacon(&mut self, beacon: &Beacon) -> BeaconDisposition {
        let Some(active) = self.active.as_mut() else {
            debug!("beacon for '{}' arrived with no scan active", beacon.network_name());
            return BeaconDisposition::Ignored;
        };
        if active.matched {
            return BeaconDisposition::Ignored;
        }
        active.beacons += 1;

        match &active.purpose {
            ScanPurpose::Survey => BeaconDisposition::Delivered,
            ScanPurpose::Join { policy, credential } => {
                if policy.matches(beacon) {
                    active.matched = true;
                    BeaconDisposition::Matched(policy.join_params(beacon, credential))
                } else {
                    BeaconDisposition::Delivered
                }
            }
        }
    }

    /// Stops the running scan on the driver and finishes the session.
    ///
    /// Idempotent: returns `None` if nothing was running.  A driver error on
    /// stop is logged; the session is finished regardless.
    pub fn stop(&mut self, iface: Option<&dyn LowpanInterface>) -> Option<ScanSummary> {
        let active = self.active.take()?;
        if let Some(iface) = iface {
            if let Err(e) = iface.stop_scan() {
                warn!("stopping scan on {} failed: {e}", iface.name());
            }
        }
        Some(Self::summarise(active))
    }

    /// Finishes the session without touching the driver: the driver ended the
    /// scan itself, or the interface is gone.
    pub fn finish(&mut self) -> Option<ScanSummary> {
        self.active.take().map(Self::summarise)
    }

    fn summarise(active: ActiveScan) -> ScanSummary {
        let outcome = match (&active.purpose, active.matched) {
            (ScanPurpose::Survey, _) => ScanOutcome::Survey,
            (ScanPurpose::Join { .. }, true) => ScanOutcome::Matched,
            (ScanPurpose::Join { .. }, false) => ScanOutcome::NoMatch,
        };
        debug!("scan finished: {} beacon(s), {:?}", active.beacons, outcome);
        ScanSummary {
            beacons: active.beacons,
            outcome,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
