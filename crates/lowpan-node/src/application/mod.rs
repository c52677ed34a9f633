//! Application layer use cases for a lowpan-relay node.
//!
//! # What lives here?
//!
//! - **`interface`** – The driver contract: the [`LowpanManager`] and
//!   [`LowpanInterface`] traits the wireless subsystem is reached through,
//!   and the [`DriverEvent`]s it delivers.  Implementations are injected from
//!   the infrastructure layer.
//!
//! - **`scan`** – One beacon scan, from start to its single finish signal,
//!   including the join-selection step for scan-then-join.
//!
//! - **`attachment`** – The network attachment state machine: form, join,
//!   leave, and tracking what the interface reports.
//!
//! [`LowpanManager`]: interface::LowpanManager
//! [`LowpanInterface`]: interface::LowpanInterface
//! [`DriverEvent`]: interface::DriverEvent

pub mod attachment;
pub mod interface;
pub mod scan;
