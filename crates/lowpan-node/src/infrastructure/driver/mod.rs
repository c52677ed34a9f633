//! Driver adapters implementing `LowpanManager` / `LowpanInterface`.
//!
//! Only the in-process simulated driver ships today.  A radio-backed adapter
//! would sit next to it and be selected in `main.rs`.

pub mod sim;

pub use sim::{SimulatedInterface, SimulatedManager};
