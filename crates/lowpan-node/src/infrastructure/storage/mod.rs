//! Persistent storage for the node.
//!
//! Only configuration is stored; runtime state is never persisted.

pub mod config;
