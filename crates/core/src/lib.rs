//! Domain types and pure logic for the ammonia monitor.
//!
//! Nothing in this crate performs I/O apart from reading the configuration
//! file; the acquisition loop, storage and notification delivery live in the
//! `nh3-monitor`, `nh3-db` and `nh3-events` crates.

pub mod alert;
pub mod config;
pub mod error;
pub mod reading;
pub mod sensor;
pub mod severity;
pub mod types;
