//! Hardware-independent core of the sck-rs environmental node.
//!
//! Holds everything that does not touch a specific chip: the MICS gas front
//! end and its re-ranging sampler, the persistent measurement queue, the
//! batch uplink to the ingest server, configuration and the serial console.
//! Board crates supply the peripherals through the traits defined here.
//!
//! It is `#![no_std]` with `extern crate alloc` so it builds for the ESP32-S3
//! firmware and on desktop hosts for the simulator and tests.

#![no_std]

extern crate alloc;

pub mod afe;
pub mod bus;
pub mod config;
pub mod console;
pub mod error;
pub mod gas;
pub mod node;
pub mod polling;
pub mod reading;
pub mod sensors;
pub mod storage;
pub mod uplink;

#[cfg(test)]
pub(crate) mod test_support;
