//! ESP32-S3 firmware-specific modules for sck-rs
//!
//! This crate contains hardware-specific code that cannot compile on desktop
//! targets: ADC and GPIO setup for the sensor board, the WiFi modem on top of
//! esp-radio and embassy-net, the USB console task and build-time credentials.

#![no_std]

extern crate alloc;

pub mod board;
pub mod console;
pub mod net;
pub mod wifi_secrets;
