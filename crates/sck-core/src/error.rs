//! Error types shared across the node.
//!
//! Driver errors are generic and differ per board, so they are flattened into a
//! short description before they cross a layer boundary.

use core::fmt::{Debug, Write};

use heapless::String;
use thiserror_no_std::Error;

/// Short, bounded description carried by bus-level error variants.
pub type ErrorText = String<64>;

/// Render any `Debug` value into an [`ErrorText`], truncating on overflow.
pub fn describe<E: Debug>(error: &E) -> ErrorText {
    let mut text = ErrorText::new();
    let _ = write!(text, "{:?}", error);
    text
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Storage bus error: {0}")]
    Bus(ErrorText),
    #[error("Access outside storage region at {address} ({len} bytes)")]
    OutOfRange { address: u32, len: usize },
    #[error("Measurement queue is full")]
    QueueFull,
    #[error("Corrupt measurement record")]
    CorruptRecord,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Config storage error: {0}")]
    Storage(StorageError),
    #[error("Config encoding failed")]
    Encode,
    #[error("Config decoding failed")]
    Decode,
    #[error("Config does not fit its storage slot")]
    TooLarge,
}

impl From<StorageError> for ConfigError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UplinkError {
    #[error("Network join failed: {0}")]
    Join(ErrorText),
    #[error("Socket open failed: {0}")]
    Open(ErrorText),
    #[error("Network write failed: {0}")]
    Write(ErrorText),
    #[error("Queue access failed: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for UplinkError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("Sensor bus error: {0}")]
    Bus(ErrorText),
    #[error("Sensor not ready")]
    NotReady,
    #[error("Sensor checksum mismatch")]
    Checksum,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Invalid command.")]
    Unknown,
    #[error("Invalid argument.")]
    InvalidArgument,
    #[error("Command too long.")]
    TooLong,
    #[error("Please, wait for the uplink to finish.")]
    Busy,
    #[error("Could not save settings: {0}")]
    Config(ConfigError),
}

impl From<ConfigError> for CommandError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}
