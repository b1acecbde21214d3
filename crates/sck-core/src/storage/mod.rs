//! Persistent storage for configuration and the measurement backlog.
//!
//! Storage is addressed per [`Scope`]: the internal scope holds small
//! configuration cells (queue cursors, the serialized node config) and the
//! external scope holds the measurement log itself.

pub mod eeprom;
pub mod memory;
pub mod queue;
pub mod record;

pub use eeprom::{Eeprom24x, EepromStore};
pub use memory::MemoryStore;
pub use queue::MeasurementQueue;
pub use record::{MeasurementRecord, RECORD_SIZE};

use crate::error::StorageError;

/// Which storage region an address refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Configuration cells and queue cursors
    Internal,
    /// Measurement log region
    External,
}

/// Byte-addressable non-volatile storage.
///
/// A write is durable once its future resolves. Accesses that cross the end
/// of the scope fail with [`StorageError::OutOfRange`].
pub trait PersistentStore {
    /// Fill `buf` from `address` in `scope`.
    fn read(
        &mut self,
        scope: Scope,
        address: u32,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(), StorageError>>;

    /// Write `data` at `address` in `scope`.
    fn write(
        &mut self,
        scope: Scope,
        address: u32,
        data: &[u8],
    ) -> impl Future<Output = Result<(), StorageError>>;

    /// Size of `scope` in bytes.
    fn capacity(&self, scope: Scope) -> u32;

    /// Read a little-endian `u32` cell.
    fn read_u32(
        &mut self,
        scope: Scope,
        address: u32,
    ) -> impl Future<Output = Result<u32, StorageError>> {
        async move {
            let mut bytes = [0u8; 4];
            self.read(scope, address, &mut bytes).await?;
            Ok(u32::from_le_bytes(bytes))
        }
    }

    /// Write a little-endian `u32` cell.
    fn write_u32(
        &mut self,
        scope: Scope,
        address: u32,
        value: u32,
    ) -> impl Future<Output = Result<(), StorageError>> {
        async move { self.write(scope, address, &value.to_le_bytes()).await }
    }
}

/// Reject accesses that would run past `capacity`.
pub(crate) fn check_bounds(capacity: u32, address: u32, len: usize) -> Result<(), StorageError> {
    let end = u64::from(address) + len as u64;
    if end > u64::from(capacity) {
        return Err(StorageError::OutOfRange { address, len });
    }
    Ok(())
}
