//! 24LCxx-family I2C EEPROM driver and the partitioned store built on it.

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use heapless::Vec;
use log::{debug, warn};

use super::{PersistentStore, Scope, check_bounds};
use crate::error::{StorageError, describe};

/// Default bus address with A0..A2 tied low.
pub const DEFAULT_ADDRESS: u8 = 0x50;

/// Page size of the 24LC256 and 24LC512.
pub const PAGE_SIZE: usize = 64;

/// Worst-case internal write cycle.
const WRITE_CYCLE_MS: u32 = 5;

/// Bytes of the device reserved for the internal scope by [`EepromStore`].
pub const INTERNAL_REGION: u32 = 1024;

/// Byte-addressable 24LCxx EEPROM with 16-bit word addressing.
pub struct Eeprom24x<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    size: u32,
}

impl<I: I2c, D: DelayNs> Eeprom24x<I, D> {
    /// `size` is the device capacity in bytes (32768 for a 24LC256).
    pub fn new(i2c: I, delay: D, address: u8, size: u32) -> Self {
        Self {
            i2c,
            delay,
            address,
            size,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub async fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), I::Error> {
        let word = (address as u16).to_be_bytes();
        self.i2c.write_read(self.address, &word, buf).await
    }

    /// Write `data`, split so that no single transfer crosses a page.
    pub async fn write(&mut self, address: u32, data: &[u8]) -> Result<(), I::Error> {
        let mut address = address;
        let mut remaining = data;

        while !remaining.is_empty() {
            let room = PAGE_SIZE - (address as usize % PAGE_SIZE);
            let (chunk, rest) = remaining.split_at(room.min(remaining.len()));

            let mut frame: Vec<u8, { PAGE_SIZE + 2 }> = Vec::new();
            let _ = frame.extend_from_slice(&(address as u16).to_be_bytes());
            let _ = frame.extend_from_slice(chunk);

            self.i2c.write(self.address, &frame).await?;
            self.delay.delay_ms(WRITE_CYCLE_MS).await;

            address += chunk.len() as u32;
            remaining = rest;
        }
        Ok(())
    }
}

/// [`PersistentStore`] over one EEPROM: the first [`INTERNAL_REGION`] bytes
/// back the internal scope, the rest backs the measurement log.
pub struct EepromStore<I, D> {
    eeprom: Eeprom24x<I, D>,
}

impl<I: I2c, D: DelayNs> EepromStore<I, D> {
    pub fn new(eeprom: Eeprom24x<I, D>) -> Self {
        debug!(
            "EEPROM store: {} bytes internal, {} bytes log",
            INTERNAL_REGION,
            eeprom.size().saturating_sub(INTERNAL_REGION)
        );
        Self { eeprom }
    }

    fn base(scope: Scope) -> u32 {
        match scope {
            Scope::Internal => 0,
            Scope::External => INTERNAL_REGION,
        }
    }
}

impl<I: I2c, D: DelayNs> PersistentStore for EepromStore<I, D> {
    async fn read(&mut self, scope: Scope, address: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(self.capacity(scope), address, buf.len())?;
        self.eeprom
            .read(Self::base(scope) + address, buf)
            .await
            .map_err(|e| {
                warn!("EEPROM read at {:?}+{} failed: {:?}", scope, address, e);
                StorageError::Bus(describe(&e))
            })
    }

    async fn write(&mut self, scope: Scope, address: u32, data: &[u8]) -> Result<(), StorageError> {
        check_bounds(self.capacity(scope), address, data.len())?;
        self.eeprom
            .write(Self::base(scope) + address, data)
            .await
            .map_err(|e| {
                warn!("EEPROM write at {:?}+{} failed: {:?}", scope, address, e);
                StorageError::Bus(describe(&e))
            })
    }

    fn capacity(&self, scope: Scope) -> u32 {
        match scope {
            Scope::Internal => INTERNAL_REGION.min(self.eeprom.size()),
            Scope::External => self.eeprom.size().saturating_sub(INTERNAL_REGION),
        }
    }
}
