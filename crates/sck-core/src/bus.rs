//! Shared access to the I2C bus and the ADC.
//!
//! The EEPROM, both potentiometers and the board sensors sit on one I2C bus,
//! and the gas front end shares the ADC with the noise and light inputs. Each
//! user gets its own handle onto an embassy [`Mutex`] and holds the lock only
//! for the duration of one transaction.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal_async::i2c::{ErrorType, I2c, Operation};

use crate::afe::{AnalogInput, AnalogSampler};

/// Handle onto a mutex-guarded I2C bus.
///
/// ```ignore
/// static I2C_BUS: StaticCell<Mutex<CriticalSectionRawMutex, I2cDriver>> = StaticCell::new();
/// let bus = I2C_BUS.init(Mutex::new(i2c));
///
/// let eeprom = Eeprom24x::new(SharedI2c::new(bus), Delay, DEFAULT_ADDRESS, 32 * 1024);
/// let pots = Mcp46x1Pair::new(SharedI2c::new(bus));
/// ```
pub struct SharedI2c<'a, M: RawMutex, T> {
    bus: &'a Mutex<M, T>,
}

impl<'a, M: RawMutex, T> SharedI2c<'a, M, T> {
    #[inline]
    pub const fn new(bus: &'a Mutex<M, T>) -> Self {
        Self { bus }
    }
}

impl<M: RawMutex, T> Clone for SharedI2c<'_, M, T> {
    fn clone(&self) -> Self {
        Self { bus: self.bus }
    }
}

impl<M: RawMutex, T: ErrorType> ErrorType for SharedI2c<'_, M, T> {
    type Error = T::Error;
}

impl<M: RawMutex, T: I2c> I2c for SharedI2c<'_, M, T> {
    #[inline]
    async fn read(&mut self, address: u8, read: &mut [u8]) -> Result<(), Self::Error> {
        let mut bus = self.bus.lock().await;
        bus.read(address, read).await
    }

    #[inline]
    async fn write(&mut self, address: u8, write: &[u8]) -> Result<(), Self::Error> {
        let mut bus = self.bus.lock().await;
        bus.write(address, write).await
    }

    #[inline]
    async fn write_read(
        &mut self,
        address: u8,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Self::Error> {
        let mut bus = self.bus.lock().await;
        bus.write_read(address, write, read).await
    }

    /// Runs every operation under one lock, so the bus sees a single
    /// transaction with repeated starts.
    #[inline]
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut bus = self.bus.lock().await;
        bus.transaction(address, operations).await
    }
}

/// Handle onto a mutex-guarded [`AnalogSampler`].
pub struct SharedAnalog<'a, M: RawMutex, T> {
    adc: &'a Mutex<M, T>,
}

impl<'a, M: RawMutex, T> SharedAnalog<'a, M, T> {
    pub const fn new(adc: &'a Mutex<M, T>) -> Self {
        Self { adc }
    }
}

impl<M: RawMutex, T> Clone for SharedAnalog<'_, M, T> {
    fn clone(&self) -> Self {
        Self { adc: self.adc }
    }
}

impl<M: RawMutex, T: AnalogSampler> AnalogSampler for SharedAnalog<'_, M, T> {
    async fn average(&mut self, input: AnalogInput) -> u16 {
        let mut adc = self.adc.lock().await;
        adc.average(input).await
    }
}
