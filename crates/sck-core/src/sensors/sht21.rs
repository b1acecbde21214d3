use embedded_hal_async::i2c::I2c;
use log::{debug, error};

use super::{Climate, ClimateSensor};
use crate::error::{SensorError, describe};

pub const SHT21_ADDRESS: u8 = 0x40;

/// Trigger T measurement, hold master.
const CMD_TEMPERATURE: u8 = 0xE3;
/// Trigger RH measurement, hold master.
const CMD_HUMIDITY: u8 = 0xE5;

/// The two low bits of each word carry status, not data.
const STATUS_BITS: u16 = 0x0003;

/// Sensirion SHT21. Values are reported raw; the platform calibrates them.
pub struct Sht21<I> {
    i2c: I,
}

impl<I: I2c> Sht21<I> {
    pub fn new(i2c: I) -> Self {
        Self { i2c }
    }

    async fn measure(&mut self, command: u8) -> Result<u16, SensorError> {
        let mut data = [0u8; 2];
        self.i2c
            .write_read(SHT21_ADDRESS, &[command], &mut data)
            .await
            .map_err(|e| {
                error!("SHT21 command {:#04x} failed: {:?}", command, e);
                SensorError::Bus(describe(&e))
            })?;
        Ok(u16::from_be_bytes(data) & !STATUS_BITS)
    }
}

impl<I: I2c> ClimateSensor for Sht21<I> {
    type Error = SensorError;

    async fn read(&mut self) -> Result<Climate, Self::Error> {
        let temperature = self.measure(CMD_TEMPERATURE).await?;
        let humidity = self.measure(CMD_HUMIDITY).await?;
        debug!("SHT21: T {} RH {}", temperature, humidity);
        Ok(Climate {
            temperature: i32::from(temperature),
            humidity: i32::from(humidity),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use embassy_futures::block_on;
    use embedded_hal::i2c::ErrorKind;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};

    #[test]
    fn test_read_masks_status_bits() {
        let expectations = [
            I2cTransaction::write_read(SHT21_ADDRESS, vec![0xE3], vec![0x66, 0x7F]),
            I2cTransaction::write_read(SHT21_ADDRESS, vec![0xE5], vec![0x7C, 0x82]),
        ];
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Sht21::new(i2c.clone());

        let climate = block_on(sensor.read()).unwrap();

        assert_eq!(
            climate,
            Climate {
                temperature: 0x667C,
                humidity: 0x7C80,
            }
        );
        i2c.done();
    }

    #[test]
    fn test_humidity_skipped_after_temperature_failure() {
        let expectations = [I2cTransaction::write_read(SHT21_ADDRESS, vec![0xE3], vec![0, 0])
            .with_error(ErrorKind::Other)];
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Sht21::new(i2c.clone());

        assert!(matches!(block_on(sensor.read()), Err(SensorError::Bus(_))));
        i2c.done();
    }
}
