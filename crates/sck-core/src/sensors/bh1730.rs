//! BH1730FVC ambient light sensor on the rev 1.1 I2C bus.
//!
//! One-shot: each read powers the chip up, waits for an integration cycle
//! and converts the two channels to deci-lux.

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use log::{debug, error};

use crate::error::{SensorError, describe};

pub const BH1730_ADDRESS: u8 = 0x29;

/// Integration time register value.
const TIME0: u8 = 0xDA;
/// Gain register value: x1.
const GAIN0: u8 = 0x00;

/// Command byte addressing the CONTROL register.
const CMD_CONTROL: u8 = 0x80;
/// Command byte addressing DATA0LOW, the first of four data bytes.
const CMD_DATA: u8 = 0x94;

const MEASUREMENT_MS: u32 = 100;

/// Rohm BH1730FVC ambient light sensor, single-shot.
pub struct Bh1730<I> {
    i2c: I,
}

impl<I: I2c> Bh1730<I> {
    pub fn new(i2c: I) -> Self {
        Self { i2c }
    }

    /// Run one measurement. Returns deci-lux.
    pub async fn read_light<D: DelayNs>(&mut self, delay: &mut D) -> Result<i32, SensorError> {
        let setup = [CMD_CONTROL, 0x03, TIME0, 0x00, 0x00, 0x00, 0xFF, 0xFF, GAIN0];
        self.i2c
            .write(BH1730_ADDRESS, &setup)
            .await
            .map_err(|e| Self::bus_error("setup", e))?;

        delay.delay_ms(MEASUREMENT_MS).await;

        let mut data = [0u8; 4];
        self.i2c
            .write_read(BH1730_ADDRESS, &[CMD_DATA], &mut data)
            .await
            .map_err(|e| Self::bus_error("data", e))?;

        let data0 = u16::from_le_bytes([data[0], data[1]]);
        let data1 = u16::from_le_bytes([data[2], data[3]]);
        let lux = lux(data0, data1);
        debug!("BH1730: DATA0 {} DATA1 {} -> {:.1} lx", data0, data1, lux);
        Ok((lux * 10.0) as i32)
    }

    fn bus_error(stage: &str, e: I::Error) -> SensorError {
        error!("BH1730 {} transfer failed: {:?}", stage, e);
        SensorError::Bus(describe(&e))
    }
}

/// Piecewise lux approximation from the datasheet.
pub fn lux(data0: u16, data1: u16) -> f32 {
    // The gain register is fixed at x1, so only that branch is ever taken.
    let gain: f32 = match GAIN0 {
        0x00 => 1.0,
        0x01 => 2.0,
        0x02 => 64.0,
        _ => 128.0,
    };
    let itime = f32::from(256 - u16::from(TIME0)) * 2.7;
    let cons = gain * 100.0 / itime;

    let (d0, d1) = (f32::from(data0), f32::from(data1));
    let ratio = d1 / d0;

    if ratio < 0.26 {
        (1.290 * d0 - 2.733 * d1) / cons
    } else if ratio < 0.55 {
        (0.795 * d0 - 0.859 * d1) / cons
    } else if ratio < 1.09 {
        (0.510 * d0 - 0.345 * d1) / cons
    } else if ratio < 2.13 {
        (0.276 * d0 - 0.130 * d1) / cons
    } else {
        0.0
    }
}
