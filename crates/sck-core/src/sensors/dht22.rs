//! DHT22 temperature and humidity sensor on the rev 1.0 single-wire line.
//!
//! The host pulls the open-drain line low for 20 ms, releases it and then
//! times 40 high pulses. A pulse longer than 40 µs is a one.

use embassy_time::{Duration, Instant};
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use log::{debug, error};

use super::{Climate, ClimateSensor};
use crate::error::{SensorError, describe};

const START_LOW_MS: u32 = 20;
/// Longest the sensor may hold any level before the read is abandoned.
const LEVEL_TIMEOUT: Duration = Duration::from_micros(200);
/// High pulses longer than this encode a one.
const ONE_THRESHOLD: Duration = Duration::from_micros(40);

/// Aosong DHT22 (AM2302) on an open-drain pin with an external pull-up.
pub struct Dht22<P, D> {
    pin: P,
    delay: D,
}

impl<P, D> Dht22<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    pub fn new(pin: P, delay: D) -> Self {
        Self { pin, delay }
    }

    async fn read_frame(&mut self) -> Result<[u8; 5], SensorError> {
        self.pin.set_low().map_err(Self::pin_error)?;
        self.delay.delay_ms(START_LOW_MS).await;
        self.pin.set_high().map_err(Self::pin_error)?;

        // Response: low 80 µs, high 80 µs, then the first bit's low gap
        self.wait_for(false)?;
        self.wait_for(true)?;
        self.wait_for(false)?;

        let mut frame = [0u8; 5];
        for byte in frame.iter_mut() {
            for _ in 0..8 {
                self.wait_for(true)?;
                let rise = Instant::now();
                self.wait_for(false)?;
                *byte <<= 1;
                if rise.elapsed() > ONE_THRESHOLD {
                    *byte |= 1;
                }
            }
        }
        Ok(frame)
    }

    fn wait_for(&mut self, high: bool) -> Result<(), SensorError> {
        let start = Instant::now();
        while start.elapsed() <= LEVEL_TIMEOUT {
            if self.pin.is_high().map_err(Self::pin_error)? == high {
                return Ok(());
            }
        }
        Err(SensorError::NotReady)
    }

    fn pin_error(e: P::Error) -> SensorError {
        error!("DHT22 line error: {:?}", e);
        SensorError::Bus(describe(&e))
    }
}

impl<P, D> ClimateSensor for Dht22<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    type Error = SensorError;

    async fn read(&mut self) -> Result<Climate, SensorError> {
        let frame = self.read_frame().await;
        // Release the line whatever happened
        self.pin.set_high().map_err(Self::pin_error)?;
        decode_frame(frame?)
    }
}

/// Turn the five received bytes into tenths of a degree and tenths of a
/// percent.
pub fn decode_frame(frame: [u8; 5]) -> Result<Climate, SensorError> {
    let sum = frame[..4]
        .iter()
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte));
    if sum != frame[4] {
        return Err(SensorError::Checksum);
    }

    let humidity = i32::from(u16::from_be_bytes([frame[0], frame[1]]));
    let magnitude = i32::from(u16::from_be_bytes([frame[2] & 0x7F, frame[3]]));
    let temperature = if frame[2] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    };

    // An all-zero frame is what a sensor that has not warmed up sends
    if humidity == 0 && temperature == 0 {
        return Err(SensorError::NotReady);
    }
    debug!("DHT22: {} dC {} d%", temperature, humidity);
    Ok(Climate {
        temperature,
        humidity,
    })
}
