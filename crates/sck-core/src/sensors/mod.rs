//! Board sensors other than the gas channels.
//!
//! The climate chip and the power monitor are collaborators behind small
//! traits. Light and noise are read here, differently per board revision;
//! [`BoardSuite`] picks the revision at runtime.

pub mod bh1730;
pub mod dht22;
pub mod sht21;
pub mod suites;

use core::fmt::Debug;

pub use bh1730::Bh1730;
pub use dht22::Dht22;
pub use sht21::Sht21;
pub use suites::{BoardSuite, Rev10Suite, Rev11Suite};

/// Raw climate values as the chip reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Climate {
    pub temperature: i32,
    pub humidity: i32,
}

/// Temperature and humidity chip (DHT22 on rev 1.0, SHT21 on rev 1.1).
pub trait ClimateSensor {
    type Error: Debug;

    fn read(&mut self) -> impl Future<Output = Result<Climate, Self::Error>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerReading {
    /// Battery charge in deci-percent
    pub battery: i32,
    /// Solar panel output in percent
    pub panel: i32,
}

/// Battery and solar panel sensing.
pub trait PowerMonitor {
    fn read(&mut self) -> impl Future<Output = PowerReading>;
}

/// Measures the rail that every analog conversion is scaled against.
pub trait SupplyMonitor {
    /// Millivolts, `None` when the measurement failed.
    fn read_supply_mv(&mut self) -> impl Future<Output = Option<f32>>;
}

/// Everything a sampling cycle reads besides gas.
pub trait SensorSuite {
    /// `None` when the climate chip did not answer.
    fn climate(&mut self) -> impl Future<Output = Option<Climate>>;

    /// Light level in deci-lux (rev 1.1) or LDR per-mille (rev 1.0).
    fn light(&mut self) -> impl Future<Output = i32>;

    /// Microphone envelope in millivolts.
    fn noise(&mut self) -> impl Future<Output = i32>;

    fn power(&mut self) -> impl Future<Output = PowerReading>;

    /// Supply in millivolts to scale analog readings with. Boards with a
    /// measured rail refresh it here; the value is also kept for `noise`.
    fn measure_supply(&mut self) -> impl Future<Output = f32>;
}
