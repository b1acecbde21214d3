//! ESP32-S3 pin assignment for the sensor board.
//!
//! | Signal               | GPIO   |
//! |----------------------|--------|
//! | S0..S5 analog inputs | 1..6   |
//! | Battery sense        | 7      |
//! | Panel sense          | 8      |
//! | Supply rail sense    | 9      |
//! | I2C SDA / SCL        | 13/14  |
//! | Heater lines IO0..2  | 15..17 |
//! | IO3                  | 18     |
//!
//! IO3 powers the sensor rail on rev 1.1 and carries the DHT22 data line on
//! rev 1.0.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcConfig, AdcPin, Attenuation};
use embassy_time::Delay;
use esp_hal::gpio::{DriveMode, Flex, Level, Output, OutputConfig, Pull};
use esp_hal::peripherals::{
    ADC1, GPIO1, GPIO2, GPIO3, GPIO4, GPIO5, GPIO6, GPIO7, GPIO8, GPIO9, GPIO15, GPIO16, GPIO17,
    GPIO18,
};
use sck_core::afe::{AnalogInput, AnalogSampler};
use sck_core::gas::HeaterLines;
use sck_core::sensors::{Dht22, PowerMonitor, PowerReading, SupplyMonitor};

/// Conversions averaged per sample.
const OVERSAMPLE: u32 = 16;

/// Battery, panel and supply rail sit behind 1:2 dividers.
const SENSE_DIVIDER: u32 = 2;
const ADC_REFERENCE_MV: u32 = 3100;
const BATTERY_EMPTY_MV: u32 = 3300;
const BATTERY_FULL_MV: u32 = 4200;
const PANEL_FULL_MV: u32 = 6000;

pub type SharedBoardAdc = Mutex<CriticalSectionRawMutex, BoardAdc>;

pub struct BoardAdc {
    adc: Adc<'static, ADC1<'static>, Blocking>,
    s0: AdcPin<GPIO1<'static>, ADC1<'static>>,
    s1: AdcPin<GPIO2<'static>, ADC1<'static>>,
    s2: AdcPin<GPIO3<'static>, ADC1<'static>>,
    s3: AdcPin<GPIO4<'static>, ADC1<'static>>,
    s4: AdcPin<GPIO5<'static>, ADC1<'static>>,
    s5: AdcPin<GPIO6<'static>, ADC1<'static>>,
    battery: AdcPin<GPIO7<'static>, ADC1<'static>>,
    panel: AdcPin<GPIO8<'static>, ADC1<'static>>,
    supply: AdcPin<GPIO9<'static>, ADC1<'static>>,
}

/// Pins handed to [`BoardAdc::new`], in input order.
pub struct AnalogPins {
    pub s0: GPIO1<'static>,
    pub s1: GPIO2<'static>,
    pub s2: GPIO3<'static>,
    pub s3: GPIO4<'static>,
    pub s4: GPIO5<'static>,
    pub s5: GPIO6<'static>,
    pub battery: GPIO7<'static>,
    pub panel: GPIO8<'static>,
    pub supply: GPIO9<'static>,
}

#[derive(Clone, Copy)]
enum Channel {
    Input(AnalogInput),
    Battery,
    Panel,
    Supply,
}

impl BoardAdc {
    pub fn new(adc1: ADC1<'static>, pins: AnalogPins) -> Self {
        let mut config = AdcConfig::new();
        let s0 = config.enable_pin(pins.s0, Attenuation::_11dB);
        let s1 = config.enable_pin(pins.s1, Attenuation::_11dB);
        let s2 = config.enable_pin(pins.s2, Attenuation::_11dB);
        let s3 = config.enable_pin(pins.s3, Attenuation::_11dB);
        let s4 = config.enable_pin(pins.s4, Attenuation::_11dB);
        let s5 = config.enable_pin(pins.s5, Attenuation::_11dB);
        let battery = config.enable_pin(pins.battery, Attenuation::_11dB);
        let panel = config.enable_pin(pins.panel, Attenuation::_11dB);
        let supply = config.enable_pin(pins.supply, Attenuation::_11dB);
        Self {
            adc: Adc::new(adc1, config),
            s0,
            s1,
            s2,
            s3,
            s4,
            s5,
            battery,
            panel,
            supply,
        }
    }

    /// One 12-bit conversion; spins until the ADC has a result.
    fn convert(&mut self, channel: Channel) -> u16 {
        loop {
            let result = match channel {
                Channel::Input(AnalogInput::S0) => self.adc.read_oneshot(&mut self.s0),
                Channel::Input(AnalogInput::S1) => self.adc.read_oneshot(&mut self.s1),
                Channel::Input(AnalogInput::S2) => self.adc.read_oneshot(&mut self.s2),
                Channel::Input(AnalogInput::S3) => self.adc.read_oneshot(&mut self.s3),
                Channel::Input(AnalogInput::S4) => self.adc.read_oneshot(&mut self.s4),
                Channel::Input(AnalogInput::S5) => self.adc.read_oneshot(&mut self.s5),
                Channel::Battery => self.adc.read_oneshot(&mut self.battery),
                Channel::Panel => self.adc.read_oneshot(&mut self.panel),
                Channel::Supply => self.adc.read_oneshot(&mut self.supply),
            };
            if let Ok(raw) = result {
                return raw;
            }
        }
    }

    fn oversample(&mut self, channel: Channel) -> u32 {
        let sum: u32 = (0..OVERSAMPLE).map(|_| u32::from(self.convert(channel))).sum();
        sum / OVERSAMPLE
    }

    fn sense_mv(&mut self, channel: Channel) -> u32 {
        self.oversample(channel) * ADC_REFERENCE_MV * SENSE_DIVIDER / 4095
    }
}

impl AnalogSampler for BoardAdc {
    async fn average(&mut self, input: AnalogInput) -> u16 {
        // 12-bit conversions, reported on the 10-bit scale of the front end
        (self.oversample(Channel::Input(input)) >> 2) as u16
    }
}

/// Battery and solar panel sensing over the shared ADC.
pub struct BoardPower {
    adc: &'static SharedBoardAdc,
}

impl BoardPower {
    pub fn new(adc: &'static SharedBoardAdc) -> Self {
        Self { adc }
    }
}

impl PowerMonitor for BoardPower {
    async fn read(&mut self) -> PowerReading {
        let mut adc = self.adc.lock().await;
        let battery_mv = adc.sense_mv(Channel::Battery);
        let panel_mv = adc.sense_mv(Channel::Panel);

        let span = BATTERY_FULL_MV - BATTERY_EMPTY_MV;
        let battery = battery_mv.clamp(BATTERY_EMPTY_MV, BATTERY_FULL_MV) - BATTERY_EMPTY_MV;
        PowerReading {
            battery: (battery * 1000 / span) as i32,
            panel: (panel_mv.min(PANEL_FULL_MV) * 100 / PANEL_FULL_MV) as i32,
        }
    }
}

/// Rail measurement feeding the rev 1.1 gas and noise scaling.
pub struct BoardSupply {
    adc: &'static SharedBoardAdc,
}

impl BoardSupply {
    pub fn new(adc: &'static SharedBoardAdc) -> Self {
        Self { adc }
    }
}

impl SupplyMonitor for BoardSupply {
    async fn read_supply_mv(&mut self) -> Option<f32> {
        let mv = self.adc.lock().await.sense_mv(Channel::Supply);
        // A dead divider reads as zero
        (mv > 0).then_some(mv as f32)
    }
}

/// IO0..IO2, wired the same on both revisions.
pub struct HeaterPins {
    pub io0: GPIO15<'static>,
    pub io1: GPIO16<'static>,
    pub io2: GPIO17<'static>,
}

impl HeaterPins {
    fn outputs(self) -> [Output<'static>; 3] {
        let out = OutputConfig::default();
        [
            Output::new(self.io0, Level::Low, out),
            Output::new(self.io1, Level::Low, out),
            Output::new(self.io2, Level::Low, out),
        ]
    }
}

/// Rev 1.1: all four lines drive the heater supply.
pub fn rev11_heater_lines(pins: HeaterPins, io3: GPIO18<'static>) -> HeaterLines<Output<'static>> {
    let [io0, io1, io2] = pins.outputs();
    let io3 = Output::new(io3, Level::Low, OutputConfig::default());
    HeaterLines::rev11(io0, io1, io2, io3)
}

/// Rev 1.0: three heater lines, IO3 becomes the open-drain DHT22 line.
pub fn rev10_heater_lines(
    pins: HeaterPins,
    io3: GPIO18<'static>,
) -> (HeaterLines<Output<'static>>, Dht22<Flex<'static>, Delay>) {
    let [io0, io1, io2] = pins.outputs();

    let mut data = Flex::new(io3);
    data.apply_output_config(
        &OutputConfig::default()
            .with_drive_mode(DriveMode::OpenDrain)
            .with_pull(Pull::Up),
    );
    data.set_high();
    data.set_output_enable(true);
    data.set_input_enable(true);

    (HeaterLines::rev10(io0, io1, io2), Dht22::new(data, Delay))
}
