//! Analog front end of the MICS gas sensors.
//!
//! Each gas channel has a heater driven by a regulator whose output is set by
//! a digital potentiometer, and a sensing element read through a voltage
//! divider whose load resistor is a second potentiometer. The front end maps
//! millivolts and ohms onto potentiometer codes, reads them back, and applies
//! the heater current correction.
//!
//! Nothing in here fails loudly. Setpoints clamp to the potentiometer range
//! and bus errors are logged and absorbed; a register that cannot be read
//! back reports the last code written to it.

pub mod mcp46x1;
pub mod profile;

use core::fmt::Debug;

use heapless::LinearMap;
use log::{debug, warn};

pub use mcp46x1::Mcp46x1Pair;
pub use profile::{ChannelProfile, FrontEndProfile};

/// Full-scale reading of the analog sampling sink.
pub const ADC_FULL_SCALE: u16 = 1023;

/// Analog inputs routed to the ADC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogInput {
    /// CO load resistor
    S0,
    /// NO2 load resistor
    S1,
    /// CO heater current sense
    S2,
    /// NO2 heater current sense
    S3,
    /// Microphone envelope
    S4,
    /// Light-dependent resistor (rev 1.0)
    S5,
}

/// Averaging ADC front.
pub trait AnalogSampler {
    /// Averaged reading of `input` in raw ADC units, nominally `0..=1023`.
    fn average(&mut self, input: AnalogInput) -> impl Future<Output = u16>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PotChip {
    Mcp1,
    Mcp2,
}

/// One wiper register on one potentiometer chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PotAddress {
    pub chip: PotChip,
    pub register: u8,
}

impl PotAddress {
    pub const fn new(chip: PotChip, register: u8) -> Self {
        Self { chip, register }
    }
}

/// Digital potentiometer sink, codes `0..=steps`.
pub trait DigitalPot {
    type Error: Debug;

    fn write_wiper(
        &mut self,
        pot: PotAddress,
        code: u16,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    fn read_wiper(&mut self, pot: PotAddress) -> impl Future<Output = Result<u16, Self::Error>>;
}

/// The two physical gas channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasChannel {
    /// Reducing gas element (MICS-5525 or the red side of a MICS-4514)
    Co,
    /// Oxidising gas element (MICS-2710 or the ox side of a MICS-4514)
    No2,
}

impl GasChannel {
    pub const ALL: [GasChannel; 2] = [GasChannel::Co, GasChannel::No2];

    pub const fn index(self) -> usize {
        match self {
            GasChannel::Co => 0,
            GasChannel::No2 => 1,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            GasChannel::Co => "CO",
            GasChannel::No2 => "NO2",
        }
    }
}

/// Outcome of one heater current correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaterCorrection {
    pub measured_current_ma: f32,
    pub heater_ohms: f32,
    pub applied_mv: u32,
}

const SHADOW_SLOTS: usize = 8;

/// Analog front-end controller for both gas channels.
pub struct AnalogFrontEnd<P, A> {
    pots: P,
    adc: A,
    profile: FrontEndProfile,
    supply_mv: f32,
    shadow: LinearMap<PotAddress, u16, SHADOW_SLOTS>,
}

impl<P: DigitalPot, A: AnalogSampler> AnalogFrontEnd<P, A> {
    pub fn new(pots: P, adc: A, profile: FrontEndProfile) -> Self {
        let supply_mv = profile.supply_mv;
        Self {
            pots,
            adc,
            profile,
            supply_mv,
            shadow: LinearMap::new(),
        }
    }

    pub fn profile(&self) -> &FrontEndProfile {
        &self.profile
    }

    pub fn supply_mv(&self) -> f32 {
        self.supply_mv
    }

    /// Replace the supply voltage used to scale ADC counts.
    pub fn set_supply_mv(&mut self, supply_mv: f32) {
        self.supply_mv = supply_mv;
    }

    /// Program the power-up heater and load setpoints on both channels.
    pub async fn begin(&mut self) {
        for channel in GasChannel::ALL {
            let heater_mv = self.profile.channel(channel).startup_heater_mv;
            self.set_heater_voltage(channel, heater_mv).await;
        }
        for channel in GasChannel::ALL {
            self.set_load_resistance(channel, self.profile.startup_load_ohms)
                .await;
        }
    }

    /// Set the heater regulator output. Returns the code written.
    pub async fn set_heater_voltage(&mut self, channel: GasChannel, millivolts: u32) -> u16 {
        let code = self.profile.heater_code(millivolts);
        let pot = self.profile.channel(channel).heater_pot;
        self.write_pot(pot, code).await;
        code
    }

    pub async fn read_heater_voltage(&mut self, channel: GasChannel) -> f32 {
        let pot = self.profile.channel(channel).heater_pot;
        let code = self.read_pot(pot).await;
        self.profile.heater_millivolts(code)
    }

    /// Set the divider load resistor. Returns the code written.
    pub async fn set_load_resistance(&mut self, channel: GasChannel, ohms: u32) -> u16 {
        let code = self.profile.load_code(ohms);
        let pot = self.profile.channel(channel).load_pot;
        self.write_pot(pot, code).await;
        code
    }

    pub async fn read_load_resistance(&mut self, channel: GasChannel) -> f32 {
        let pot = self.profile.channel(channel).load_pot;
        let code = self.read_pot(pot).await;
        self.profile.load_ohms(code)
    }

    /// Averaged input voltage in millivolts.
    pub async fn sample_mv(&mut self, input: AnalogInput) -> f32 {
        let raw = self.adc.average(input).await.min(ADC_FULL_SCALE);
        f32::from(raw) * self.supply_mv / f32::from(ADC_FULL_SCALE)
    }

    /// One proportional correction of the heater drive towards `target_ma`.
    ///
    /// Derives the heater resistance from the current through the reference
    /// resistor and the programmed regulator output, then programs the
    /// voltage that would push `target_ma` through heater plus reference.
    /// With no measurable current the heater resistance is unbounded and the
    /// setpoint saturates at full scale.
    pub async fn heat_to_current(&mut self, channel: GasChannel, target_ma: f32) -> HeaterCorrection {
        let (sense, reference_ohms) = {
            let profile = self.profile.channel(channel);
            (profile.heater_sense, profile.reference_ohms)
        };

        let sense_mv = self.sample_mv(sense).await;
        let current_ma = sense_mv / reference_ohms;
        let heater_ohms = (self.read_heater_voltage(channel).await - sense_mv) / current_ma;
        let target_mv = (heater_ohms + reference_ohms) * target_ma;

        // Float to int casts saturate: NaN and negatives land on 0.
        let applied_mv = target_mv as u32;
        self.set_heater_voltage(channel, applied_mv).await;

        debug!(
            "{} heater: {:.2} mA through {:.1} Ohm, correcting to {} mV",
            channel.name(),
            current_ma,
            heater_ohms,
            applied_mv
        );

        HeaterCorrection {
            measured_current_ma: current_ma,
            heater_ohms,
            applied_mv,
        }
    }

    /// Direct access to the potentiometers, for collaborators on the same chips.
    pub fn pots_mut(&mut self) -> &mut P {
        &mut self.pots
    }

    async fn write_pot(&mut self, pot: PotAddress, code: u16) {
        if let Err(e) = self.pots.write_wiper(pot, code).await {
            warn!("Digipot write {:?} <- {} failed: {:?}", pot, code, e);
        }
        if self.shadow.insert(pot, code).is_err() {
            warn!("Digipot shadow table full, {:?} not tracked", pot);
        }
    }

    async fn read_pot(&mut self, pot: PotAddress) -> u16 {
        match self.pots.read_wiper(pot).await {
            Ok(code) => code.min(self.profile.pot_steps),
            Err(e) => {
                let fallback = self.shadow.get(&pot).copied().unwrap_or(0);
                warn!("Digipot read {:?} failed: {:?}, using {}", pot, e, fallback);
                fallback
            }
        }
    }
}
