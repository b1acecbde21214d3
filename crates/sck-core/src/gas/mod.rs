//! Gas concentration sampling on top of the analog front end.
//!
//! Each cycle heats both MICS elements to their target current, then derives
//! the sensing resistance from the divider voltage. When the resistance lands
//! outside the band around the load resistor the load is moved to match and
//! the channel is measured again, once.

pub mod heater;

use embedded_hal_async::delay::DelayNs;
use log::{debug, info};

use crate::afe::{AnalogFrontEnd, AnalogSampler, DigitalPot, GasChannel};

pub use heater::{GasAction, GasDutyCycle, HeaterLines, HeaterSwitch};

/// Half-width of the window around the load resistor that needs no re-ranging (Ω).
pub const RERANGE_BAND_OHMS: f32 = 1000.0;

/// Smallest load resistance the re-ranging step programs (Ω).
pub const MIN_LOAD_OHMS: f32 = 2000.0;

/// Settle time after moving the load resistor.
pub const RERANGE_SETTLE_MS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Heating,
    Measuring,
    Reranging,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSample {
    /// Sensing element resistance (Ω)
    pub ohms: f32,
    /// Whether the load resistor was moved during this sample
    pub reranged: bool,
}

/// Resistances of both gas channels from one cycle (Ω).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GasResistances {
    pub co: f32,
    pub no2: f32,
}

impl GasResistances {
    /// Whole ohms, the unit carried in readings.
    pub fn as_ohms(&self) -> (i32, i32) {
        (self.co as i32, self.no2 as i32)
    }
}

/// What the node needs from the gas subsystem each cycle.
pub trait GasSampling {
    fn sample_all_channels(&mut self) -> impl Future<Output = GasResistances>;

    fn set_heaters(&mut self, on: bool) -> impl Future<Output = ()>;

    /// Rail in millivolts that the next conversions are scaled against.
    fn set_supply_mv(&mut self, supply_mv: f32);
}

pub struct GasSampler<P, A, D, H> {
    afe: AnalogFrontEnd<P, A>,
    delay: D,
    heaters: H,
    states: [ChannelState; 2],
    last: [f32; 2],
}

impl<P, A, D, H> GasSampler<P, A, D, H>
where
    P: DigitalPot,
    A: AnalogSampler,
    D: DelayNs,
    H: HeaterSwitch,
{
    pub fn new(afe: AnalogFrontEnd<P, A>, delay: D, heaters: H) -> Self {
        Self {
            afe,
            delay,
            heaters,
            states: [ChannelState::Idle; 2],
            last: [0.0; 2],
        }
    }

    /// Power the heaters and program the start-up setpoints.
    pub async fn begin(&mut self) {
        self.heaters.set_heaters(true);
        self.afe.begin().await;
        info!("Gas front end ready");
    }

    pub fn state(&self, channel: GasChannel) -> ChannelState {
        self.states[channel.index()]
    }

    /// Resistance from the most recent completed sample of `channel`.
    pub fn last_resistance(&self, channel: GasChannel) -> f32 {
        self.last[channel.index()]
    }

    pub fn front_end_mut(&mut self) -> &mut AnalogFrontEnd<P, A> {
        &mut self.afe
    }

    /// Sensing resistance from the divider: `Rs = (VMICS - VL) / VL * RL`.
    pub async fn measure_resistance(&mut self, channel: GasChannel) -> f32 {
        let (sense, divider_mv) = {
            let profile = self.afe.profile().channel(channel);
            (profile.load_sense, profile.divider_mv)
        };

        let load_ohms = self.afe.read_load_resistance(channel).await;
        let load_mv = self.afe.sample_mv(sense).await.min(divider_mv);
        let ohms = ((divider_mv - load_mv) / load_mv) * load_ohms;

        debug!(
            "{} divider: {:.1} mV over {:.0} Ohm load, Rs {:.0} Ohm",
            channel.name(),
            load_mv,
            load_ohms,
            ohms
        );
        ohms
    }

    /// Measure `channel`, re-ranging the load resistor at most once.
    pub async fn sample_channel(&mut self, channel: GasChannel) -> ChannelSample {
        let idx = channel.index();
        self.states[idx] = ChannelState::Measuring;

        let mut ohms = self.measure_resistance(channel).await;
        let load_ohms = self.afe.read_load_resistance(channel).await;
        let reranged =
            ohms <= load_ohms - RERANGE_BAND_OHMS || ohms >= load_ohms + RERANGE_BAND_OHMS;

        if reranged {
            self.states[idx] = ChannelState::Reranging;
            let target = ohms.max(MIN_LOAD_OHMS);
            debug!(
                "{} out of band ({:.0} vs {:.0} Ohm), load -> {:.0} Ohm",
                channel.name(),
                ohms,
                load_ohms,
                target
            );
            self.afe.set_load_resistance(channel, target as u32).await;
            self.delay.delay_ms(RERANGE_SETTLE_MS).await;

            self.states[idx] = ChannelState::Measuring;
            ohms = self.measure_resistance(channel).await;
        }

        self.states[idx] = ChannelState::Idle;
        ChannelSample { ohms, reranged }
    }

    /// Heat every channel, then sample every channel.
    pub async fn sample_all_channels(&mut self) -> GasResistances {
        for channel in GasChannel::ALL {
            self.states[channel.index()] = ChannelState::Heating;
            let target_ma = self.afe.profile().channel(channel).target_current_ma;
            self.afe.heat_to_current(channel, target_ma).await;
        }

        for channel in GasChannel::ALL {
            let sample = self.sample_channel(channel).await;
            self.last[channel.index()] = sample.ohms;
        }

        GasResistances {
            co: self.last[GasChannel::Co.index()],
            no2: self.last[GasChannel::No2.index()],
        }
    }
}

impl<P, A, D, H> GasSampling for GasSampler<P, A, D, H>
where
    P: DigitalPot,
    A: AnalogSampler,
    D: DelayNs,
    H: HeaterSwitch,
{
    async fn sample_all_channels(&mut self) -> GasResistances {
        GasSampler::sample_all_channels(self).await
    }

    async fn set_heaters(&mut self, on: bool) {
        self.heaters.set_heaters(on);
    }

    fn set_supply_mv(&mut self, supply_mv: f32) {
        self.afe.set_supply_mv(supply_mv);
    }
}
