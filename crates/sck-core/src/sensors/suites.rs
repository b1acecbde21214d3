//! Per-revision light, noise and supply handling.
//!
//! Rev 1.0 runs from a fixed 5 V rail. Rev 1.1 measures its 3.3 V rail
//! before each gas sample and scales noise with the same figure.

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use log::warn;

use super::{
    Bh1730, Climate, ClimateSensor, PowerMonitor, PowerReading, SensorSuite, SupplyMonitor,
};
use crate::afe::{ADC_FULL_SCALE, AnalogInput, AnalogSampler, DigitalPot, PotAddress, PotChip};

/// DHT22 reads are retried this many times.
const DHT_ATTEMPTS: u8 = 5;
const DHT_RETRY_MS: u32 = 3000;

/// Noise amplifier stages, one resistor each.
const GAIN_POTS: [PotAddress; 2] = [
    PotAddress::new(PotChip::Mcp2, 0x00),
    PotAddress::new(PotChip::Mcp2, 0x01),
];
/// Full-scale code: 100 kOhm on both stages, a gain of 10000.
const NOISE_GAIN_CODE: u16 = 256;
/// Pause after the gain change, then again before the microphone is read.
const GAIN_SETTLE_MS: u32 = 100;
const NOISE_SETTLE_MS: u32 = 100;

/// Nominal rails of the two revisions.
const REV10_SUPPLY_MV: f32 = 5000.0;
const REV11_SUPPLY_MV: f32 = 3300.0;
/// Measured rail values outside this window are discarded.
const SUPPLY_WINDOW_MV: core::ops::RangeInclusive<f32> = 2500.0..=5500.0;

fn scale_mv(raw: u16, supply_mv: f32) -> i32 {
    (f32::from(raw.min(ADC_FULL_SCALE)) / f32::from(ADC_FULL_SCALE) * supply_mv) as i32
}

/// 5 V board: DHT22, LDR on S5, microphone on S4.
pub struct Rev10Suite<C, A, W, D> {
    climate: C,
    adc: A,
    power: W,
    delay: D,
    supply_mv: f32,
}

impl<C, A, W, D> Rev10Suite<C, A, W, D>
where
    C: ClimateSensor,
    A: AnalogSampler,
    W: PowerMonitor,
    D: DelayNs,
{
    pub fn new(climate: C, adc: A, power: W, delay: D) -> Self {
        Self {
            climate,
            adc,
            power,
            delay,
            supply_mv: REV10_SUPPLY_MV,
        }
    }
}

impl<C, A, W, D> SensorSuite for Rev10Suite<C, A, W, D>
where
    C: ClimateSensor,
    A: AnalogSampler,
    W: PowerMonitor,
    D: DelayNs,
{
    async fn climate(&mut self) -> Option<Climate> {
        for attempt in 1..=DHT_ATTEMPTS {
            match self.climate.read().await {
                Ok(climate) => return Some(climate),
                Err(e) => {
                    warn!("DHT22 read {}/{} failed: {:?}", attempt, DHT_ATTEMPTS, e);
                    if attempt < DHT_ATTEMPTS {
                        self.delay.delay_ms(DHT_RETRY_MS).await;
                    }
                }
            }
        }
        None
    }

    async fn light(&mut self) -> i32 {
        let raw = i32::from(self.adc.average(AnalogInput::S5).await);
        (raw * 1000 / i32::from(ADC_FULL_SCALE)).clamp(0, 1000)
    }

    async fn noise(&mut self) -> i32 {
        let raw = self.adc.average(AnalogInput::S4).await;
        scale_mv(raw, self.supply_mv)
    }

    async fn power(&mut self) -> PowerReading {
        self.power.read().await
    }

    async fn measure_supply(&mut self) -> f32 {
        self.supply_mv
    }
}

/// 3.3 V board: SHT21, BH1730 and a two-stage noise amplifier on MCP2.
pub struct Rev11Suite<C, I, P, A, W, S, D> {
    climate: C,
    light: Bh1730<I>,
    gain_pots: P,
    adc: A,
    power: W,
    supply: S,
    delay: D,
    /// Last accepted rail measurement
    supply_mv: f32,
}

impl<C, I, P, A, W, S, D> Rev11Suite<C, I, P, A, W, S, D>
where
    C: ClimateSensor,
    I: I2c,
    P: DigitalPot,
    A: AnalogSampler,
    W: PowerMonitor,
    S: SupplyMonitor,
    D: DelayNs,
{
    pub fn new(
        climate: C,
        light: Bh1730<I>,
        gain_pots: P,
        adc: A,
        power: W,
        supply: S,
        delay: D,
    ) -> Self {
        Self {
            climate,
            light,
            gain_pots,
            adc,
            power,
            supply,
            delay,
            supply_mv: REV11_SUPPLY_MV,
        }
    }

    pub fn gain_pots_mut(&mut self) -> &mut P {
        &mut self.gain_pots
    }

    pub fn supply_mv(&self) -> f32 {
        self.supply_mv
    }
}

impl<C, I, P, A, W, S, D> SensorSuite for Rev11Suite<C, I, P, A, W, S, D>
where
    C: ClimateSensor,
    I: I2c,
    P: DigitalPot,
    A: AnalogSampler,
    W: PowerMonitor,
    S: SupplyMonitor,
    D: DelayNs,
{
    async fn climate(&mut self) -> Option<Climate> {
        match self.climate.read().await {
            Ok(climate) => Some(climate),
            Err(e) => {
                warn!("SHT21 read failed: {:?}", e);
                None
            }
        }
    }

    async fn light(&mut self) -> i32 {
        self.light.read_light(&mut self.delay).await.unwrap_or(0)
    }

    async fn noise(&mut self) -> i32 {
        for pot in GAIN_POTS {
            if let Err(e) = self.gain_pots.write_wiper(pot, NOISE_GAIN_CODE).await {
                warn!("Noise gain {:?} not set: {:?}", pot, e);
            }
        }
        self.delay.delay_ms(GAIN_SETTLE_MS).await;
        self.delay.delay_ms(NOISE_SETTLE_MS).await;

        let raw = self.adc.average(AnalogInput::S4).await;
        scale_mv(raw, self.supply_mv)
    }

    async fn power(&mut self) -> PowerReading {
        self.power.read().await
    }

    async fn measure_supply(&mut self) -> f32 {
        match self.supply.read_supply_mv().await {
            Some(mv) if SUPPLY_WINDOW_MV.contains(&mv) => self.supply_mv = mv,
            Some(mv) => warn!("Supply reading {} mV discarded, keeping {}", mv, self.supply_mv),
            None => warn!("Supply not measured, keeping {} mV", self.supply_mv),
        }
        self.supply_mv
    }
}

/// Runtime choice between the two board revisions.
pub enum BoardSuite<R10, R11> {
    Rev10(R10),
    Rev11(R11),
}

impl<R10: SensorSuite, R11: SensorSuite> SensorSuite for BoardSuite<R10, R11> {
    async fn climate(&mut self) -> Option<Climate> {
        match self {
            BoardSuite::Rev10(suite) => suite.climate().await,
            BoardSuite::Rev11(suite) => suite.climate().await,
        }
    }

    async fn light(&mut self) -> i32 {
        match self {
            BoardSuite::Rev10(suite) => suite.light().await,
            BoardSuite::Rev11(suite) => suite.light().await,
        }
    }

    async fn noise(&mut self) -> i32 {
        match self {
            BoardSuite::Rev10(suite) => suite.noise().await,
            BoardSuite::Rev11(suite) => suite.noise().await,
        }
    }

    async fn power(&mut self) -> PowerReading {
        match self {
            BoardSuite::Rev10(suite) => suite.power().await,
            BoardSuite::Rev11(suite) => suite.power().await,
        }
    }

    async fn measure_supply(&mut self) -> f32 {
        match self {
            BoardSuite::Rev10(suite) => suite.measure_supply().await,
            BoardSuite::Rev11(suite) => suite.measure_supply().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockPots, MockSampler, RecordingDelay};
    use alloc::vec;
    use alloc::vec::Vec;
    use embassy_futures::block_on;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};

    struct FlakyClimate {
        failures: u8,
        calls: u8,
    }

    impl ClimateSensor for FlakyClimate {
        type Error = &'static str;

        async fn read(&mut self) -> Result<Climate, Self::Error> {
            self.calls += 1;
            if self.calls <= self.failures {
                Err("checksum")
            } else {
                Ok(Climate {
                    temperature: 215,
                    humidity: 480,
                })
            }
        }
    }

    struct FixedPower;

    impl PowerMonitor for FixedPower {
        async fn read(&mut self) -> PowerReading {
            PowerReading {
                battery: 875,
                panel: 0,
            }
        }
    }

    /// Replays rail readings in order, then reports failure.
    struct ScriptedSupply(Vec<Option<f32>>);

    impl SupplyMonitor for ScriptedSupply {
        async fn read_supply_mv(&mut self) -> Option<f32> {
            if self.0.is_empty() {
                None
            } else {
                self.0.remove(0)
            }
        }
    }

    type TestRev10 = Rev10Suite<FlakyClimate, MockSampler, FixedPower, RecordingDelay>;

    fn rev10(failures: u8, adc: MockSampler) -> (TestRev10, RecordingDelay) {
        let delay = RecordingDelay::new();
        let climate = FlakyClimate { failures, calls: 0 };
        (Rev10Suite::new(climate, adc, FixedPower, delay.clone()), delay)
    }

    #[test]
    fn test_rev10_climate_retries_with_pause() {
        let (mut suite, delay) = rev10(2, MockSampler::new());

        let climate = block_on(suite.climate());

        assert_eq!(climate, Some(Climate { temperature: 215, humidity: 480 }));
        assert_eq!(delay.total_ms(), 2 * 3000);
    }

    #[test]
    fn test_rev10_climate_gives_up_after_five() {
        let (mut suite, delay) = rev10(10, MockSampler::new());

        assert_eq!(block_on(suite.climate()), None);
        assert_eq!(suite.climate.calls, 5);
        assert_eq!(delay.count(), 4);
    }

    #[test]
    fn test_rev10_light_maps_to_per_mille() {
        let (mut suite, _) = rev10(0, MockSampler::new().with(AnalogInput::S5, 512));
        assert_eq!(block_on(suite.light()), 500);

        let (mut suite, _) = rev10(0, MockSampler::new().with(AnalogInput::S5, 1023));
        assert_eq!(block_on(suite.light()), 1000);
    }

    #[test]
    fn test_rev10_noise_scales_to_supply() {
        let (mut suite, _) = rev10(0, MockSampler::new().with(AnalogInput::S4, 1023));
        assert_eq!(block_on(suite.noise()), 5000);
    }

    type TestRev11 = Rev11Suite<
        FlakyClimate,
        I2cMock,
        MockPots,
        MockSampler,
        FixedPower,
        ScriptedSupply,
        RecordingDelay,
    >;

    fn rev11(
        i2c: &I2cMock,
        noise_raw: u16,
        supply: Vec<Option<f32>>,
    ) -> (TestRev11, RecordingDelay) {
        let delay = RecordingDelay::new();
        let suite = Rev11Suite::new(
            FlakyClimate { failures: 1, calls: 0 },
            Bh1730::new(i2c.clone()),
            MockPots::new(),
            MockSampler::new().with(AnalogInput::S4, noise_raw),
            FixedPower,
            ScriptedSupply(supply),
            delay.clone(),
        );
        (suite, delay)
    }

    #[test]
    fn test_rev10_supply_is_fixed() {
        let (mut suite, _) = rev10(0, MockSampler::new());
        assert_eq!(block_on(suite.measure_supply()), 5000.0);
    }

    #[test]
    fn test_rev11_noise_sets_gain_first() {
        let expectations: [I2cTransaction; 0] = [];
        let mut i2c = I2cMock::new(&expectations);
        let (mut suite, delay) = rev11(&i2c, 310, Vec::new());

        let noise = block_on(suite.noise());

        // 310 / 1023 * 3300 = 1000.0
        assert!((999..=1000).contains(&noise), "got {}", noise);
        // Settle after the gain write, then again before the read
        assert_eq!(delay.total_ms(), 200);
        assert_eq!(delay.count(), 2);
        for pot in GAIN_POTS {
            assert_eq!(suite.gain_pots_mut().code(pot), Some(NOISE_GAIN_CODE));
        }
        assert_eq!(block_on(suite.climate()), None);
        i2c.done();
    }

    #[test]
    fn test_rev11_noise_follows_measured_supply() {
        let expectations: [I2cTransaction; 0] = [];
        let mut i2c = I2cMock::new(&expectations);
        let (mut suite, _) = rev11(&i2c, 1023, vec![Some(3100.0)]);

        assert_eq!(block_on(suite.measure_supply()), 3100.0);
        assert_eq!(block_on(suite.noise()), 3100);
        i2c.done();
    }

    #[test]
    fn test_rev11_keeps_last_supply_on_bad_reading() {
        let expectations: [I2cTransaction; 0] = [];
        let mut i2c = I2cMock::new(&expectations);
        let (mut suite, _) = rev11(&i2c, 1023, vec![Some(3200.0), Some(120.0), None]);

        assert_eq!(block_on(suite.measure_supply()), 3200.0);
        assert_eq!(block_on(suite.measure_supply()), 3200.0);
        assert_eq!(block_on(suite.measure_supply()), 3200.0);
        assert_eq!(suite.supply_mv(), 3200.0);
        i2c.done();
    }

    #[test]
    fn test_board_suite_dispatches() {
        let (rev10, _) = rev10(0, MockSampler::new().with(AnalogInput::S5, 1023));
        let mut suite: BoardSuite<_, TestRev10> = BoardSuite::Rev10(rev10);

        assert_eq!(block_on(suite.light()), 1000);
        assert_eq!(block_on(suite.power()).battery, 875);
        assert_eq!(block_on(suite.measure_supply()), 5000.0);
    }
}
