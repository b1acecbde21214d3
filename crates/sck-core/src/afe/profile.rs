//! Per-board constants of the gas sensor analog front end.
//!
//! Values describe the resistor networks on each board revision. They set the
//! operating point of the control loop; absolute calibration is done on the
//! server side.

use super::{AnalogInput, GasChannel, PotAddress, PotChip};
use crate::config::BoardRevision;

/// Static wiring and targets of one gas sensor channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelProfile {
    /// Potentiometer setting the heater regulator output
    pub heater_pot: PotAddress,
    /// Potentiometer acting as the divider load resistor
    pub load_pot: PotAddress,
    /// Input measuring the drop across the heater reference resistor
    pub heater_sense: AnalogInput,
    /// Input measuring the voltage across the load resistor
    pub load_sense: AnalogInput,
    /// Heater current-sense resistor (Ω)
    pub reference_ohms: f32,
    /// Voltage feeding the sensor divider (mV)
    pub divider_mv: f32,
    /// Heater current held by the correction step (mA)
    pub target_current_ma: f32,
    /// Heater setpoint programmed at power-up (mV)
    pub startup_heater_mv: u32,
    /// Nominal clean-air sensor resistance (Ω)
    pub baseline_ohms: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrontEndProfile {
    /// Full-scale potentiometer code
    pub pot_steps: u16,
    /// End-to-end potentiometer resistance (kΩ)
    pub pot_span_kohm: f32,
    /// Heater regulator feedback resistor (kΩ)
    pub divider_r1_kohm: f32,
    /// Regulator reference scaling between code offset and millivolts
    pub heater_gain: f32,
    /// Nominal supply used to scale ADC counts (mV)
    pub supply_mv: f32,
    /// Load resistance programmed at power-up (Ω)
    pub startup_load_ohms: u32,
    /// Indexed by [`GasChannel::index`]
    pub channels: [ChannelProfile; 2],
}

const POT_STEPS: u16 = 256;
const POT_SPAN_KOHM: f32 = 100.0;
const DIVIDER_R1_KOHM: f32 = 12.0;
const STARTUP_LOAD_OHMS: u32 = 100_000;

impl FrontEndProfile {
    /// 3.3 V board with SHT21, BH1730 and the MICS-4514 dual sensor.
    pub fn rev11() -> Self {
        Self {
            pot_steps: POT_STEPS,
            pot_span_kohm: POT_SPAN_KOHM,
            divider_r1_kohm: DIVIDER_R1_KOHM,
            heater_gain: 0.41,
            supply_mv: 3300.0,
            startup_load_ohms: STARTUP_LOAD_OHMS,
            channels: [
                ChannelProfile {
                    heater_pot: PotAddress::new(PotChip::Mcp1, 0x00),
                    load_pot: PotAddress::new(PotChip::Mcp1, 0x06),
                    heater_sense: AnalogInput::S2,
                    load_sense: AnalogInput::S0,
                    reference_ohms: 10.0,
                    divider_mv: 2734.0,
                    target_current_ma: 32.0,
                    startup_heater_mv: 2700,
                    baseline_ohms: 750_000.0,
                },
                ChannelProfile {
                    heater_pot: PotAddress::new(PotChip::Mcp1, 0x01),
                    load_pot: PotAddress::new(PotChip::Mcp1, 0x07),
                    heater_sense: AnalogInput::S3,
                    load_sense: AnalogInput::S1,
                    reference_ohms: 10.0,
                    divider_mv: 2734.0,
                    target_current_ma: 26.0,
                    startup_heater_mv: 1700,
                    baseline_ohms: 2_200.0,
                },
            ],
        }
    }

    /// 5 V board with DHT22, LDR and separate MICS-5525 / MICS-2710 sensors.
    pub fn rev10() -> Self {
        Self {
            pot_steps: POT_STEPS,
            pot_span_kohm: POT_SPAN_KOHM,
            divider_r1_kohm: DIVIDER_R1_KOHM,
            heater_gain: 1.2,
            supply_mv: 5000.0,
            startup_load_ohms: STARTUP_LOAD_OHMS,
            channels: [
                ChannelProfile {
                    heater_pot: PotAddress::new(PotChip::Mcp2, 0x00),
                    load_pot: PotAddress::new(PotChip::Mcp1, 0x00),
                    heater_sense: AnalogInput::S2,
                    load_sense: AnalogInput::S0,
                    reference_ohms: 10.0,
                    divider_mv: 4850.0,
                    target_current_ma: 32.0,
                    startup_heater_mv: 2400,
                    baseline_ohms: 750_000.0,
                },
                ChannelProfile {
                    heater_pot: PotAddress::new(PotChip::Mcp2, 0x01),
                    load_pot: PotAddress::new(PotChip::Mcp1, 0x01),
                    heater_sense: AnalogInput::S3,
                    load_sense: AnalogInput::S1,
                    reference_ohms: 10.0,
                    divider_mv: 4850.0,
                    target_current_ma: 26.0,
                    startup_heater_mv: 1700,
                    baseline_ohms: 2_200.0,
                },
            ],
        }
    }

    pub fn for_board(board: BoardRevision) -> Self {
        match board {
            BoardRevision::Rev10 => Self::rev10(),
            BoardRevision::Rev11 => Self::rev11(),
        }
    }

    pub fn channel(&self, channel: GasChannel) -> &ChannelProfile {
        &self.channels[channel.index()]
    }

    /// Heater code per millivolt above the regulator floor.
    pub fn heater_k(&self) -> f32 {
        (f32::from(self.pot_steps) * self.divider_r1_kohm / 100.0) / 1000.0
    }

    /// Resistance of one potentiometer step (Ω).
    pub fn load_step_ohms(&self) -> f32 {
        self.pot_span_kohm * 1000.0 / f32::from(self.pot_steps)
    }

    /// Potentiometer code for a heater setpoint, truncated and clamped.
    pub fn heater_code(&self, millivolts: u32) -> u16 {
        let code = ((millivolts as f32 / self.heater_gain) - 1000.0) * self.heater_k();
        clamp_code(code, self.pot_steps)
    }

    /// Heater setpoint produced by a potentiometer code.
    pub fn heater_millivolts(&self, code: u16) -> f32 {
        (f32::from(code) / self.heater_k() + 1000.0) * self.heater_gain
    }

    /// Potentiometer code for a load resistance, truncated and clamped.
    pub fn load_code(&self, ohms: u32) -> u16 {
        clamp_code(ohms as f32 / self.load_step_ohms(), self.pot_steps)
    }

    pub fn load_ohms(&self, code: u16) -> f32 {
        self.load_step_ohms() * f32::from(code)
    }
}

fn clamp_code(code: f32, steps: u16) -> u16 {
    (code as i32).clamp(0, i32::from(steps)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heater_code_truncates() {
        let profile = FrontEndProfile::rev11();
        // ((2700 / 0.41) - 1000) * 0.03072 = 171.6
        assert_eq!(profile.heater_code(2700), 171);
        assert_eq!(profile.heater_code(1700), 96);
    }

    #[test]
    fn test_heater_code_clamps() {
        let profile = FrontEndProfile::rev11();
        assert_eq!(profile.heater_code(0), 0);
        assert_eq!(profile.heater_code(100), 0);
        assert_eq!(profile.heater_code(u32::MAX), 256);
    }

    #[test]
    fn test_heater_round_trip_is_lossy() {
        let profile = FrontEndProfile::rev11();
        let back = profile.heater_millivolts(profile.heater_code(2700));
        assert!(back < 2700.0, "quantization must round down, got {}", back);
        assert!(2700.0 - back < profile.heater_gain / profile.heater_k());
    }

    #[test]
    fn test_heater_mapping_is_monotonic() {
        let profile = FrontEndProfile::rev10();
        let mut last = 0;
        for mv in (0..12_000).step_by(25) {
            let code = profile.heater_code(mv);
            assert!(code >= last);
            last = code;
        }
        assert_eq!(last, 256);
    }

    #[test]
    fn test_load_step() {
        let profile = FrontEndProfile::rev11();
        assert_eq!(profile.load_step_ohms(), 390.625);
        assert_eq!(profile.load_code(100_000), 256);
        assert_eq!(profile.load_code(250_000), 256);
        assert_eq!(profile.load_code(2_000), 5);
    }
}
