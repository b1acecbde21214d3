//! Heater power lines and the economic-mode duty cycle.

use embassy_time::{Duration, Instant};
use embedded_hal::digital::{OutputPin, PinState};
use log::{debug, info, warn};

use crate::config::BoardRevision;

/// Gas is sampled for this long after the heaters come on in economic mode.
pub const HEATED_WINDOW: Duration = Duration::from_secs(6 * 60);

/// Period after which the heaters are switched back on in economic mode.
pub const HEATER_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Switches the MICS heater supply.
pub trait HeaterSwitch {
    fn set_heaters(&mut self, on: bool);
}

/// Boards without switchable heater lines.
impl HeaterSwitch for () {
    fn set_heaters(&mut self, _on: bool) {}
}

/// The IO0..IO3 lines that gate the heater supply.
///
/// IO0 feeds the CO heater, IO1 the NO2 heater, IO2 selects the NO2 high
/// impedance path and IO3 (rev 1.1 only) powers the sensor rail.
pub struct HeaterLines<O> {
    board: BoardRevision,
    io0: O,
    io1: O,
    io2: O,
    io3: Option<O>,
}

impl<O: OutputPin> HeaterLines<O> {
    pub fn rev11(io0: O, io1: O, io2: O, io3: O) -> Self {
        Self {
            board: BoardRevision::Rev11,
            io0,
            io1,
            io2,
            io3: Some(io3),
        }
    }

    pub fn rev10(io0: O, io1: O, io2: O) -> Self {
        Self {
            board: BoardRevision::Rev10,
            io0,
            io1,
            io2,
            io3: None,
        }
    }

    /// Line levels `[IO0, IO1, IO2, IO3]` for a heater state.
    pub fn levels(board: BoardRevision, on: bool) -> [PinState; 4] {
        use PinState::{High, Low};
        match (board, on) {
            (BoardRevision::Rev11, true) => [High, High, Low, High],
            (BoardRevision::Rev11, false) => [Low, Low, Low, Low],
            // The NO2 heater stays powered on rev 1.0.
            (BoardRevision::Rev10, true) => [High, High, Low, Low],
            (BoardRevision::Rev10, false) => [Low, High, Low, Low],
        }
    }
}

impl<O: OutputPin> HeaterSwitch for HeaterLines<O> {
    fn set_heaters(&mut self, on: bool) {
        let [l0, l1, l2, l3] = Self::levels(self.board, on);
        let mut ok = self.io0.set_state(l0).is_ok();
        ok &= self.io1.set_state(l1).is_ok();
        ok &= self.io2.set_state(l2).is_ok();
        if let Some(io3) = self.io3.as_mut() {
            ok &= io3.set_state(l3).is_ok();
        }

        if ok {
            debug!("Gas heaters {}", if on { "on" } else { "off" });
        } else {
            warn!("Failed to drive heater lines");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasAction {
    /// Sample the gas channels this cycle
    Sample,
    /// Switch the heaters on; the activation time restarts
    HeatersOn,
    /// Keep the heaters off and report the previous gas values
    HeatersOff,
}

/// Heater duty cycle used in economic mode.
#[derive(Debug, Clone)]
pub struct GasDutyCycle {
    activated_at: Instant,
}

impl GasDutyCycle {
    pub fn new(activated_at: Instant) -> Self {
        Self { activated_at }
    }

    pub fn activated_at(&self) -> Instant {
        self.activated_at
    }

    /// Decide what the gas subsystem does at `now`.
    pub fn step(&mut self, now: Instant, economic: bool) -> GasAction {
        let elapsed = now.saturating_duration_since(self.activated_at);
        if elapsed <= HEATED_WINDOW || !economic {
            GasAction::Sample
        } else if elapsed >= HEATER_PERIOD {
            info!("Economic mode: heaters back on");
            self.activated_at = now;
            GasAction::HeatersOn
        } else {
            GasAction::HeatersOff
        }
    }
}
