//! Hand-written fakes for the crate's own collaborator traits.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use heapless::LinearMap;

use crate::afe::{AnalogInput, AnalogSampler, DigitalPot, PotAddress};
use crate::polling::PollingGate;
use crate::reading::{Reading, TEMPERATURE, Timestamp};
use crate::uplink::{Modem, RealTimeClock};

/// A reading whose temperature slot carries `n`, for telling records apart.
pub fn reading(n: i32) -> Reading {
    let mut values = [0; crate::reading::READING_CHANNELS];
    values[TEMPERATURE] = n;
    Reading::new(values, Timestamp::unknown())
}

pub struct NoopDelay;

impl DelayNs for NoopDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

/// Delay that records every requested wait in nanoseconds.
#[derive(Clone, Default)]
pub struct RecordingDelay {
    log: Rc<RefCell<Vec<u64>>>,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_ms(&self) -> u64 {
        self.log.borrow().iter().sum::<u64>() / 1_000_000
    }

    pub fn count(&self) -> usize {
        self.log.borrow().len()
    }
}

impl DelayNs for RecordingDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.log.borrow_mut().push(u64::from(ns));
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.log.borrow_mut().push(u64::from(ms) * 1_000_000);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockBusError;

#[derive(Default)]
pub struct MockPots {
    registers: LinearMap<PotAddress, u16, 16>,
    writes: Vec<(PotAddress, u16)>,
    fail_reads: bool,
    fail_writes: bool,
}

impl MockPots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(&self, pot: PotAddress) -> Option<u16> {
        self.registers.get(&pot).copied()
    }

    pub fn writes(&self) -> &[(PotAddress, u16)] {
        &self.writes
    }

    pub fn writes_to(&self, pot: PotAddress) -> usize {
        self.writes.iter().filter(|(p, _)| *p == pot).count()
    }

    pub fn fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl DigitalPot for MockPots {
    type Error = MockBusError;

    async fn write_wiper(&mut self, pot: PotAddress, code: u16) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(MockBusError);
        }
        self.writes.push((pot, code));
        let _ = self.registers.insert(pot, code);
        Ok(())
    }

    async fn read_wiper(&mut self, pot: PotAddress) -> Result<u16, Self::Error> {
        if self.fail_reads {
            return Err(MockBusError);
        }
        Ok(self.code(pot).unwrap_or(0))
    }
}

/// ADC returning fixed values, or queued sequences drained one per sample.
#[derive(Default)]
pub struct MockSampler {
    fixed: LinearMap<AnalogInput, u16, 8>,
    sequences: Vec<(AnalogInput, VecDeque<u16>)>,
    samples: Vec<AnalogInput>,
}

impl MockSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, input: AnalogInput, value: u16) -> Self {
        let _ = self.fixed.insert(input, value);
        self
    }

    /// Serve `values` in order before falling back to the fixed value.
    pub fn with_sequence(mut self, input: AnalogInput, values: &[u16]) -> Self {
        self.sequences.push((input, values.iter().copied().collect()));
        self
    }

    pub fn samples_of(&self, input: AnalogInput) -> usize {
        self.samples.iter().filter(|&&i| i == input).count()
    }
}

impl AnalogSampler for MockSampler {
    async fn average(&mut self, input: AnalogInput) -> u16 {
        self.samples.push(input);
        let queued = self
            .sequences
            .iter_mut()
            .find(|(i, _)| *i == input)
            .and_then(|(_, values)| values.pop_front());
        queued.unwrap_or_else(|| self.fixed.get(&input).copied().unwrap_or(0))
    }
}

/// Infallible byte sink.
#[derive(Default)]
pub struct Sink {
    pub bytes: Vec<u8>,
}

impl Sink {
    pub fn text(&self) -> &str {
        core::str::from_utf8(&self.bytes).unwrap()
    }
}

impl ErrorType for Sink {
    type Error = core::convert::Infallible;
}

impl Write for Sink {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockModemError;

impl core::fmt::Display for MockModemError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}

impl core::error::Error for MockModemError {}

impl embedded_io_async::Error for MockModemError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Scripted modem.
///
/// Every successful `open` starts a new session; bytes written go to the
/// current session and reads are served from `response`.
pub struct MockModem<'a> {
    pub join_ok: bool,
    pub nets: u16,
    /// Opens that succeed before every further open fails
    pub opens_allowed: Option<usize>,
    /// Fail any write once this many bytes have been accepted in total
    pub write_limit: Option<usize>,
    pub response: Vec<u8>,
    pub sessions: Vec<Vec<u8>>,
    pub joins: usize,
    pub open_attempts: usize,
    pub closes: usize,
    pub wakes: usize,
    pub sleeps: usize,
    /// Set when I/O happened while `gate` was not paused
    pub unpaused_io: bool,
    gate: Option<&'a PollingGate>,
    read_pos: usize,
    opens: usize,
    connected: bool,
    written: usize,
}

impl<'a> MockModem<'a> {
    pub fn new() -> Self {
        Self {
            join_ok: true,
            nets: 0,
            opens_allowed: None,
            write_limit: None,
            response: Vec::new(),
            sessions: Vec::new(),
            joins: 0,
            open_attempts: 0,
            closes: 0,
            wakes: 0,
            sleeps: 0,
            unpaused_io: false,
            gate: None,
            read_pos: 0,
            opens: 0,
            connected: false,
            written: 0,
        }
    }

    pub fn offline() -> Self {
        Self {
            join_ok: false,
            ..Self::new()
        }
    }

    pub fn with_time(mut self, response: &str) -> Self {
        self.response = response.as_bytes().to_vec();
        self
    }

    pub fn watching(mut self, gate: &'a PollingGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Total bytes written across all sessions.
    pub fn bytes_written(&self) -> usize {
        self.sessions.iter().map(Vec::len).sum()
    }

    /// Sessions carrying an upload, as text.
    pub fn uploads(&self) -> Vec<&str> {
        self.sessions
            .iter()
            .filter_map(|s| core::str::from_utf8(s).ok())
            .filter(|s| s.starts_with("PUT "))
            .collect()
    }

    fn observe(&mut self) {
        if let Some(gate) = self.gate {
            if !gate.is_paused() {
                self.unpaused_io = true;
            }
        }
    }
}

impl ErrorType for MockModem<'_> {
    type Error = MockModemError;
}

impl Read for MockModem<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.observe();
        if !self.connected {
            return Err(MockModemError);
        }
        let rest = &self.response[self.read_pos.min(self.response.len())..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.read_pos += n;
        Ok(n)
    }
}

impl Write for MockModem<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.observe();
        if !self.connected {
            return Err(MockModemError);
        }
        if let Some(limit) = self.write_limit {
            if self.written + buf.len() > limit {
                return Err(MockModemError);
            }
        }
        self.written += buf.len();
        if let Some(session) = self.sessions.last_mut() {
            session.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Modem for MockModem<'_> {
    async fn join(&mut self) -> Result<(), Self::Error> {
        self.observe();
        self.joins += 1;
        if self.join_ok { Ok(()) } else { Err(MockModemError) }
    }

    async fn scan_networks(&mut self) -> u16 {
        self.nets
    }

    async fn open(&mut self, _host: &str, _port: u16) -> Result<(), Self::Error> {
        self.observe();
        self.open_attempts += 1;
        if self.opens_allowed.is_some_and(|allowed| self.opens >= allowed) {
            return Err(MockModemError);
        }
        self.opens += 1;
        self.connected = true;
        self.read_pos = 0;
        self.sessions.push(Vec::new());
        Ok(())
    }

    async fn close(&mut self) {
        self.closes += 1;
        self.connected = false;
    }

    async fn wake(&mut self) {
        self.wakes += 1;
    }

    async fn sleep(&mut self) {
        self.sleeps += 1;
    }
}

#[derive(Default)]
pub struct MockClock {
    pub time: Option<Timestamp>,
    pub adjusted: Vec<Timestamp>,
    /// Adjust calls that fail before one succeeds
    pub adjust_failures: usize,
}

impl MockClock {
    pub fn at(time: &str) -> Self {
        Self {
            time: Timestamp::new(time),
            ..Self::default()
        }
    }
}

impl RealTimeClock for MockClock {
    async fn now(&mut self) -> Option<Timestamp> {
        self.time.clone()
    }

    async fn adjust(&mut self, time: &Timestamp) -> bool {
        if self.adjust_failures > 0 {
            self.adjust_failures -= 1;
            return false;
        }
        self.adjusted.push(time.clone());
        self.time = Some(time.clone());
        true
    }
}
