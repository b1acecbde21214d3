//! Desktop simulator for the sck-rs environmental node.
//!
//! Runs the real sampling and upload cycle from `sck-core` against a
//! simulated sensor board and a WiFi modem that loses the network for a
//! stretch of the run. Time is simulated, so a day of cycles finishes in well
//! under a second.
//!
//! The board revision comes from the stored config, seeded from the first
//! argument (`rev10` or `rev11`, default `rev10`). The rev 1.1 board runs
//! from a drifting 3.3 V rail that is measured before every gas sample.
//!
//! Before the first cycle a console session configures the node the way a
//! user would over USB: enter debug, store a network, pick the batching
//! threshold, read the settings back and exit.
//!
//! Set `RUST_LOG=debug` to follow the gas re-ranging and batch traffic.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;

use embassy_futures::block_on;
use embassy_time::{Duration, Instant};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{self, I2c, Operation};
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use log::{error, info, warn};

use sck_core::afe::{AnalogFrontEnd, AnalogInput, AnalogSampler, DigitalPot, FrontEndProfile};
use sck_core::afe::{GasChannel, PotAddress};
use sck_core::config::{BoardRevision, NodeConfig};
use sck_core::console::{LineBuffer, accept};
use sck_core::gas::GasSampler;
use sck_core::node::Node;
use sck_core::polling::PollingGate;
use sck_core::reading::Timestamp;
use sck_core::sensors::{
    Bh1730, BoardSuite, Climate, ClimateSensor, PowerMonitor, PowerReading, Rev10Suite,
    Rev11Suite, SupplyMonitor,
};
use sck_core::storage::{MemoryStore, RECORD_SIZE};
use sck_core::uplink::{Modem, RealTimeClock, UplinkController};

// ---------------------------------------------------------------------------
// Run parameters
// ---------------------------------------------------------------------------

/// Sampling cycles to simulate.
const CYCLES: u64 = 40;

/// The modem cannot join between these simulated times.
const OUTAGE: (u64, u64) = (8 * 60, 20 * 60);

/// Lines typed into the console before the first cycle.
const CONSOLE_SCRIPT: [&str; 9] = [
    "###",
    "set wlan ssid sim-lab",
    "set wlan phrase correct-horse",
    "set number updates 3",
    "set time update 60",
    "get wlan ssid",
    "get number updates",
    "set mode sensor 7",
    "exit",
];

/// Room for the config plus 256 queued readings.
type SimStore = MemoryStore<1024, { RECORD_SIZE * 256 }>;

static GATE: PollingGate = PollingGate::new();

// ---------------------------------------------------------------------------
// Simulated clock
// ---------------------------------------------------------------------------

/// Seconds since the simulation started, shared by every simulated part.
#[derive(Clone, Default)]
struct SimClock(Rc<Cell<u64>>);

impl SimClock {
    fn secs(&self) -> u64 {
        self.0.get()
    }

    fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by.as_secs());
    }

    fn instant(&self) -> Instant {
        Instant::from_secs(self.secs())
    }

    fn in_outage(&self) -> bool {
        (OUTAGE.0..OUTAGE.1).contains(&self.secs())
    }

    /// Wall time of the simulated day, starting 2024-03-01 08:00:00.
    fn wall(&self) -> (u64, u64, u64, u64) {
        let t = 8 * 3600 + self.secs();
        (1 + t / 86_400, (t / 3600) % 24, (t / 60) % 60, t % 60)
    }
}

/// Battery-backed clock that reads nothing until the first server time.
struct SimRtc {
    clock: SimClock,
    set: bool,
}

impl RealTimeClock for SimRtc {
    async fn now(&mut self) -> Option<Timestamp> {
        if !self.set {
            return None;
        }
        let (day, h, m, s) = self.clock.wall();
        Timestamp::new(&format!("2024-03-{day:02} {h:02}:{m:02}:{s:02}"))
    }

    async fn adjust(&mut self, time: &Timestamp) -> bool {
        info!("RTC set to {}", time);
        self.set = true;
        true
    }
}

// ---------------------------------------------------------------------------
// Simulated gas front end
// ---------------------------------------------------------------------------

/// Potentiometer wipers and the MICS elements they steer.
struct SimBoard {
    profile: FrontEndProfile,
    clock: SimClock,
    wipers: Vec<(PotAddress, u16)>,
}

impl SimBoard {
    fn wiper(&self, pot: PotAddress) -> u16 {
        self.wipers
            .iter()
            .find(|(p, _)| *p == pot)
            .map_or(0, |(_, code)| *code)
    }

    /// Sensing resistance of a channel; CO follows a slow traffic cycle.
    fn element_ohms(&self, channel: GasChannel) -> f32 {
        let t = self.secs_f32();
        match channel {
            GasChannel::Co => 90_000.0 + 40_000.0 * (t / 900.0).sin(),
            GasChannel::No2 => 8_000.0 + 2_500.0 * (t / 1300.0).cos(),
        }
    }

    fn heater_ohms(channel: GasChannel) -> f32 {
        match channel {
            GasChannel::Co => 68.0,
            GasChannel::No2 => 82.0,
        }
    }

    fn secs_f32(&self) -> f32 {
        self.clock.secs() as f32
    }

    /// Actual rail: fixed on rev 1.0, sagging with the battery on rev 1.1.
    fn rail_mv(&self) -> f32 {
        if self.profile.supply_mv > 4000.0 {
            self.profile.supply_mv
        } else {
            3300.0 - 150.0 * (self.secs_f32() / 5000.0).sin().abs()
        }
    }

    fn to_counts(&self, millivolts: f32) -> u16 {
        let counts = millivolts / self.rail_mv() * 1023.0;
        counts.clamp(0.0, 1023.0) as u16
    }

    fn sample(&self, input: AnalogInput) -> u16 {
        for channel in GasChannel::ALL {
            let profile = self.profile.channel(channel);
            if input == profile.load_sense {
                let load = self.profile.load_ohms(self.wiper(profile.load_pot)).max(1.0);
                let rs = self.element_ohms(channel);
                return self.to_counts(profile.divider_mv * load / (load + rs));
            }
            if input == profile.heater_sense {
                let supply = self.profile.heater_millivolts(self.wiper(profile.heater_pot));
                let current = supply / (Self::heater_ohms(channel) + profile.reference_ohms);
                return self.to_counts(current * profile.reference_ohms);
            }
        }

        let t = self.secs_f32();
        match input {
            // Microphone envelope around 1.2 V
            AnalogInput::S4 => (245.0 + 40.0 * (t / 17.0).sin()) as u16,
            // LDR following daylight
            _ => (500.0 + 300.0 * (t / 3600.0).sin()) as u16,
        }
    }
}

#[derive(Clone)]
struct SimPots(Rc<RefCell<SimBoard>>);

impl DigitalPot for SimPots {
    type Error = Infallible;

    async fn write_wiper(&mut self, pot: PotAddress, code: u16) -> Result<(), Self::Error> {
        let mut board = self.0.borrow_mut();
        match board.wipers.iter_mut().find(|(p, _)| *p == pot) {
            Some((_, wiper)) => *wiper = code,
            None => board.wipers.push((pot, code)),
        }
        Ok(())
    }

    async fn read_wiper(&mut self, pot: PotAddress) -> Result<u16, Self::Error> {
        Ok(self.0.borrow().wiper(pot))
    }
}

#[derive(Clone)]
struct SimAdc(Rc<RefCell<SimBoard>>);

impl AnalogSampler for SimAdc {
    async fn average(&mut self, input: AnalogInput) -> u16 {
        self.0.borrow().sample(input)
    }
}

/// Settling delays cost nothing in simulated time.
struct NoDelay;

impl DelayNs for NoDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

// ---------------------------------------------------------------------------
// Simulated climate and power
// ---------------------------------------------------------------------------

/// Climate chip that times out on every seventh read.
struct SimClimate {
    clock: SimClock,
    reads: u32,
}

#[derive(Debug)]
struct ClimateTimeout;

impl ClimateSensor for SimClimate {
    type Error = ClimateTimeout;

    async fn read(&mut self) -> Result<Climate, Self::Error> {
        self.reads += 1;
        if self.reads % 7 == 0 {
            return Err(ClimateTimeout);
        }
        let t = self.clock.secs() as f64;
        Ok(Climate {
            temperature: (215.0 + 30.0 * (t / 1800.0).sin()) as i32,
            humidity: (480.0 + 60.0 * (t / 2400.0).cos()) as i32,
        })
    }
}

struct SimPower {
    clock: SimClock,
}

impl PowerMonitor for SimPower {
    async fn read(&mut self) -> PowerReading {
        let hours = self.clock.secs() / 3600;
        PowerReading {
            battery: 1000 - (hours as i32 * 15).min(1000),
            panel: 62,
        }
    }
}

/// I2C bus with only a BH1730 on it, reporting daylight.
struct SimLightBus {
    clock: SimClock,
}

impl i2c::ErrorType for SimLightBus {
    type Error = Infallible;
}

impl I2c for SimLightBus {
    async fn transaction(
        &mut self,
        _address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let t = self.clock.secs() as f32;
        let data0 = (2000.0 + 1500.0 * (t / 3600.0).sin()) as u16;
        let data1 = data0 / 4;
        for operation in operations {
            if let Operation::Read(buf) = operation {
                let bytes = [data0.to_le_bytes(), data1.to_le_bytes()].concat();
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
            }
        }
        Ok(())
    }
}

/// Rail measurement through the board's supply divider.
struct SimSupply(Rc<RefCell<SimBoard>>);

impl SupplyMonitor for SimSupply {
    async fn read_supply_mv(&mut self) -> Option<f32> {
        Some(self.0.borrow().rail_mv())
    }
}

// ---------------------------------------------------------------------------
// Simulated modem
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum SimModemError {
    NoNetwork,
    NotOpen,
}

impl core::fmt::Display for SimModemError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}

impl core::error::Error for SimModemError {}

impl embedded_io_async::Error for SimModemError {
    fn kind(&self) -> ErrorKind {
        match self {
            SimModemError::NoNetwork => ErrorKind::NotConnected,
            SimModemError::NotOpen => ErrorKind::BrokenPipe,
        }
    }
}

/// Modem whose "server" answers time requests and counts uploaded records.
struct SimModem {
    clock: SimClock,
    open: bool,
    request: Vec<u8>,
    response: Vec<u8>,
    uploads: u32,
    records: u32,
}

impl SimModem {
    fn new(clock: SimClock) -> Self {
        Self {
            clock,
            open: false,
            request: Vec::new(),
            response: Vec::new(),
            uploads: 0,
            records: 0,
        }
    }

    /// Act on a finished request.
    fn serve(&mut self) {
        let request = String::from_utf8_lossy(&self.request).into_owned();
        if request.starts_with("GET /datetime") {
            let (day, h, m, s) = self.clock.wall();
            self.response = format!("HTTP/1.1 200 OK\r\n\r\nUTC:2024,03,{day:02},{h:02},{m:02},{s:02}#")
                .into_bytes();
        } else if request.starts_with("PUT /add") && request.ends_with("]\r\n\r\n") {
            let records = request.matches("{\"temp\"").count() as u32;
            self.uploads += 1;
            self.records += records;
            info!("Server accepted batch of {} records", records);
        }
    }
}

impl ErrorType for SimModem {
    type Error = SimModemError;
}

impl Read for SimModem {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if !self.open {
            return Err(SimModemError::NotOpen);
        }
        let n = buf.len().min(self.response.len());
        buf[..n].copy_from_slice(&self.response[..n]);
        self.response.drain(..n);
        Ok(n)
    }
}

impl Write for SimModem {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if !self.open {
            return Err(SimModemError::NotOpen);
        }
        self.request.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        if !self.open {
            return Err(SimModemError::NotOpen);
        }
        self.serve();
        Ok(())
    }
}

impl Modem for SimModem {
    async fn join(&mut self) -> Result<(), Self::Error> {
        if self.clock.in_outage() {
            return Err(SimModemError::NoNetwork);
        }
        Ok(())
    }

    async fn scan_networks(&mut self) -> u16 {
        if self.clock.in_outage() { 0 } else { 3 }
    }

    async fn open(&mut self, _host: &str, _port: u16) -> Result<(), Self::Error> {
        if self.clock.in_outage() {
            return Err(SimModemError::NoNetwork);
        }
        self.open = true;
        self.request.clear();
        self.response.clear();
        Ok(())
    }

    async fn close(&mut self) {
        self.open = false;
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting sck-rs simulator: {} cycles", CYCLES);
    info!(
        "Network outage from {} s to {} s of simulated time",
        OUTAGE.0, OUTAGE.1
    );

    let clock = SimClock::default();
    let mut store = SimStore::new();
    let board_revision = match board_from_args() {
        Some(board) => board,
        None => {
            error!("Usage: sck-simulator [rev10|rev11]");
            return;
        }
    };
    let seeded = NodeConfig {
        board: board_revision,
        ..NodeConfig::default()
    };
    if let Err(e) = block_on(seeded.save(&mut store)) {
        error!("Could not seed config: {}", e);
        return;
    }
    let board_revision = block_on(NodeConfig::load(&mut store)).board;
    info!("Simulating a {:?} board", board_revision);

    let profile = FrontEndProfile::for_board(board_revision);
    let board = Rc::new(RefCell::new(SimBoard {
        profile: profile.clone(),
        clock: clock.clone(),
        wipers: Vec::new(),
    }));

    let afe = AnalogFrontEnd::new(SimPots(board.clone()), SimAdc(board.clone()), profile);
    let mut gas = GasSampler::new(afe, NoDelay, ());
    block_on(gas.begin());

    let climate = SimClimate {
        clock: clock.clone(),
        reads: 0,
    };
    let power = SimPower {
        clock: clock.clone(),
    };
    let suite = match board_revision {
        BoardRevision::Rev10 => {
            BoardSuite::Rev10(Rev10Suite::new(climate, SimAdc(board.clone()), power, NoDelay))
        }
        BoardRevision::Rev11 => BoardSuite::Rev11(Rev11Suite::new(
            climate,
            Bh1730::new(SimLightBus {
                clock: clock.clone(),
            }),
            SimPots(board.clone()),
            SimAdc(board.clone()),
            power,
            SimSupply(board.clone()),
            NoDelay,
        )),
    };
    let rtc = SimRtc {
        clock: clock.clone(),
        set: false,
    };
    let uplink = UplinkController::new(SimModem::new(clock.clone()), rtc, &GATE);

    let mut node = match block_on(Node::start(store, gas, suite, uplink, clock.instant())) {
        Ok(node) => node,
        Err(e) => {
            error!("Node failed to start: {}", e);
            return;
        }
    };

    run_console_script(&mut node);

    for _ in 0..CYCLES {
        let due = node.next_cycle_at(clock.instant());
        let wait = due.saturating_duration_since(clock.instant());
        clock.advance(wait);

        if let Some(report) = block_on(node.run_cycle(clock.instant())) {
            match report.uplink {
                Some(Ok(outcome)) => info!("t={} s: {:?}", clock.secs(), outcome),
                Some(Err(e)) => warn!("t={} s: upload failed: {}", clock.secs(), e),
                None => info!("t={} s: sampled without upload", clock.secs()),
            }
        }
    }

    let modem = node.uplink_mut().modem_mut();
    let (uploads, records) = (modem.uploads, modem.records);
    info!(
        "Done: {} batches with {} records delivered, {} readings still queued",
        uploads,
        records,
        node.queue().pending_count()
    );
}

/// Board revision named on the command line.
fn board_from_args() -> Option<BoardRevision> {
    match std::env::args().nth(1).as_deref() {
        None | Some("rev10") => Some(BoardRevision::Rev10),
        Some("rev11") => Some(BoardRevision::Rev11),
        Some(_) => None,
    }
}

fn run_console_script<S, G, B, M, C>(node: &mut Node<'_, S, G, B, M, C>)
where
    S: sck_core::storage::PersistentStore,
    G: sck_core::gas::GasSampling,
    B: sck_core::sensors::SensorSuite,
    M: Modem,
    C: RealTimeClock,
{
    let mut lines = LineBuffer::new();
    for line in CONSOLE_SCRIPT {
        info!("> {}", line);
        let mut typed = None;
        for byte in line.bytes().chain(core::iter::once(b'\r')) {
            match lines.push(byte) {
                Ok(Some(complete)) => {
                    typed = Some(complete);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("{}", e);
                    break;
                }
            }
        }
        let Some(typed) = typed else { continue };

        let result = match accept(&GATE, &typed) {
            Ok(command) => block_on(node.handle_command(command)),
            Err(e) => Err(e),
        };
        match result {
            Ok(Some(reply)) => info!("< {}", reply),
            Ok(None) => {}
            Err(e) => warn!("< {}", e),
        }
    }
}
