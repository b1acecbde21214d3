//! The sampling and upload loop body, and the console commands that steer it.

use core::fmt::Write as _;

use embassy_time::Instant;
use heapless::String;
use log::{debug, error, info};

use crate::config::{FIRMWARE_VERSION, NetworkCredentials, NodeConfig, SensorMode};
use crate::console::{ConsoleCommand, WlanField};
use crate::error::{CommandError, StorageError, UplinkError};
use crate::gas::{GasAction, GasDutyCycle, GasSampling};
use crate::reading::{READING_CHANNELS, Reading};
use crate::sensors::SensorSuite;
use crate::storage::{MeasurementQueue, PersistentStore};
use crate::uplink::{Modem, RealTimeClock, UplinkController, UplinkOutcome};

/// Console reply text.
pub type Reply = String<384>;

/// What one sampling cycle produced.
#[derive(Debug)]
pub struct CycleReport {
    pub reading: Reading,
    /// `None` when the mode does not upload or the console holds the node
    pub uplink: Option<Result<UplinkOutcome, UplinkError>>,
}

pub struct Node<'g, S, G, B, M, C> {
    config: NodeConfig,
    store: S,
    queue: MeasurementQueue,
    gas: G,
    suite: B,
    uplink: UplinkController<'g, M, C>,
    duty: GasDutyCycle,
    last_gas: (i32, i32),
    last_cycle: Option<Instant>,
    debug: bool,
}

impl<'g, S, G, B, M, C> Node<'g, S, G, B, M, C>
where
    S: PersistentStore,
    G: GasSampling,
    B: SensorSuite,
    M: Modem,
    C: RealTimeClock,
{
    pub fn new(
        config: NodeConfig,
        store: S,
        queue: MeasurementQueue,
        gas: G,
        suite: B,
        uplink: UplinkController<'g, M, C>,
        now: Instant,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            gas,
            suite,
            uplink,
            duty: GasDutyCycle::new(now),
            last_gas: (0, 0),
            last_cycle: None,
            debug: false,
        }
    }

    /// Restore config and backlog from `store` and build the node.
    pub async fn start(
        mut store: S,
        gas: G,
        suite: B,
        uplink: UplinkController<'g, M, C>,
        now: Instant,
    ) -> Result<Self, StorageError> {
        let config = NodeConfig::load(&mut store).await;
        let queue = MeasurementQueue::load(&mut store).await?;
        info!(
            "Node up: firmware {}, {} readings pending",
            FIRMWARE_VERSION,
            queue.pending_count()
        );
        Ok(Self::new(config, store, queue, gas, suite, uplink, now))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn queue(&self) -> &MeasurementQueue {
        &self.queue
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn uplink_mut(&mut self) -> &mut UplinkController<'g, M, C> {
        &mut self.uplink
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// When the next cycle is due, given the current time.
    pub fn next_cycle_at(&self, now: Instant) -> Instant {
        match self.last_cycle {
            Some(last) => last + self.config.update_interval(),
            None => now,
        }
    }

    /// Mode in force this cycle; the debug console forces offline sampling.
    fn mode(&self) -> SensorMode {
        if self.debug {
            SensorMode::Offline
        } else {
            self.config.effective_mode()
        }
    }

    /// Sample and publish, if a full update interval has passed.
    pub async fn run_cycle(&mut self, now: Instant) -> Option<CycleReport> {
        if let Some(last) = self.last_cycle {
            if now.saturating_duration_since(last) < self.config.update_interval() {
                return None;
            }
        }
        self.last_cycle = Some(now);

        let mode = self.mode();
        let reading = self.sample(now, mode).await;

        let uplink = if mode.transmits() {
            let result = self
                .uplink
                .publish(&mut self.store, &mut self.queue, &self.config, reading.clone())
                .await;
            if let Err(e) = &result {
                error!("Reading lost: {}", e);
            }
            Some(result)
        } else {
            None
        };

        if self.debug {
            debug!("{}", reading);
        } else {
            info!("{}", reading);
        }
        Some(CycleReport { reading, uplink })
    }

    async fn sample(&mut self, now: Instant, mode: SensorMode) -> Reading {
        let climate = self.suite.climate().await.unwrap_or_default();

        let (co, no2) = match self.duty.step(now, mode == SensorMode::Economic) {
            GasAction::Sample => {
                let supply_mv = self.suite.measure_supply().await;
                self.gas.set_supply_mv(supply_mv);
                self.last_gas = self.gas.sample_all_channels().await.as_ohms();
                self.last_gas
            }
            GasAction::HeatersOn => {
                self.gas.set_heaters(true).await;
                self.last_gas
            }
            GasAction::HeatersOff => {
                self.gas.set_heaters(false).await;
                self.last_gas
            }
        };

        let light = self.suite.light().await;
        let power = self.suite.power().await;
        let noise = self.suite.noise().await;
        let nets = match mode {
            SensorMode::Offline => self.uplink.scan_networks().await,
            _ => 0,
        };
        let timestamp = self.uplink.local_time().await;

        let values: [i32; READING_CHANNELS] = [
            climate.temperature,
            climate.humidity,
            light,
            power.battery,
            power.panel,
            co,
            no2,
            noise,
            i32::from(nets),
        ];
        Reading::new(values, timestamp)
    }

    /// Apply a console command. Settings are saved before the call returns.
    pub async fn handle_command(
        &mut self,
        command: ConsoleCommand,
    ) -> Result<Option<Reply>, CommandError> {
        let mut reply = Reply::new();
        match command {
            ConsoleCommand::EnterDebug => {
                self.debug = true;
                info!("Console attached, uploads held");
                return Ok(None);
            }
            ConsoleCommand::Exit => {
                self.debug = false;
                let _ = reply.push_str("EXIT");
            }
            ConsoleCommand::GetInfo => {
                let _ = reply.push_str(FIRMWARE_VERSION);
            }
            ConsoleCommand::GetMac => {
                let _ = reply.push_str(&self.config.identity.mac);
            }
            ConsoleCommand::GetWlan(field) => {
                for (i, network) in self.config.networks.iter().enumerate() {
                    if i > 0 {
                        let _ = reply.push(' ');
                    }
                    write_field(&mut reply, network, field);
                }
                if reply.is_empty() {
                    return Ok(None);
                }
            }
            ConsoleCommand::GetMode => {
                let _ = write!(reply, "{}", self.config.mode as u8);
            }
            ConsoleCommand::GetTimeUpdate => {
                let _ = write!(reply, "{}", self.config.update_interval_secs);
            }
            ConsoleCommand::GetNumberUpdates => {
                let _ = write!(reply, "{}", self.config.num_updates);
            }
            ConsoleCommand::GetApiKey => {
                let _ = reply.push_str(&self.config.identity.api_key);
            }
            ConsoleCommand::SetWlan(field, value) => {
                self.set_network_field(field, &value)?;
                self.save().await?;
                return Ok(None);
            }
            ConsoleCommand::ClearNets => {
                self.config.networks.clear();
                self.save().await?;
                return Ok(None);
            }
            ConsoleCommand::SetMode(mode) => {
                self.config.mode = mode;
                self.save().await?;
                return Ok(None);
            }
            ConsoleCommand::SetTimeUpdate(secs) => {
                self.config.update_interval_secs = secs;
                self.save().await?;
                return Ok(None);
            }
            ConsoleCommand::SetNumberUpdates(count) => {
                self.config.num_updates = count;
                self.save().await?;
                return Ok(None);
            }
            ConsoleCommand::SetApiKey(key) => {
                self.config.identity.api_key = key;
                self.save().await?;
                return Ok(None);
            }
        }
        Ok(Some(reply))
    }

    /// `ssid` opens a new network entry; the other fields edit the newest one.
    fn set_network_field(&mut self, field: WlanField, value: &str) -> Result<(), CommandError> {
        if field == WlanField::Ssid {
            return if self.config.add_network(value) {
                Ok(())
            } else {
                Err(CommandError::InvalidArgument)
            };
        }

        let network = self
            .config
            .last_network_mut()
            .ok_or(CommandError::InvalidArgument)?;
        match field {
            WlanField::Phrase => {
                network.phrase.clear();
                network
                    .phrase
                    .push_str(value)
                    .map_err(|_| CommandError::TooLong)?;
            }
            WlanField::Auth => {
                network.auth = value.parse().map_err(|_| CommandError::InvalidArgument)?;
            }
            WlanField::ExtAntenna => {
                let flag: u8 = value.parse().map_err(|_| CommandError::InvalidArgument)?;
                network.ext_antenna = flag != 0;
            }
            WlanField::Ssid => {}
        }
        Ok(())
    }

    async fn save(&mut self) -> Result<(), CommandError> {
        self.config.save(&mut self.store).await?;
        debug!("Config saved");
        Ok(())
    }
}

fn write_field(reply: &mut Reply, network: &NetworkCredentials, field: WlanField) {
    let written = match field {
        WlanField::Ssid => write!(reply, "{}", network.ssid),
        WlanField::Phrase => write!(reply, "{}", network.phrase),
        WlanField::Auth => write!(reply, "{}", network.auth),
        WlanField::ExtAntenna => write!(reply, "{}", u8::from(network.ext_antenna)),
    };
    if written.is_err() {
        debug!("Network list truncated");
    }
}
