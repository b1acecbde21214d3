//! Batch uplink: store-and-forward delivery of readings to the ingest server.
//!
//! Every cycle the controller either adds the live reading to the backlog or,
//! once enough readings have accumulated, joins the network and drains the
//! backlog in batches of at most `post_max` records. The live reading rides
//! along in the last batch. A reading that cannot be delivered goes back into
//! the queue; cursors only move past records whose batch was fully written.

pub mod wire;

use embedded_io_async::{Read, Write};
use heapless::Vec;
use log::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::{StorageError, UplinkError, describe};
use crate::polling::PollingGate;
use crate::reading::{Reading, Timestamp};
use crate::storage::{MeasurementQueue, PersistentStore};

/// Socket opens per request before the request is given up.
pub const OPEN_ATTEMPTS: u8 = 5;

/// Time server round trips before falling back to the local clock.
pub const TIME_ATTEMPTS: u8 = 5;

/// Attempts to write a fresh server time into the RTC.
pub const RTC_ADJUST_ATTEMPTS: u8 = 5;

const TIME_RESPONSE_LEN: usize = 512;

/// WiFi module driven as a byte stream to one remote host at a time.
pub trait Modem: Read + Write {
    /// Associate with one of the stored networks.
    fn join(&mut self) -> impl Future<Output = Result<(), Self::Error>>;

    /// Number of networks currently visible.
    fn scan_networks(&mut self) -> impl Future<Output = u16>;

    /// Open a TCP connection; reads and writes go to it until [`Modem::close`].
    fn open(&mut self, host: &str, port: u16) -> impl Future<Output = Result<(), Self::Error>>;

    /// Close the current connection, if any.
    fn close(&mut self) -> impl Future<Output = ()>;

    fn wake(&mut self) -> impl Future<Output = ()> {
        async {}
    }

    fn sleep(&mut self) -> impl Future<Output = ()> {
        async {}
    }
}

/// Battery-backed clock.
pub trait RealTimeClock {
    /// Current time, or `None` when no clock is fitted or it is not set.
    fn now(&mut self) -> impl Future<Output = Option<Timestamp>>;

    /// Set the clock. Returns `false` if the write did not take.
    fn adjust(&mut self, time: &Timestamp) -> impl Future<Output = bool>;
}

/// Stand-in for boards without an RTC.
pub struct NoRtc;

impl RealTimeClock for NoRtc {
    async fn now(&mut self) -> Option<Timestamp> {
        None
    }

    async fn adjust(&mut self, _time: &Timestamp) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkOutcome {
    /// Below the batching threshold; the reading was queued
    Accumulated,
    /// Backlog and live reading delivered
    Delivered { batches: u32, records: u32 },
    /// No network; the reading was queued
    Offline,
    /// Delivery stopped part way; undelivered records and the live reading are queued
    Interrupted { batches: u32, records: u32 },
}

pub struct UplinkController<'g, M, C> {
    modem: M,
    clock: C,
    gate: &'g PollingGate,
}

impl<'g, M: Modem, C: RealTimeClock> UplinkController<'g, M, C> {
    pub fn new(modem: M, clock: C, gate: &'g PollingGate) -> Self {
        Self { modem, clock, gate }
    }

    pub fn modem_mut(&mut self) -> &mut M {
        &mut self.modem
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// Time from the local clock, or the unknown marker.
    pub async fn local_time(&mut self) -> Timestamp {
        self.clock.now().await.unwrap_or_else(Timestamp::unknown)
    }

    /// Count visible networks without joining any.
    pub async fn scan_networks(&mut self) -> u16 {
        let gate = self.gate;
        let _pause = gate.pause();
        self.modem.scan_networks().await
    }

    /// Queue or deliver one cycle's reading.
    ///
    /// Errors only when the reading could be neither delivered nor queued.
    pub async fn publish<S: PersistentStore>(
        &mut self,
        store: &mut S,
        queue: &mut MeasurementQueue,
        config: &NodeConfig,
        reading: Reading,
    ) -> Result<UplinkOutcome, UplinkError> {
        let pending = queue.pending_count();
        if pending < config.num_updates.saturating_sub(1) {
            let stamped = reading.with_timestamp(self.local_time().await);
            queue.enqueue(store, &stamped).await?;
            info!(
                "Reading stored ({} of {} before upload)",
                pending + 1,
                config.num_updates
            );
            return Ok(UplinkOutcome::Accumulated);
        }

        let gate = self.gate;
        let _pause = gate.pause();
        let sleeps = config.modem_sleeps();
        if sleeps {
            debug!("Waking modem");
            self.modem.wake().await;
        }

        let result = self.transmit(store, queue, config, reading, pending).await;

        self.modem.close().await;
        if sleeps {
            self.modem.sleep().await;
            debug!("Modem sleeping");
        }

        match &result {
            Ok(UplinkOutcome::Delivered { batches, records }) => {
                info!("Posted {} records in {} batches", records, batches)
            }
            Ok(UplinkOutcome::Interrupted { batches, records }) => warn!(
                "Upload interrupted after {} batches ({} records), {} pending",
                batches,
                records,
                queue.pending_count()
            ),
            Ok(_) => {}
            Err(e) => warn!("Upload failed: {}", e),
        }
        result
    }

    async fn transmit<S: PersistentStore>(
        &mut self,
        store: &mut S,
        queue: &mut MeasurementQueue,
        config: &NodeConfig,
        reading: Reading,
        pending: u32,
    ) -> Result<UplinkOutcome, UplinkError> {
        if let Err(e) = self.modem.join().await {
            warn!("Network join failed: {:?}, keeping reading for later", e);
            queue.enqueue(store, &reading).await?;
            return Ok(UplinkOutcome::Offline);
        }
        info!("Connected, {} readings to send", pending + 1);

        let nets = self.modem.scan_networks().await;
        let reading = self.refresh_time(config, reading.with_nets(nets)).await;

        let limit = u32::from(config.batch_limit());
        let (full, rest) = (pending / limit, pending % limit);
        let mut batches = 0;
        let mut records = 0;

        for _ in 0..full {
            if let Err(e) = self.send_batch(store, queue, config, limit, None).await {
                return Self::interrupted(store, queue, reading, batches, records, e).await;
            }
            batches += 1;
            records += limit;
        }

        let last = self.send_batch(store, queue, config, rest, Some(&reading)).await;
        match last {
            Ok(()) => Ok(UplinkOutcome::Delivered {
                batches: batches + 1,
                records: records + rest + 1,
            }),
            Err(e) => Self::interrupted(store, queue, reading, batches, records, e).await,
        }
    }

    async fn interrupted<S: PersistentStore>(
        store: &mut S,
        queue: &mut MeasurementQueue,
        reading: Reading,
        batches: u32,
        records: u32,
        cause: UplinkError,
    ) -> Result<UplinkOutcome, UplinkError> {
        warn!("Batch failed: {}", cause);
        queue.enqueue(store, &reading).await?;
        Ok(UplinkOutcome::Interrupted { batches, records })
    }

    /// One request: the first `count` queued records, then `live` if given.
    async fn send_batch<S: PersistentStore>(
        &mut self,
        store: &mut S,
        queue: &mut MeasurementQueue,
        config: &NodeConfig,
        count: u32,
        live: Option<&Reading>,
    ) -> Result<(), UplinkError> {
        self.open(config).await?;
        let written = self.write_batch(store, queue, config, count, live).await;
        self.modem.close().await;
        written?;

        for _ in 0..count {
            queue.dequeue_advance(store).await?;
        }
        debug!("Batch of {} sent", count + u32::from(live.is_some()));
        Ok(())
    }

    async fn write_batch<S: PersistentStore>(
        &mut self,
        store: &mut S,
        queue: &MeasurementQueue,
        config: &NodeConfig,
        count: u32,
        live: Option<&Reading>,
    ) -> Result<(), UplinkError> {
        let modem = &mut self.modem;
        let write_err = |e: M::Error| UplinkError::Write(describe(&e));

        wire::write_upload_header(modem, config).await.map_err(write_err)?;
        modem.write_all(wire::BATCH_OPEN).await.map_err(write_err)?;

        for n in 0..count {
            let record = queue
                .peek_nth(store, n)
                .await?
                .ok_or(StorageError::CorruptRecord)?;
            if n > 0 {
                modem.write_all(wire::RECORD_SEPARATOR).await.map_err(write_err)?;
            }
            wire::write_record(modem, &record).await.map_err(write_err)?;
        }

        if let Some(live) = live {
            if count > 0 {
                modem.write_all(wire::RECORD_SEPARATOR).await.map_err(write_err)?;
            }
            wire::write_record(modem, live).await.map_err(write_err)?;
        }

        modem.write_all(wire::BATCH_CLOSE).await.map_err(write_err)?;
        modem.flush().await.map_err(write_err)
    }

    async fn open(&mut self, config: &NodeConfig) -> Result<(), UplinkError> {
        let mut last = None;
        for attempt in 1..=OPEN_ATTEMPTS {
            match self.modem.open(&config.server.host, config.server.port).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!("Open {}/{} failed: {:?}", attempt, OPEN_ATTEMPTS, e);
                    last = Some(describe(&e));
                }
            }
        }
        Err(UplinkError::Open(last.unwrap_or_default()))
    }

    /// Stamp `reading` with server time, else local time, else leave it be.
    async fn refresh_time(&mut self, config: &NodeConfig, reading: Reading) -> Reading {
        if let Some(time) = self.fetch_server_time(config).await {
            let mut adjusted = false;
            for _ in 0..RTC_ADJUST_ATTEMPTS {
                if self.clock.adjust(&time).await {
                    adjusted = true;
                    break;
                }
            }
            if !adjusted {
                debug!("RTC not adjusted");
            }
            return reading.with_timestamp(time);
        }

        warn!("Fail server time, using local clock");
        match self.clock.now().await {
            Some(time) => reading.with_timestamp(time),
            None => reading,
        }
    }

    async fn fetch_server_time(&mut self, config: &NodeConfig) -> Option<Timestamp> {
        let host = config.server.host.as_str();
        for attempt in 1..=TIME_ATTEMPTS {
            if let Err(e) = self.modem.open(host, config.server.port).await {
                debug!("Time server open {}/{} failed: {:?}", attempt, TIME_ATTEMPTS, e);
                continue;
            }
            let time = self.request_time(host).await;
            self.modem.close().await;

            if let Some(time) = time {
                debug!("Server time {}", time);
                return Some(time);
            }
            debug!("Time request {}/{} gave no date", attempt, TIME_ATTEMPTS);
        }
        None
    }

    async fn request_time(&mut self, host: &str) -> Option<Timestamp> {
        wire::write_time_request(&mut self.modem, host).await.ok()?;
        self.modem.flush().await.ok()?;

        let mut response: Vec<u8, TIME_RESPONSE_LEN> = Vec::new();
        let mut chunk = [0u8; 64];
        while response.len() < TIME_RESPONSE_LEN {
            let n = self.modem.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            let room = TIME_RESPONSE_LEN - response.len();
            let _ = response.extend_from_slice(&chunk[..n.min(room)]);
            if wire::time_response_complete(&response) {
                break;
            }
        }
        wire::parse_time_response(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::TEMPERATURE;
    use crate::storage::{MemoryStore, RECORD_SIZE};
    use crate::test_support::{MockClock, MockModem, reading};
    use embassy_futures::block_on;

    type Store = MemoryStore<64, { RECORD_SIZE * 16 }>;

    const TIME_OK: &str = "HTTP/1.1 200 OK\r\n\r\nUTC:2013,10,14,15,02,33#";

    fn config(num_updates: u32, post_max: u16) -> NodeConfig {
        let mut config = NodeConfig {
            num_updates,
            post_max,
            ..NodeConfig::default()
        };
        config.add_network("sck");
        config
    }

    fn backlog(n: i32) -> (Store, MeasurementQueue) {
        let mut store = Store::new();
        let mut queue = block_on(MeasurementQueue::load(&mut store)).unwrap();
        for i in 1..=n {
            block_on(queue.enqueue(&mut store, &reading(i))).unwrap();
        }
        (store, queue)
    }

    #[test]
    fn test_backlog_drains_in_bounded_batches() {
        let gate = PollingGate::new();
        let modem = MockModem::new().with_time(TIME_OK).watching(&gate);
        let mut uplink = UplinkController::new(modem, MockClock::default(), &gate);
        let (mut store, mut queue) = backlog(3);

        let outcome = block_on(uplink.publish(&mut store, &mut queue, &config(1, 2), reading(99)));

        assert_eq!(outcome, Ok(UplinkOutcome::Delivered { batches: 2, records: 4 }));
        assert!(queue.is_empty());
        assert_eq!(queue.cursors(), (0, 0));

        let modem = uplink.modem_mut();
        let uploads = modem.uploads();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].matches("{\"temp\"").count(), 2);
        assert!(uploads[0].contains("{\"temp\":\"1\""));
        assert!(uploads[0].contains("{\"temp\":\"2\""));
        assert_eq!(uploads[1].matches("{\"temp\"").count(), 2);
        assert!(uploads[1].contains("{\"temp\":\"3\""));
        assert!(uploads[1].contains("{\"temp\":\"99\""));
        assert!(uploads[1].ends_with("\"}]\r\n\r\n"));
        assert!(!modem.unpaused_io);
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_join_failure_queues_reading_without_traffic() {
        let gate = PollingGate::new();
        let mut uplink = UplinkController::new(MockModem::offline(), MockClock::default(), &gate);
        let (mut store, mut queue) = backlog(2);

        let outcome = block_on(uplink.publish(&mut store, &mut queue, &config(1, 20), reading(7)));

        assert_eq!(outcome, Ok(UplinkOutcome::Offline));
        assert_eq!(queue.pending_count(), 3);
        let modem = uplink.modem_mut();
        assert_eq!(modem.bytes_written(), 0);
        assert_eq!(modem.open_attempts, 0);
        assert_eq!(modem.closes, 1);
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_below_threshold_accumulates_with_local_time() {
        let gate = PollingGate::new();
        let mut uplink =
            UplinkController::new(MockModem::new(), MockClock::at("2024-03-01 10:00:00"), &gate);
        let (mut store, mut queue) = backlog(1);

        let outcome = block_on(uplink.publish(&mut store, &mut queue, &config(3, 20), reading(5)));

        assert_eq!(outcome, Ok(UplinkOutcome::Accumulated));
        assert_eq!(queue.pending_count(), 2);
        let stored = block_on(queue.peek_nth(&mut store, 1)).unwrap().unwrap();
        assert_eq!(stored.timestamp().as_str(), "2024-03-01 10:00:00");
        assert_eq!(uplink.modem_mut().joins, 0);
    }

    #[test]
    fn test_threshold_reached_transmits() {
        let gate = PollingGate::new();
        let mut uplink =
            UplinkController::new(MockModem::new().with_time(TIME_OK), MockClock::default(), &gate);
        let (mut store, mut queue) = backlog(2);

        let outcome = block_on(uplink.publish(&mut store, &mut queue, &config(3, 20), reading(5)));

        assert_eq!(outcome, Ok(UplinkOutcome::Delivered { batches: 1, records: 3 }));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_exact_multiple_sends_live_reading_alone() {
        let gate = PollingGate::new();
        let mut uplink =
            UplinkController::new(MockModem::new().with_time(TIME_OK), MockClock::default(), &gate);
        let (mut store, mut queue) = backlog(4);

        let outcome = block_on(uplink.publish(&mut store, &mut queue, &config(1, 2), reading(9)));

        assert_eq!(outcome, Ok(UplinkOutcome::Delivered { batches: 3, records: 5 }));
        let uploads = uplink.modem_mut().uploads();
        assert!(uploads[2].contains("X-SmartCitizenData: [{\"temp\":\"9\""));
    }

    #[test]
    fn test_failed_batch_stays_queued() {
        let gate = PollingGate::new();
        let mut modem = MockModem::new().with_time(TIME_OK);
        // time request and the first batch get a socket, nothing after
        modem.opens_allowed = Some(2);
        let mut uplink = UplinkController::new(modem, MockClock::default(), &gate);
        let (mut store, mut queue) = backlog(3);

        let outcome = block_on(uplink.publish(&mut store, &mut queue, &config(1, 2), reading(99)));

        assert_eq!(outcome, Ok(UplinkOutcome::Interrupted { batches: 1, records: 2 }));
        assert_eq!(queue.pending_count(), 2);
        let head = block_on(queue.dequeue_peek(&mut store)).unwrap().unwrap();
        assert_eq!(head.value(TEMPERATURE), 3);
        let live = block_on(queue.peek_nth(&mut store, 1)).unwrap().unwrap();
        assert_eq!(live.value(TEMPERATURE), 99);
        assert_eq!(live.timestamp().as_str(), "2013-10-14 15:02:33");
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_write_failure_does_not_advance_cursors() {
        let gate = PollingGate::new();
        let mut modem = MockModem::new().with_time(TIME_OK);
        modem.write_limit = Some(300);
        let mut uplink = UplinkController::new(modem, MockClock::default(), &gate);
        let (mut store, mut queue) = backlog(2);
        let before = queue.cursors();

        let outcome = block_on(uplink.publish(&mut store, &mut queue, &config(1, 20), reading(4)));

        assert_eq!(outcome, Ok(UplinkOutcome::Interrupted { batches: 0, records: 0 }));
        assert_eq!(queue.pending_count(), 3);
        assert_eq!(queue.cursors().1, before.1);
    }

    #[test]
    fn test_server_time_adjusts_clock() {
        let gate = PollingGate::new();
        let mut clock = MockClock::at("2000-01-01 00:00:00");
        clock.adjust_failures = 2;
        let mut uplink = UplinkController::new(MockModem::new().with_time(TIME_OK), clock, &gate);
        let (mut store, mut queue) = backlog(0);

        block_on(uplink.publish(&mut store, &mut queue, &config(1, 20), reading(1))).unwrap();

        let clock = uplink.clock_mut();
        assert_eq!(clock.adjusted.len(), 1);
        assert_eq!(clock.adjusted[0].as_str(), "2013-10-14 15:02:33");
    }

    #[test]
    fn test_time_falls_back_to_local_clock() {
        let gate = PollingGate::new();
        let mut uplink = UplinkController::new(
            MockModem::new().with_time("HTTP/1.1 503\r\n\r\n"),
            MockClock::at("2024-03-01 10:00:00"),
            &gate,
        );
        let (mut store, mut queue) = backlog(0);

        block_on(uplink.publish(&mut store, &mut queue, &config(1, 20), reading(1))).unwrap();

        let modem = uplink.modem_mut();
        // five time requests, then the upload
        assert_eq!(modem.sessions.len(), 6);
        let uploads = modem.uploads();
        assert!(uploads[0].contains("\"timestamp\":\"2024-03-01 10:00:00\""));
    }

    #[test]
    fn test_nets_counted_after_join() {
        let gate = PollingGate::new();
        let mut modem = MockModem::new().with_time(TIME_OK);
        modem.nets = 4;
        let mut uplink = UplinkController::new(modem, MockClock::default(), &gate);
        let (mut store, mut queue) = backlog(0);

        block_on(uplink.publish(&mut store, &mut queue, &config(1, 20), reading(1))).unwrap();

        assert!(uplink.modem_mut().uploads()[0].contains("\"nets\":\"4\""));
    }

    #[test]
    fn test_modem_woken_and_put_to_sleep() {
        let gate = PollingGate::new();
        let mut uplink =
            UplinkController::new(MockModem::new().with_time(TIME_OK), MockClock::default(), &gate);
        let (mut store, mut queue) = backlog(0);

        block_on(uplink.publish(&mut store, &mut queue, &config(1, 20), reading(1))).unwrap();

        let modem = uplink.modem_mut();
        assert_eq!((modem.wakes, modem.sleeps), (1, 1));
    }

    #[test]
    fn test_full_queue_loses_reading_with_error() {
        let gate = PollingGate::new();
        let mut store = MemoryStore::<64, { RECORD_SIZE }>::new();
        let mut queue = block_on(MeasurementQueue::load(&mut store)).unwrap();
        block_on(queue.enqueue(&mut store, &reading(1))).unwrap();
        let mut uplink = UplinkController::new(MockModem::offline(), MockClock::default(), &gate);

        let outcome = block_on(uplink.publish(&mut store, &mut queue, &config(1, 20), reading(2)));

        assert_eq!(outcome, Err(UplinkError::Storage(StorageError::QueueFull)));
        assert_eq!(queue.pending_count(), 1);
    }
}
