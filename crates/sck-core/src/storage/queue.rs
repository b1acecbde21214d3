//! Store-and-forward measurement backlog.
//!
//! Records are appended at the write cursor and consumed from the read
//! cursor. There is no wraparound: the log grows towards the end of the
//! external region and only shrinks back to offset 0 when the reader catches
//! up with the writer. A backlog that reaches the end of the region is full
//! until the uplink drains it.

use log::{debug, error, info, warn};

use super::record::{MeasurementRecord, RECORD_SIZE};
use super::{PersistentStore, Scope};
use crate::error::StorageError;
use crate::reading::Reading;

// Internal-scope cells holding the cursors.
const WRITE_CURSOR_CELL: u32 = 0;
const READ_CURSOR_CELL: u32 = 4;

const RECORD_LEN: u32 = RECORD_SIZE as u32;

/// Cursor reads tried at start-up before the backlog is given up.
const LOAD_ATTEMPTS: u8 = 3;

/// RAM copy of the persisted queue cursors.
///
/// Every mutation is written through to the store before the call returns.
/// The store itself is passed into each operation so that the same device
/// can also serve configuration reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementQueue {
    write_cursor: u32,
    read_cursor: u32,
    /// Usable length of the external region, rounded down to whole records
    region_len: u32,
}

impl MeasurementQueue {
    /// Restore the queue from its persisted cursors.
    ///
    /// Cursor pairs that cannot describe a valid backlog (an erased device, a
    /// torn collapse, a region that shrank) are reset to an empty queue.
    pub async fn load<S: PersistentStore>(store: &mut S) -> Result<Self, StorageError> {
        let region_len = (store.capacity(Scope::External) / RECORD_LEN) * RECORD_LEN;
        let write_cursor = store.read_u32(Scope::Internal, WRITE_CURSOR_CELL).await?;
        let read_cursor = store.read_u32(Scope::Internal, READ_CURSOR_CELL).await?;

        let mut queue = Self {
            write_cursor,
            read_cursor,
            region_len,
        };

        if queue.cursors_valid() {
            info!(
                "Measurement queue restored: {} pending of {} slots",
                queue.pending_count(),
                queue.capacity()
            );
        } else {
            warn!(
                "Measurement queue cursors invalid (write={}, read={}), starting empty",
                write_cursor, read_cursor
            );
            queue.collapse(store).await?;
        }
        Ok(queue)
    }

    /// Like [`load`](Self::load), but a store that keeps failing yields an
    /// empty queue instead of an error, so the node can still sample.
    pub async fn load_or_empty<S: PersistentStore>(store: &mut S) -> Self {
        let mut last_error = None;
        for attempt in 1..=LOAD_ATTEMPTS {
            match Self::load(store).await {
                Ok(queue) => return queue,
                Err(e) => {
                    warn!("Measurement queue load {}/{} failed: {}", attempt, LOAD_ATTEMPTS, e);
                    last_error = Some(e);
                }
            }
        }
        error!(
            "Measurement queue unreadable ({:?}), backlog dropped",
            last_error
        );

        let mut queue = Self {
            write_cursor: 0,
            read_cursor: 0,
            region_len: (store.capacity(Scope::External) / RECORD_LEN) * RECORD_LEN,
        };
        if let Err(e) = queue.collapse(store).await {
            warn!("Could not persist empty queue: {}", e);
        }
        queue
    }

    fn cursors_valid(&self) -> bool {
        self.write_cursor % RECORD_LEN == 0
            && self.read_cursor % RECORD_LEN == 0
            && self.read_cursor <= self.write_cursor
            && self.write_cursor <= self.region_len
    }

    /// Number of records waiting to be sent.
    pub fn pending_count(&self) -> u32 {
        (self.write_cursor - self.read_cursor) / RECORD_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.write_cursor == self.read_cursor
    }

    /// Total number of record slots in the region.
    pub fn capacity(&self) -> u32 {
        self.region_len / RECORD_LEN
    }

    /// Current `(write, read)` byte offsets.
    pub fn cursors(&self) -> (u32, u32) {
        (self.write_cursor, self.read_cursor)
    }

    /// Append a reading.
    ///
    /// The record is written before the cursor so that a power cut between
    /// the two leaves the previous backlog intact.
    pub async fn enqueue<S: PersistentStore>(
        &mut self,
        store: &mut S,
        reading: &Reading,
    ) -> Result<(), StorageError> {
        if self.write_cursor + RECORD_LEN > self.region_len {
            warn!(
                "Measurement queue full ({} records), reading not stored",
                self.pending_count()
            );
            return Err(StorageError::QueueFull);
        }

        let bytes = MeasurementRecord::from(reading).to_bytes();
        store.write(Scope::External, self.write_cursor, &bytes).await?;

        let next = self.write_cursor + RECORD_LEN;
        store.write_u32(Scope::Internal, WRITE_CURSOR_CELL, next).await?;
        self.write_cursor = next;

        debug!("Queued reading at {}, {} pending", next - RECORD_LEN, self.pending_count());
        Ok(())
    }

    /// Oldest unread reading, left in place.
    pub async fn dequeue_peek<S: PersistentStore>(
        &self,
        store: &mut S,
    ) -> Result<Option<Reading>, StorageError> {
        self.peek_nth(store, 0).await
    }

    /// The `n`-th unread reading counting from the oldest, left in place.
    pub async fn peek_nth<S: PersistentStore>(
        &self,
        store: &mut S,
        n: u32,
    ) -> Result<Option<Reading>, StorageError> {
        if n >= self.pending_count() {
            return Ok(None);
        }

        let mut bytes = [0u8; RECORD_SIZE];
        store
            .read(Scope::External, self.read_cursor + n * RECORD_LEN, &mut bytes)
            .await?;
        Ok(Some(MeasurementRecord::from_bytes(&bytes).into()))
    }

    /// Drop the oldest reading. Collapses both cursors to 0 once empty.
    pub async fn dequeue_advance<S: PersistentStore>(
        &mut self,
        store: &mut S,
    ) -> Result<(), StorageError> {
        if self.is_empty() {
            return Ok(());
        }

        let next = self.read_cursor + RECORD_LEN;
        if next == self.write_cursor {
            return self.collapse(store).await;
        }

        store.write_u32(Scope::Internal, READ_CURSOR_CELL, next).await?;
        self.read_cursor = next;
        Ok(())
    }

    /// Discard the whole backlog.
    pub async fn clear<S: PersistentStore>(&mut self, store: &mut S) -> Result<(), StorageError> {
        info!("Clearing {} queued readings", self.pending_count());
        self.collapse(store).await
    }

    // Write cursor first: a cut between the two writes leaves read > write,
    // which `load` treats as empty.
    async fn collapse<S: PersistentStore>(&mut self, store: &mut S) -> Result<(), StorageError> {
        store.write_u32(Scope::Internal, WRITE_CURSOR_CELL, 0).await?;
        store.write_u32(Scope::Internal, READ_CURSOR_CELL, 0).await?;
        self.write_cursor = 0;
        self.read_cursor = 0;
        Ok(())
    }
}
