//! Fixed-width binary layout of a queued reading.

use crate::reading::{READING_CHANNELS, Reading, TIME_BUFFER_SIZE, Timestamp};

/// Size of one persisted record in bytes (56).
pub const RECORD_SIZE: usize = READING_CHANNELS * 4 + TIME_BUFFER_SIZE;

/// A [`Reading`] as stored in the measurement log.
///
/// Binary format (little-endian):
/// - values: 36 bytes (9 × i32)
/// - timestamp: 20 bytes (UTF-8, NUL padded)
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub values: [i32; READING_CHANNELS],
    pub timestamp: [u8; TIME_BUFFER_SIZE],
}

impl MeasurementRecord {
    pub const fn size() -> usize {
        RECORD_SIZE
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];

        for (i, value) in self.values.iter().enumerate() {
            let offset = i * 4;
            bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }

        let ts_offset = READING_CHANNELS * 4;
        bytes[ts_offset..].copy_from_slice(&self.timestamp);
        bytes
    }

    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut values = [0i32; READING_CHANNELS];
        for (i, value) in values.iter_mut().enumerate() {
            let offset = i * 4;
            let mut value_bytes = [0u8; 4];
            value_bytes.copy_from_slice(&bytes[offset..offset + 4]);
            *value = i32::from_le_bytes(value_bytes);
        }

        let mut timestamp = [0u8; TIME_BUFFER_SIZE];
        timestamp.copy_from_slice(&bytes[READING_CHANNELS * 4..]);

        Self { values, timestamp }
    }
}

impl From<&Reading> for MeasurementRecord {
    fn from(reading: &Reading) -> Self {
        Self {
            values: *reading.values(),
            timestamp: reading.timestamp().to_buffer(),
        }
    }
}

impl From<MeasurementRecord> for Reading {
    fn from(record: MeasurementRecord) -> Self {
        Reading::new(record.values, Timestamp::from_buffer(&record.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{CO, NETS, TEMPERATURE};

    #[test]
    fn test_record_size() {
        assert_eq!(MeasurementRecord::size(), 56, "record must be exactly 56 bytes");
    }

    #[test]
    fn test_record_layout_is_little_endian() {
        let mut values = [0; READING_CHANNELS];
        values[TEMPERATURE] = 0x0102_0304;
        values[NETS] = -1;
        let reading = Reading::new(values, Timestamp::new("13-10-14 15:02:33").unwrap());

        let bytes = MeasurementRecord::from(&reading).to_bytes();

        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[32..36], &[0xFF; 4]);
        assert_eq!(&bytes[36..53], b"13-10-14 15:02:33");
        assert_eq!(bytes[53], 0);
    }

    #[test]
    fn test_reading_survives_record() {
        let mut values = [0; READING_CHANNELS];
        values[CO] = 98_765;
        let reading = Reading::new(values, Timestamp::unknown());

        let bytes = MeasurementRecord::from(&reading).to_bytes();
        let restored = Reading::from(MeasurementRecord::from_bytes(&bytes));

        assert_eq!(restored, reading);
    }
}
