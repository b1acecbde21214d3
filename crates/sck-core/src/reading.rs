//! The per-cycle measurement vector and its timestamp.

use core::fmt::{self, Display};

use heapless::String;

/// Number of values in a [`Reading`].
pub const READING_CHANNELS: usize = 9;

/// Width of the fixed timestamp buffer in persisted records.
pub const TIME_BUFFER_SIZE: usize = 20;

// Value indices inside a reading, in wire order.
pub const TEMPERATURE: usize = 0;
pub const HUMIDITY: usize = 1;
pub const LIGHT: usize = 2;
pub const BATTERY: usize = 3;
pub const PANEL: usize = 4;
pub const CO: usize = 5;
pub const NO2: usize = 6;
pub const NOISE: usize = 7;
pub const NETS: usize = 8;

/// Date-time string as reported by the time server or the RTC.
///
/// Holds at most [`TIME_BUFFER_SIZE`] bytes. The single character `#` marks a
/// reading whose time could not be established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamp(String<TIME_BUFFER_SIZE>);

impl Timestamp {
    pub const UNKNOWN: &'static str = "#";

    /// Sentinel timestamp used when neither the server nor the RTC answered.
    pub fn unknown() -> Self {
        let mut text = String::new();
        let _ = text.push('#');
        Self(text)
    }

    /// Build a timestamp from text, or `None` if it does not fit the buffer.
    pub fn new(text: &str) -> Option<Self> {
        let mut inner = String::new();
        inner.push_str(text).ok()?;
        Some(Self(inner))
    }

    /// Decode the NUL-padded buffer of a persisted record.
    ///
    /// Anything that is not valid UTF-8 decodes as the unknown sentinel.
    pub fn from_buffer(buffer: &[u8; TIME_BUFFER_SIZE]) -> Self {
        let end = buffer.iter().position(|&b| b == 0).unwrap_or(TIME_BUFFER_SIZE);
        match core::str::from_utf8(&buffer[..end]) {
            Ok(text) if !text.is_empty() => Self::new(text).unwrap_or_else(Self::unknown),
            _ => Self::unknown(),
        }
    }

    /// Encode into a NUL-padded record buffer.
    pub fn to_buffer(&self) -> [u8; TIME_BUFFER_SIZE] {
        let mut buffer = [0u8; TIME_BUFFER_SIZE];
        let bytes = self.0.as_bytes();
        buffer[..bytes.len()].copy_from_slice(bytes);
        buffer
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_known(&self) -> bool {
        self.0.as_str() != Self::UNKNOWN
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sampling cycle's output.
///
/// Values are kept in the raw integer units the ingest server expects:
/// temperature and humidity as reported by the climate sensor, light in
/// deci-lux (or LDR per-mille on rev 1.0), battery and panel in deci-percent
/// and percent, gas resistances in ohms, noise in millivolts.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    values: [i32; READING_CHANNELS],
    timestamp: Timestamp,
}

impl Reading {
    pub fn new(values: [i32; READING_CHANNELS], timestamp: Timestamp) -> Self {
        Self { values, timestamp }
    }

    pub fn values(&self) -> &[i32; READING_CHANNELS] {
        &self.values
    }

    pub fn value(&self, index: usize) -> i32 {
        self.values[index]
    }

    pub fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }

    /// Copy of this reading carrying a different timestamp.
    pub fn with_timestamp(self, timestamp: Timestamp) -> Self {
        Self { timestamp, ..self }
    }

    /// Copy of this reading with the visible network count replaced.
    pub fn with_nets(mut self, nets: u16) -> Self {
        self.values[NETS] = i32::from(nets);
        self
    }
}

/// Human readable label, unit and display divisor for each channel.
pub const CHANNEL_LABELS: [(&str, &str, f32); READING_CHANNELS] = [
    ("Temperature", " C RAW", 1.0),
    ("Humidity", " % RAW", 1.0),
    ("Light", " lx", 10.0),
    ("Battery", " %", 10.0),
    ("Solar Panel", " %", 1.0),
    ("Carbon Monoxide", " kOhm", 1000.0),
    ("Nitrogen Dioxide", " kOhm", 1000.0),
    ("Noise", " mV", 1.0),
    ("Wifi Spots", "", 1.0),
];

impl Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ((label, unit, divisor), value) in CHANNEL_LABELS.iter().zip(self.values.iter()) {
            if *divisor > 1.0 {
                write!(f, "{}: {:.2}{}, ", label, *value as f32 / divisor, unit)?;
            } else {
                write!(f, "{}: {}{}, ", label, value, unit)?;
            }
        }
        write!(f, "UTC: {}", self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_timestamp_is_sentinel() {
        let ts = Timestamp::unknown();
        assert_eq!(ts.as_str(), "#");
        assert!(!ts.is_known());
    }

    #[test]
    fn test_timestamp_rejects_oversized_text() {
        assert!(Timestamp::new("2013-10-14 15:02:33").is_some());
        assert!(Timestamp::new("2013-10-14 15:02:33.123").is_none());
    }

    #[test]
    fn test_timestamp_buffer_is_nul_padded() {
        let ts = Timestamp::new("13-10-14 15:02:33").unwrap();
        let buffer = ts.to_buffer();
        assert_eq!(&buffer[..17], b"13-10-14 15:02:33");
        assert!(buffer[17..].iter().all(|&b| b == 0));
        assert_eq!(Timestamp::from_buffer(&buffer), ts);
    }

    #[test]
    fn test_garbage_buffer_decodes_as_unknown() {
        let erased = [0xFF; TIME_BUFFER_SIZE];
        assert!(!Timestamp::from_buffer(&erased).is_known());
        let empty = [0u8; TIME_BUFFER_SIZE];
        assert!(!Timestamp::from_buffer(&empty).is_known());
    }

    #[test]
    fn test_with_nets_replaces_only_nets() {
        let reading = Reading::new([1, 2, 3, 4, 5, 6, 7, 8, 0], Timestamp::unknown());
        let updated = reading.clone().with_nets(4);
        assert_eq!(updated.value(NETS), 4);
        assert_eq!(&updated.values()[..NETS], &reading.values()[..NETS]);
    }
}
