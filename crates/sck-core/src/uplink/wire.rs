//! Line format spoken to the ingest server.

use core::fmt::Write as _;

use embedded_io_async::Write;
use heapless::String;

use crate::config::{FIRMWARE_VERSION, NodeConfig};
use crate::reading::{READING_CHANNELS, Reading, TIME_BUFFER_SIZE, Timestamp};

/// Field prefixes: one per value, then the timestamp opener and the record closer.
pub const FIELD_PREFIXES: [&str; READING_CHANNELS + 2] = [
    "{\"temp\":\"",
    "\", \"hum\":\"",
    "\", \"light\":\"",
    "\", \"bat\":\"",
    "\", \"panel\":\"",
    "\", \"co\":\"",
    "\", \"no2\":\"",
    "\", \"noise\":\"",
    "\", \"nets\":\"",
    "\", \"timestamp\":\"",
    "\"}",
];

pub const BATCH_OPEN: &[u8] = b"[";
pub const RECORD_SEPARATOR: &[u8] = b",";
pub const BATCH_CLOSE: &[u8] = b"]\r\n\r\n";

/// Marker after which the time server prints the date.
const TIME_MARKER: &[u8] = b"UTC:";
const TIME_TERMINATOR: u8 = b'#';

pub async fn write_record<W: Write>(out: &mut W, reading: &Reading) -> Result<(), W::Error> {
    for (prefix, value) in FIELD_PREFIXES.iter().zip(reading.values()) {
        let mut digits: String<12> = String::new();
        let _ = write!(digits, "{}", value);
        out.write_all(prefix.as_bytes()).await?;
        out.write_all(digits.as_bytes()).await?;
    }
    out.write_all(FIELD_PREFIXES[READING_CHANNELS].as_bytes()).await?;
    out.write_all(reading.timestamp().as_str().as_bytes()).await?;
    out.write_all(FIELD_PREFIXES[READING_CHANNELS + 1].as_bytes()).await
}

/// Upload request head, up to and including the data header name.
pub async fn write_upload_header<W: Write>(
    out: &mut W,
    config: &NodeConfig,
) -> Result<(), W::Error> {
    let lines: [(&str, &str); 6] = [
        ("PUT /add HTTP/1.1", ""),
        ("Host: ", config.server.host.as_str()),
        ("User-Agent: SmartCitizen", ""),
        ("X-SmartCitizenMacADDR: ", config.identity.mac.as_str()),
        ("X-SmartCitizenApiKey: ", config.identity.api_key.as_str()),
        ("X-SmartCitizenVersion: ", FIRMWARE_VERSION),
    ];
    for (name, value) in lines {
        out.write_all(name.as_bytes()).await?;
        out.write_all(value.as_bytes()).await?;
        out.write_all(b"\r\n").await?;
    }
    out.write_all(b"X-SmartCitizenData: ").await
}

pub async fn write_time_request<W: Write>(out: &mut W, host: &str) -> Result<(), W::Error> {
    out.write_all(b"GET /datetime HTTP/1.1\r\nHost: ").await?;
    out.write_all(host.as_bytes()).await?;
    out.write_all(b"\r\nUser-Agent: SmartCitizen\r\n\r\n").await
}

/// Whether `response` holds a complete date (marker and terminator).
pub fn time_response_complete(response: &[u8]) -> bool {
    find(response, TIME_MARKER)
        .is_some_and(|start| response[start + TIME_MARKER.len()..].contains(&TIME_TERMINATOR))
}

/// Extract the date from a time server response.
///
/// The server sends `UTC:YYYY,MM,DD,hh,mm,ss#`. The first two commas become
/// dashes, the third a space, the rest colons. Fails when the marker or the
/// terminator is missing, or when the date does not fit a timestamp buffer.
pub fn parse_time_response(response: &[u8]) -> Option<Timestamp> {
    let start = find(response, TIME_MARKER)? + TIME_MARKER.len();
    let mut text: String<TIME_BUFFER_SIZE> = String::new();
    let mut commas = 0;

    for &byte in &response[start..] {
        if byte == TIME_TERMINATOR {
            return Timestamp::new(&text);
        }
        if text.len() + 1 >= TIME_BUFFER_SIZE {
            return None;
        }
        let c = match byte {
            b',' => {
                let mapped = match commas {
                    0 | 1 => '-',
                    2 => ' ',
                    _ => ':',
                };
                commas += 1;
                mapped
            }
            other if other.is_ascii() => other as char,
            _ => return None,
        };
        text.push(c).ok()?;
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
