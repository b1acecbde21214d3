//! Serial console: line assembly and command parsing.

use heapless::{String, Vec};

use crate::config::SensorMode;
use crate::error::CommandError;
use crate::polling::PollingGate;

/// Longest line the console accepts.
pub const LINE_CAPACITY: usize = 64;

pub type Line = String<LINE_CAPACITY>;

/// Assembles console bytes into command lines.
///
/// A carriage return ends a line and newlines are dropped. `###` and `$$$`
/// count as complete lines on their own, without a return.
#[derive(Default)]
pub struct LineBuffer {
    bytes: Vec<u8, LINE_CAPACITY>,
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Feed one byte. Returns the line it completes, if any.
    ///
    /// An overlong line is discarded with [`CommandError::TooLong`].
    pub fn push(&mut self, byte: u8) -> Result<Option<Line>, CommandError> {
        match byte {
            b'\n' => Ok(None),
            b'\r' => self.take().map(Some),
            _ => {
                if self.bytes.push(byte).is_err() {
                    self.bytes.clear();
                    return Err(CommandError::TooLong);
                }
                let escape = (byte == b'#' || byte == b'$') && self.bytes.len() == 3;
                if escape { self.take().map(Some) } else { Ok(None) }
            }
        }
    }

    fn take(&mut self) -> Result<Line, CommandError> {
        let result = core::str::from_utf8(&self.bytes)
            .map_err(|_| CommandError::Unknown)
            .and_then(|text| {
                let mut line = Line::new();
                line.push_str(text).map_err(|_| CommandError::TooLong)?;
                Ok(line)
            });
        self.bytes.clear();
        result
    }
}

/// Which credential field a `wlan` command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WlanField {
    Ssid,
    Phrase,
    Auth,
    ExtAntenna,
}

impl WlanField {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "ssid" => Some(WlanField::Ssid),
            "phrase" => Some(WlanField::Phrase),
            "auth" => Some(WlanField::Auth),
            "ext_antenna" => Some(WlanField::ExtAntenna),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    /// `###`: stop reporting and uploading until `exit`
    EnterDebug,
    Exit,
    GetInfo,
    GetMac,
    GetWlan(WlanField),
    GetMode,
    GetTimeUpdate,
    GetNumberUpdates,
    GetApiKey,
    SetWlan(WlanField, Line),
    ClearNets,
    SetMode(SensorMode),
    SetTimeUpdate(u32),
    SetNumberUpdates(u32),
    SetApiKey(Line),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        match line {
            "###" => return Ok(ConsoleCommand::EnterDebug),
            "exit" => return Ok(ConsoleCommand::Exit),
            "get sck info" => return Ok(ConsoleCommand::GetInfo),
            "get mac" => return Ok(ConsoleCommand::GetMac),
            "get mode sensor" => return Ok(ConsoleCommand::GetMode),
            "get time update" => return Ok(ConsoleCommand::GetTimeUpdate),
            "get number updates" => return Ok(ConsoleCommand::GetNumberUpdates),
            "get apikey" => return Ok(ConsoleCommand::GetApiKey),
            "clear nets" => return Ok(ConsoleCommand::ClearNets),
            _ => {}
        }

        if let Some(field) = line.strip_prefix("get wlan ") {
            return WlanField::parse(field)
                .map(ConsoleCommand::GetWlan)
                .ok_or(CommandError::Unknown);
        }

        if let Some(rest) = line.strip_prefix("set wlan ") {
            let (field, value) = rest.split_once(' ').ok_or(CommandError::InvalidArgument)?;
            let field = WlanField::parse(field).ok_or(CommandError::Unknown)?;
            return Ok(ConsoleCommand::SetWlan(field, text(value)?));
        }

        if let Some(value) = line.strip_prefix("set mode sensor ") {
            let mode = SensorMode::try_from(number(value)?)
                .map_err(|_| CommandError::InvalidArgument)?;
            return Ok(ConsoleCommand::SetMode(mode));
        }

        if let Some(value) = line.strip_prefix("set time update ") {
            let secs = number(value)?;
            if secs == 0 {
                return Err(CommandError::InvalidArgument);
            }
            return Ok(ConsoleCommand::SetTimeUpdate(secs));
        }

        if let Some(value) = line.strip_prefix("set number updates ") {
            return Ok(ConsoleCommand::SetNumberUpdates(number(value)?));
        }

        if let Some(value) = line.strip_prefix("set apikey ") {
            return Ok(ConsoleCommand::SetApiKey(text(value)?));
        }

        Err(CommandError::Unknown)
    }
}

/// Parse a completed line, refusing while the uplink holds the link.
pub fn accept(gate: &PollingGate, line: &str) -> Result<ConsoleCommand, CommandError> {
    if gate.is_paused() {
        return Err(CommandError::Busy);
    }
    ConsoleCommand::parse(line)
}

fn number(value: &str) -> Result<u32, CommandError> {
    value
        .trim()
        .parse()
        .map_err(|_| CommandError::InvalidArgument)
}

fn text(value: &str) -> Result<Line, CommandError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CommandError::InvalidArgument);
    }
    let mut line = Line::new();
    line.push_str(value).map_err(|_| CommandError::TooLong)?;
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(buffer: &mut LineBuffer, bytes: &[u8]) -> Vec<Result<Option<Line>, CommandError>, 80> {
        let mut events = Vec::new();
        for &b in bytes {
            let _ = events.push(buffer.push(b));
        }
        events
    }

    #[test]
    fn test_carriage_return_completes_line() {
        let mut buffer = LineBuffer::new();
        let events = feed(&mut buffer, b"get mac\r\n");
        let lines: Vec<&Line, 4> = events.iter().filter_map(|e| e.as_ref().ok()?.as_ref()).collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].as_str(), "get mac");
    }

    #[test]
    fn test_escape_sequence_needs_no_return() {
        let mut buffer = LineBuffer::new();
        let events = feed(&mut buffer, b"###");
        assert_eq!(events[2].as_ref().unwrap().as_deref(), Some("###"));

        let events = feed(&mut buffer, b"$$$");
        assert_eq!(events[2].as_ref().unwrap().as_deref(), Some("$$$"));
        assert_eq!(ConsoleCommand::parse("$$$"), Err(CommandError::Unknown));
    }

    #[test]
    fn test_overflow_clears_buffer() {
        let mut buffer = LineBuffer::new();
        let long = [b'a'; LINE_CAPACITY + 1];
        let events = feed(&mut buffer, &long);
        assert_eq!(events[LINE_CAPACITY], Err(CommandError::TooLong));

        let events = feed(&mut buffer, b"exit\r");
        assert_eq!(events[4].as_ref().unwrap().as_deref(), Some("exit"));
    }

    #[test]
    fn test_parse_get_commands() {
        assert_eq!(ConsoleCommand::parse("get sck info"), Ok(ConsoleCommand::GetInfo));
        assert_eq!(
            ConsoleCommand::parse("get wlan ext_antenna"),
            Ok(ConsoleCommand::GetWlan(WlanField::ExtAntenna))
        );
        assert_eq!(ConsoleCommand::parse("get wlan key"), Err(CommandError::Unknown));
        assert_eq!(ConsoleCommand::parse("get wifi info"), Err(CommandError::Unknown));
    }

    #[test]
    fn test_parse_set_commands() {
        assert_eq!(
            ConsoleCommand::parse("set wlan ssid Fab Lab BCN"),
            Ok(ConsoleCommand::SetWlan(WlanField::Ssid, Line::try_from("Fab Lab BCN").unwrap()))
        );
        assert_eq!(
            ConsoleCommand::parse("set mode sensor 3"),
            Ok(ConsoleCommand::SetMode(SensorMode::Economic))
        );
        assert_eq!(
            ConsoleCommand::parse("set time update 120"),
            Ok(ConsoleCommand::SetTimeUpdate(120))
        );
        assert_eq!(
            ConsoleCommand::parse("set number updates 5"),
            Ok(ConsoleCommand::SetNumberUpdates(5))
        );
    }

    #[test]
    fn test_parse_rejects_bad_arguments() {
        assert_eq!(ConsoleCommand::parse("set mode sensor 9"), Err(CommandError::InvalidArgument));
        assert_eq!(ConsoleCommand::parse("set time update soon"), Err(CommandError::InvalidArgument));
        assert_eq!(ConsoleCommand::parse("set time update 0"), Err(CommandError::InvalidArgument));
        assert_eq!(ConsoleCommand::parse("set apikey  "), Err(CommandError::InvalidArgument));
    }

    #[test]
    fn test_accept_refuses_while_paused() {
        let gate = PollingGate::new();
        let pause = gate.pause();
        assert_eq!(accept(&gate, "get mac"), Err(CommandError::Busy));
        drop(pause);
        assert_eq!(accept(&gate, "get mac"), Ok(ConsoleCommand::GetMac));
    }
}
