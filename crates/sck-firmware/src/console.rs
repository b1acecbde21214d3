//! USB serial console task.
//!
//! Lines are parsed here and handed to the main loop, which owns the node and
//! answers on [`REPLIES`]. While the uplink holds the network the console
//! answers busy instead.

use core::fmt::Write as _;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embedded_io_async::{Read, Write};
use esp_hal::Async;
use esp_hal::usb_serial_jtag::UsbSerialJtag;
use log::debug;
use sck_core::console::{ConsoleCommand, LineBuffer, accept};
use sck_core::error::CommandError;
use sck_core::node::Reply;
use sck_core::polling::PollingGate;

/// Paused by the uplink for the duration of network I/O.
pub static GATE: PollingGate = PollingGate::new();

pub static COMMANDS: Channel<CriticalSectionRawMutex, ConsoleCommand, 2> = Channel::new();
pub static REPLIES: Channel<CriticalSectionRawMutex, Result<Option<Reply>, CommandError>, 2> =
    Channel::new();

#[embassy_executor::task]
pub async fn console_task(usb: UsbSerialJtag<'static, Async>) {
    let (mut rx, mut tx) = usb.split();
    let mut lines = LineBuffer::new();
    let mut byte = [0u8; 1];

    loop {
        match rx.read(&mut byte).await {
            Ok(1) => {}
            _ => continue,
        }

        let answer = match lines.push(byte[0]) {
            Ok(None) => continue,
            Ok(Some(line)) => match accept(&GATE, &line) {
                Ok(command) => {
                    debug!("Console: {:?}", command);
                    COMMANDS.send(command).await;
                    REPLIES.receive().await
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        let text = match answer {
            Ok(Some(reply)) => reply,
            Ok(None) => continue,
            Err(e) => {
                let mut text = Reply::new();
                let _ = write!(text, "{}", e);
                text
            }
        };
        let _ = tx.write_all(text.as_bytes()).await;
        let _ = tx.write_all(b"\r\n").await;
    }
}
