//! WiFi modem over esp-radio and embassy-net.
//!
//! One TCP socket is reused for every request. Joining walks the stored
//! networks in order until one associates and DHCP completes.

use alloc::string::String;

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{self, TcpSocket};
use embassy_net::{Runner, Stack};
use embassy_time::{Duration, with_timeout};
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use esp_radio::wifi::{ClientConfig, ModeConfig, ScanConfig, WifiController, WifiDevice};
use heapless::Vec;
use log::{debug, info, warn};
use sck_core::config::{MAX_NETWORKS, NetworkCredentials};
use sck_core::error::{ErrorText, describe};
use sck_core::uplink::Modem;
use thiserror_no_std::Error;

const DHCP_TIMEOUT: Duration = Duration::from_secs(15);
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum ModemError {
    #[error("No stored network accepted the connection")]
    NoNetwork,
    #[error("WiFi driver error: {0}")]
    Wifi(ErrorText),
    #[error("No DHCP lease")]
    DhcpTimeout,
    #[error("No address for host")]
    Dns,
    #[error("TCP connect failed: {0}")]
    Connect(ErrorText),
    #[error("TCP transfer failed: {0}")]
    Tcp(ErrorText),
}

impl embedded_io_async::Error for ModemError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl From<tcp::Error> for ModemError {
    fn from(value: tcp::Error) -> Self {
        Self::Tcp(describe(&value))
    }
}

pub struct WifiModem {
    controller: WifiController<'static>,
    stack: Stack<'static>,
    socket: TcpSocket<'static>,
    networks: Vec<NetworkCredentials, MAX_NETWORKS>,
}

impl WifiModem {
    pub fn new(
        controller: WifiController<'static>,
        stack: Stack<'static>,
        rx_buffer: &'static mut [u8],
        tx_buffer: &'static mut [u8],
    ) -> Self {
        let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
        socket.set_timeout(Some(SOCKET_TIMEOUT));
        Self {
            controller,
            stack,
            socket,
            networks: Vec::new(),
        }
    }

    /// Replace the networks tried by [`Modem::join`].
    pub fn set_networks(&mut self, networks: &[NetworkCredentials]) {
        self.networks.clear();
        for network in networks {
            let _ = self.networks.push(network.clone());
        }
    }

    async fn ensure_started(&mut self) -> Result<(), ModemError> {
        if matches!(self.controller.is_started(), Ok(true)) {
            return Ok(());
        }
        self.controller
            .start_async()
            .await
            .map_err(|e| ModemError::Wifi(describe(&e)))
    }

    async fn associate(&mut self, index: usize) -> Result<(), ModemError> {
        let network = &self.networks[index];
        let config = ModeConfig::Client(
            ClientConfig::default()
                .with_ssid(String::from(network.ssid.as_str()))
                .with_password(String::from(network.phrase.as_str())),
        );
        self.controller
            .set_config(&config)
            .map_err(|e| ModemError::Wifi(describe(&e)))?;
        self.ensure_started().await?;
        self.controller
            .connect_async()
            .await
            .map_err(|e| ModemError::Wifi(describe(&e)))?;

        with_timeout(DHCP_TIMEOUT, self.stack.wait_config_up())
            .await
            .map_err(|_| ModemError::DhcpTimeout)
    }
}

impl ErrorType for WifiModem {
    type Error = ModemError;
}

impl Read for WifiModem {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(self.socket.read(buf).await?)
    }
}

impl Write for WifiModem {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Ok(self.socket.write(buf).await?)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(self.socket.flush().await?)
    }
}

impl Modem for WifiModem {
    async fn join(&mut self) -> Result<(), Self::Error> {
        if matches!(self.controller.is_connected(), Ok(true)) && self.stack.is_config_up() {
            return Ok(());
        }

        for index in 0..self.networks.len() {
            match self.associate(index).await {
                Ok(()) => {
                    if let Some(config) = self.stack.config_v4() {
                        info!(
                            "Joined \"{}\" as {}",
                            self.networks[index].ssid,
                            config.address.address()
                        );
                    }
                    return Ok(());
                }
                Err(e) => warn!("Join \"{}\" failed: {}", self.networks[index].ssid, e),
            }
        }
        Err(ModemError::NoNetwork)
    }

    async fn scan_networks(&mut self) -> u16 {
        if let Err(e) = self.ensure_started().await {
            warn!("Scan skipped: {}", e);
            return 0;
        }
        match self.controller.scan_with_config_async(ScanConfig::default()).await {
            Ok(found) => found.len() as u16,
            Err(e) => {
                warn!("Scan failed: {:?}", e);
                0
            }
        }
    }

    async fn open(&mut self, host: &str, port: u16) -> Result<(), Self::Error> {
        let addresses = self
            .stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|_| ModemError::Dns)?;
        let address = *addresses.first().ok_or(ModemError::Dns)?;

        self.socket.abort();
        self.socket
            .connect((address, port))
            .await
            .map_err(|e| ModemError::Connect(describe(&e)))?;
        debug!("Connected to {}:{}", host, port);
        Ok(())
    }

    async fn close(&mut self) {
        self.socket.close();
        let _ = with_timeout(CLOSE_TIMEOUT, self.socket.flush()).await;
        self.socket.abort();
    }

    async fn sleep(&mut self) {
        if let Err(e) = self.controller.disconnect_async().await {
            debug!("Disconnect: {:?}", e);
        }
    }
}

#[embassy_executor::task]
pub async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await;
}
