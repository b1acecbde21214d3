//! Persistent node configuration.
//!
//! Stored in the internal storage scope as a `u16` little-endian length
//! followed by the postcard encoding of [`NodeConfig`].

use embassy_time::Duration;
use heapless::{String, Vec};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::storage::{PersistentStore, Scope};

pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Stored networks are capped like the modem's own profile table.
pub const MAX_NETWORKS: usize = 5;

/// Ingest server used when nothing else is configured.
pub const DEFAULT_SERVER_HOST: &str = "data.smartcitizen.me";

/// Internal-scope offset of the config slot, past the queue cursor cells.
const CONFIG_CELL: u32 = 16;

/// Bytes reserved for the length prefix and the encoded config.
pub const CONFIG_SLOT_LEN: usize = 1000;

/// Operating mode of the node.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorMode {
    /// No usable network: sample, stamp from the RTC, scan for networks
    Offline = 0,
    /// WiFi deliberately off: sample and stamp from the RTC only
    NoWifi = 1,
    /// Sample and upload every cycle
    Normal = 2,
    /// As normal, but the gas heaters run on a duty cycle
    Economic = 3,
}

impl SensorMode {
    /// Whether readings in this mode go through the uplink.
    pub fn transmits(self) -> bool {
        matches!(self, SensorMode::Normal | SensorMode::Economic)
    }
}

impl TryFrom<u32> for SensorMode {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SensorMode::Offline),
            1 => Ok(SensorMode::NoWifi),
            2 => Ok(SensorMode::Normal),
            3 => Ok(SensorMode::Economic),
            _ => Err(ConfigError::Decode),
        }
    }
}

/// Hardware generation of the sensor board.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardRevision {
    /// 5 V board: DHT22, LDR, MICS-5525 + MICS-2710
    Rev10,
    /// 3.3 V board: SHT21, BH1730, MICS-4514, noise gain stage
    Rev11,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String<64>,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut host = String::new();
        let _ = host.push_str(DEFAULT_SERVER_HOST);
        Self { host, port: 80 }
    }
}

/// Values the ingest server uses to attribute uploads.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub mac: String<18>,
    pub api_key: String<64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkCredentials {
    pub ssid: String<32>,
    pub phrase: String<64>,
    pub auth: u8,
    pub ext_antenna: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub mode: SensorMode,
    pub board: BoardRevision,
    /// Seconds between sampling cycles
    pub update_interval_secs: u32,
    /// Readings to accumulate before an upload is attempted
    pub num_updates: u32,
    /// Largest number of queued records per request
    pub post_max: u16,
    pub server: ServerConfig,
    pub identity: DeviceIdentity,
    pub networks: Vec<NetworkCredentials, MAX_NETWORKS>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            mode: SensorMode::Normal,
            board: BoardRevision::Rev11,
            update_interval_secs: 60,
            num_updates: 1,
            post_max: 20,
            server: ServerConfig::default(),
            identity: DeviceIdentity::default(),
            networks: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Mode actually in force: without stored networks the node is offline.
    pub fn effective_mode(&self) -> SensorMode {
        if self.networks.is_empty() {
            SensorMode::Offline
        } else {
            self.mode
        }
    }

    /// The modem is put to sleep between uploads spaced a minute or more apart.
    pub fn modem_sleeps(&self) -> bool {
        !self.networks.is_empty()
            && u64::from(self.update_interval_secs) * u64::from(self.num_updates) >= 60
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.update_interval_secs))
    }

    /// Batch size, never below one record.
    pub fn batch_limit(&self) -> u16 {
        self.post_max.max(1)
    }

    /// Load the stored config, falling back to defaults when absent or corrupt.
    pub async fn load<S: PersistentStore>(store: &mut S) -> Self {
        match Self::try_load(store).await {
            Ok(config) => {
                info!(
                    "Config loaded: mode {:?}, every {} s, {} networks",
                    config.mode,
                    config.update_interval_secs,
                    config.networks.len()
                );
                config
            }
            Err(e) => {
                warn!("Using default config: {}", e);
                Self::default()
            }
        }
    }

    pub async fn try_load<S: PersistentStore>(store: &mut S) -> Result<Self, ConfigError> {
        let mut len_bytes = [0u8; 2];
        store.read(Scope::Internal, CONFIG_CELL, &mut len_bytes).await?;
        let len = usize::from(u16::from_le_bytes(len_bytes));
        if len == 0 || len > CONFIG_SLOT_LEN - 2 {
            return Err(ConfigError::Decode);
        }

        let mut buffer = [0u8; CONFIG_SLOT_LEN];
        store
            .read(Scope::Internal, CONFIG_CELL + 2, &mut buffer[..len])
            .await?;
        postcard::from_bytes(&buffer[..len]).map_err(|_| ConfigError::Decode)
    }

    pub async fn save<S: PersistentStore>(&self, store: &mut S) -> Result<(), ConfigError> {
        let mut buffer = [0u8; CONFIG_SLOT_LEN];
        let len = postcard::to_slice(self, &mut buffer[2..])
            .map_err(|e| match e {
                postcard::Error::SerializeBufferFull => ConfigError::TooLarge,
                _ => ConfigError::Encode,
            })?
            .len();
        buffer[..2].copy_from_slice(&(len as u16).to_le_bytes());

        store
            .write(Scope::Internal, CONFIG_CELL, &buffer[..len + 2])
            .await?;
        Ok(())
    }

    /// Store a new network; further fields apply to the newest entry.
    ///
    /// Returns `false` when the table is full.
    pub fn add_network(&mut self, ssid: &str) -> bool {
        let mut credentials = NetworkCredentials::default();
        if credentials.ssid.push_str(ssid).is_err() {
            return false;
        }
        self.networks.push(credentials).is_ok()
    }

    /// Newest stored network, the target of phrase/auth/antenna updates.
    pub fn last_network_mut(&mut self) -> Option<&mut NetworkCredentials> {
        self.networks.last_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use embassy_futures::block_on;

    type Store = MemoryStore<1024, 64>;

    #[test]
    fn test_erased_store_yields_defaults() {
        let mut store = Store::new();
        assert_eq!(block_on(NodeConfig::try_load(&mut store)), Err(ConfigError::Decode));
        assert_eq!(block_on(NodeConfig::load(&mut store)), NodeConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let mut store = Store::new();
        let mut config = NodeConfig {
            mode: SensorMode::Economic,
            update_interval_secs: 300,
            num_updates: 4,
            ..NodeConfig::default()
        };
        assert!(config.add_network("sck-lab"));
        config.last_network_mut().unwrap().phrase.push_str("hunter22").unwrap();
        config.identity.api_key.push_str("0123456789abcdef").unwrap();

        block_on(config.save(&mut store)).unwrap();

        assert_eq!(block_on(NodeConfig::try_load(&mut store)), Ok(config));
    }

    #[test]
    fn test_save_leaves_queue_cursors_alone() {
        let mut store = Store::new();
        block_on(store.write_u32(Scope::Internal, 0, 112)).unwrap();
        block_on(store.write_u32(Scope::Internal, 4, 56)).unwrap();

        block_on(NodeConfig::default().save(&mut store)).unwrap();

        assert_eq!(block_on(store.read_u32(Scope::Internal, 0)).unwrap(), 112);
        assert_eq!(block_on(store.read_u32(Scope::Internal, 4)).unwrap(), 56);
    }

    #[test]
    fn test_full_network_table_fits_slot() {
        let mut store = Store::new();
        let mut config = NodeConfig::default();
        for _ in 0..MAX_NETWORKS {
            assert!(config.add_network("abcdefghijklmnopqrstuvwxyz012345"));
            let network = config.last_network_mut().unwrap();
            for _ in 0..64 {
                network.phrase.push('x').unwrap();
            }
        }
        assert!(!config.add_network("one-too-many"));

        block_on(config.save(&mut store)).unwrap();
        assert_eq!(block_on(NodeConfig::try_load(&mut store)), Ok(config));
    }

    #[test]
    fn test_effective_mode_without_networks_is_offline() {
        let mut config = NodeConfig::default();
        assert_eq!(config.effective_mode(), SensorMode::Offline);
        assert!(!config.modem_sleeps());

        config.add_network("home");
        assert_eq!(config.effective_mode(), SensorMode::Normal);
        assert!(config.modem_sleeps());

        config.update_interval_secs = 20;
        config.num_updates = 2;
        assert!(!config.modem_sleeps());
    }

    #[test]
    fn test_batch_limit_is_at_least_one() {
        let config = NodeConfig {
            post_max: 0,
            ..NodeConfig::default()
        };
        assert_eq!(config.batch_limit(), 1);
    }

    #[test]
    fn test_mode_numbers() {
        assert_eq!(SensorMode::try_from(3), Ok(SensorMode::Economic));
        assert!(SensorMode::try_from(4).is_err());
        assert!(!SensorMode::NoWifi.transmits());
        assert!(SensorMode::Normal.transmits());
    }
}
