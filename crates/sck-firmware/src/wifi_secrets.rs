//! Build-time defaults, forwarded from `.env` by the build script.

use core::fmt::Write as _;

use log::info;
use sck_core::config::NodeConfig;

pub const WIFI_SSID: Option<&str> = option_env!("SCK_WIFI_SSID");
pub const WIFI_PASSWORD: Option<&str> = option_env!("SCK_WIFI_PASSWORD");
pub const API_KEY: Option<&str> = option_env!("SCK_API_KEY");

/// Fill in what a fresh config lacks. Returns `true` if anything changed.
pub fn seed(config: &mut NodeConfig, mac: [u8; 6]) -> bool {
    let mut changed = false;

    let mut mac_text = heapless::String::<18>::new();
    for (i, byte) in mac.iter().enumerate() {
        if i > 0 {
            let _ = mac_text.push(':');
        }
        let _ = write!(mac_text, "{:02x}", byte);
    }
    if config.identity.mac != mac_text {
        config.identity.mac = mac_text;
        changed = true;
    }

    if config.networks.is_empty() {
        if let Some(ssid) = WIFI_SSID.filter(|s| !s.is_empty()) {
            if config.add_network(ssid) {
                if let (Some(network), Some(phrase)) = (config.last_network_mut(), WIFI_PASSWORD) {
                    let _ = network.phrase.push_str(phrase);
                }
                info!("Using build-time network \"{}\"", ssid);
                changed = true;
            }
        }
    }

    if config.identity.api_key.is_empty() {
        if let Some(key) = API_KEY {
            changed |= config.identity.api_key.push_str(key).is_ok();
        }
    }

    changed
}
