//! Pulls first-boot credentials from `.env` into the build environment.

const FORWARDED: [&str; 3] = ["SCK_WIFI_SSID", "SCK_WIFI_PASSWORD", "SCK_API_KEY"];

fn main() {
    println!("cargo:rerun-if-changed=.env");
    if let Err(e) = dotenvy::dotenv() {
        println!("cargo:warning=No .env loaded ({e}); first boot has no network");
    }

    for key in FORWARDED {
        println!("cargo:rerun-if-env-changed={key}");
        if let Ok(value) = std::env::var(key) {
            println!("cargo:rustc-env={key}={value}");
        }
    }

    println!("cargo:rustc-link-arg=-Tlinkall.x");
}
