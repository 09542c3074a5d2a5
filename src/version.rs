/// Firmware version, single source of truth: Cargo.toml.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn full_version() -> String {
    format!("v{FIRMWARE_VERSION}")
}
