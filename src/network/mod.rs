//! Radio bring-up and the HTTP listeners.

pub mod stream_server;
pub mod wifi;

use std::time::Duration;

use anyhow::Result;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::info;
use stream_core::link::LinkState;

use crate::config::Config;
use wifi::WifiManager;

/// How long boot waits for the station uplink before settling for AP-only
/// operation.
const UPLINK_TIMEOUT: Duration = Duration::from_secs(15);

pub struct NetworkManager {
    wifi: WifiManager,
}

impl NetworkManager {
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        config: &Config,
    ) -> Result<Self> {
        let wifi = WifiManager::new(modem, sys_loop, nvs, config)?;
        Ok(Self { wifi })
    }

    pub fn bring_up(&mut self) -> Result<()> {
        self.wifi.start(UPLINK_TIMEOUT)?;
        if let Some(ap_ip) = self.wifi.ap_ip() {
            info!("Access point up at {ap_ip}");
        }
        Ok(())
    }

    pub fn link_state(&self) -> LinkState {
        self.wifi.link_state()
    }

    pub fn sta_ip(&self) -> Option<String> {
        self.wifi.sta_ip()
    }
}
