use anyhow::Result;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs};
use serde::{Deserialize, Serialize};
use stream_core::frame::{FrameSize, PixelFormat};

const CONFIG_NAMESPACE: &str = "camrpt";
const CONFIG_KEY: &str = "config";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Station uplink credentials
    pub sta_ssid: String,
    pub sta_password: String,

    // Local access point
    pub ap_ssid: String,
    pub ap_password: String,

    // Sensor settings
    pub pixel_format: PixelFormat,
    pub frame_size: FrameSize,
    /// Driver quality scale 0-63, lower is finer.
    pub sensor_jpeg_quality: u8,
    /// Frame buffer pool size, 1 or 2.
    pub fb_count: u8,

    // Scheduled hard restart
    pub restart_interval_secs: u32,
}

impl Default for Config {
    fn default() -> Self {
        // Credentials come from wifi_config.h via build.rs; the header is
        // not committed to git.
        Self {
            sta_ssid: env!("STA_SSID").to_string(),
            sta_password: env!("STA_PASSWORD").to_string(),
            ap_ssid: env!("AP_SSID").to_string(),
            ap_password: env!("AP_PASSWORD").to_string(),
            pixel_format: PixelFormat::Jpeg,
            frame_size: FrameSize::Qvga,
            sensor_jpeg_quality: 12,
            fb_count: 1,
            restart_interval_secs: 30 * 60,
        }
    }
}

impl Config {
    pub fn save(&self, nvs: EspDefaultNvsPartition) -> Result<()> {
        let mut handle = EspNvs::new(nvs, CONFIG_NAMESPACE, true)?;
        let json = serde_json::to_vec(self)?;
        handle.set_blob(CONFIG_KEY, &json)?;
        log::info!("Configuration saved to NVS");
        Ok(())
    }
}

pub fn load_or_default(nvs: EspDefaultNvsPartition) -> Result<Config> {
    match load_from_nvs(nvs.clone()) {
        Ok(mut config) => {
            log::info!("Loaded configuration from NVS");
            // Persisted blob may predate the compiled-in credentials.
            if config.sta_ssid.is_empty() {
                let defaults = Config::default();
                log::warn!(
                    "NVS uplink credentials empty, using compiled defaults: SSID='{}'",
                    defaults.sta_ssid
                );
                config.sta_ssid = defaults.sta_ssid;
                config.sta_password = defaults.sta_password;
                if let Err(e) = config.save(nvs) {
                    log::warn!("Failed to save backfilled config: {e:?}");
                }
            }
            Ok(config)
        }
        Err(e) => {
            log::warn!("Failed to load config from NVS: {e:?}, using defaults");
            let config = Config::default();
            if let Err(save_err) = config.save(nvs) {
                log::warn!("Failed to save default config to NVS: {save_err:?}");
            }
            Ok(config)
        }
    }
}

fn load_from_nvs(nvs: EspDefaultNvsPartition) -> Result<Config> {
    let handle = EspNvs::new(nvs, CONFIG_NAMESPACE, true)?;

    let mut buf = vec![0u8; 1024];
    let data = handle
        .get_blob(CONFIG_KEY, &mut buf)?
        .ok_or_else(|| anyhow::anyhow!("config not found in NVS"))?;

    Ok(serde_json::from_slice(data)?)
}
