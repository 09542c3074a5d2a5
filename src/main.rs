//! ESP32-CAM wifi repeater with live MJPEG streaming.
//!
//! Boot order: logger, NVS config, camera (fatal on failure), radio
//! (AP always, STA best-effort), stream listener on port 80, update
//! listener on port 8081, scheduled restart timer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{info, warn};

mod camera;
mod config;
mod logging;
mod network;
mod ota;
mod version;

use camera::{CameraController, SharedCamera};
use network::stream_server::StreamServer;
use network::NetworkManager;
use ota::{UpdateCoordinator, UpdateServer};

// Embed app descriptor for OTA image validation
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

fn main() -> Result<()> {
    esp_idf_sys::link_patches();
    logging::init_logger().map_err(|e| anyhow!("logger init failed: {e}"))?;

    info!("ESP32-CAM repeater {}", version::full_version());
    info!("Free heap: {} bytes", unsafe {
        esp_idf_sys::esp_get_free_heap_size()
    });

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let config = config::load_or_default(nvs.clone())?;
    info!(
        "Sensor config: {} {} quality {}",
        config.frame_size, config.pixel_format, config.sensor_jpeg_quality
    );

    // No camera, no device.
    let controller = CameraController::init(&config)
        .map_err(|fault| anyhow!("camera init failed: {fault}"))?;
    let camera: SharedCamera = Arc::new(Mutex::new(Some(controller)));

    let mut network = NetworkManager::new(peripherals.modem, sys_loop, nvs, &config)?;
    network.bring_up()?;
    info!("Link state: {:?}", network.link_state());

    let stream_server = StreamServer::start(camera.clone())?;
    match network.sta_ip() {
        Some(ip) => info!("Live stream: http://{ip}/stream"),
        None => info!("Live stream reachable on the AP subnet"),
    }

    let coordinator = UpdateCoordinator::new(camera, stream_server);
    let _update_server = UpdateServer::start(coordinator)?;

    // Scheduled hard restart, the recovery of last resort for driver wedges
    // that survive sensor reinit. Zero disables it.
    let restart_after = Duration::from_secs(u64::from(config.restart_interval_secs));
    loop {
        FreeRtos::delay_ms(1000);
        let uptime = Duration::from_micros(unsafe { esp_idf_sys::esp_timer_get_time() } as u64);
        if !restart_after.is_zero() && uptime >= restart_after {
            warn!("scheduled restart after {}s uptime", uptime.as_secs());
            unsafe {
                esp_idf_sys::esp_restart();
            }
        }
    }
}
