//! Update channel: a second HTTP listener that outlives the stream
//! teardown. POST /update pushes a firmware image; GET /status reports
//! health without touching the camera.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use embedded_svc::http::Headers;
use esp_idf_svc::http::server::{Configuration as HttpConfig, EspHttpServer};
use esp_idf_svc::http::Method;
use esp_idf_svc::io::{Read, Write};
use log::{error, info};
use stream_core::update::UpdateOutcome;

use crate::ota::coordinator::UpdateCoordinator;
use crate::version;

pub const UPDATE_PORT: u16 = 8081;

const CHUNK_SIZE: usize = 4096;

pub struct UpdateServer {
    _server: EspHttpServer<'static>,
}

impl UpdateServer {
    pub fn start(coordinator: Arc<UpdateCoordinator>) -> Result<Self> {
        let server_config = HttpConfig {
            http_port: UPDATE_PORT,
            // The stream server's httpd instance already owns the default
            // control socket.
            ctrl_port: 32769,
            ..Default::default()
        };
        let mut server = EspHttpServer::new(&server_config)?;

        let status = coordinator.clone();
        server.fn_handler("/status", Method::Get, move |req| {
            let body = serde_json::json!({
                "version": version::FIRMWARE_VERSION,
                "free_heap": unsafe { esp_idf_sys::esp_get_free_heap_size() },
                "uptime_ms": unsafe { esp_idf_sys::esp_timer_get_time() / 1000 },
                "update": status.phase().as_str(),
            });
            let mut response = req.into_response(
                200,
                Some("OK"),
                &[("Content-Type", "application/json")],
            )?;
            response.write_all(serde_json::to_string(&body)?.as_bytes())?;
            Ok::<(), anyhow::Error>(())
        })?;

        server.fn_handler("/update", Method::Post, move |mut req| {
            let Some(size) = req.content_len().map(|n| n as usize) else {
                req.into_status_response(411)?
                    .write_all(b"Content-Length required")?;
                return Ok::<(), anyhow::Error>(());
            };
            info!("firmware update requested: {size} bytes");

            let mut writer = match coordinator.begin(size) {
                Ok(writer) => writer,
                Err(e) => {
                    error!("update rejected: {e}");
                    req.into_status_response(503)?
                        .write_all(format!("update rejected: {e}").as_bytes())?;
                    return Ok(());
                }
            };

            let mut buffer = vec![0u8; CHUNK_SIZE];
            let mut last_reported = 0u8;
            let mut transfer_error: Option<anyhow::Error> = None;
            loop {
                match req.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = writer.write(&buffer[..n]) {
                            transfer_error = Some(e.into());
                            break;
                        }
                        let pct = writer.progress_pct();
                        if pct >= last_reported + 10 {
                            last_reported = pct - pct % 10;
                            info!("update progress: {pct}%");
                        }
                    }
                    Err(e) => {
                        transfer_error = Some(anyhow!("payload read failed: {e}"));
                        break;
                    }
                }
            }
            let result = match transfer_error {
                Some(e) => Err(e),
                None => writer.finish().map_err(Into::into),
            };

            match result {
                Ok(()) => {
                    coordinator.finish(UpdateOutcome::Success);
                    req.into_response(200, Some("OK"), &[("Content-Type", "text/plain")])?
                        .write_all(b"update successful, restarting")?;
                    info!("update successful, restarting");
                    std::thread::spawn(|| {
                        // Let the response flush before going down.
                        std::thread::sleep(std::time::Duration::from_secs(1));
                        unsafe {
                            esp_idf_sys::esp_restart();
                        }
                    });
                }
                Err(e) => {
                    // The streaming pipeline stays down; only a restart
                    // brings the device back.
                    coordinator.finish(UpdateOutcome::Failed);
                    error!("update failed: {e}");
                    req.into_status_response(500)?
                        .write_all(format!("update failed: {e}; device pending restart").as_bytes())?;
                }
            }
            Ok(())
        })?;

        info!("update server listening on port {UPDATE_PORT}");
        Ok(Self { _server: server })
    }
}
