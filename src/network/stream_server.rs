//! HTTP listener for the live MJPEG stream (port 80).
//!
//! `/stream` holds the camera lock for the lifetime of the connection, so
//! the 1-2 slot buffer pool only ever backs one consumer. Dropping the
//! server (firmware update teardown) closes the listener; the in-flight
//! stream loop observes the send failure and releases the camera.

use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::http::server::{Configuration as HttpConfig, EspHttpServer};
use esp_idf_svc::http::Method;
use esp_idf_svc::io::Write;
use log::{info, warn};
use stream_core::fault::Fault;
use stream_core::mjpeg;
use stream_core::stream::{run_stream, PartSink, ShutdownFlag, StreamEnd};

use crate::camera::encoder::JpegConverter;
use crate::camera::SharedCamera;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<title>ESP32-CAM Repeater</title>
<style>
body { margin: 0; background: #1a1a2e; color: #eee; font-family: sans-serif; text-align: center; }
h1 { font-size: 1.2em; padding: 0.5em; }
img { max-width: 100%; border: 1px solid #444; }
</style>
</head>
<body>
<h1>ESP32-CAM Repeater</h1>
<img src="/stream" alt="live stream">
</body>
</html>
"#;

pub struct StreamServer {
    _server: EspHttpServer<'static>,
    shutdown: ShutdownFlag,
}

impl StreamServer {
    pub fn start(camera: SharedCamera) -> Result<Self> {
        let mut server = EspHttpServer::new(&HttpConfig::default())?;
        let shutdown = ShutdownFlag::new();

        server.fn_handler("/", Method::Get, |req| {
            let mut response = req.into_response(
                200,
                Some("OK"),
                &[("Content-Type", "text/html; charset=utf-8")],
            )?;
            response.write_all(INDEX_HTML.as_bytes())?;
            Ok::<(), anyhow::Error>(())
        })?;

        let stream_shutdown = shutdown.clone();
        server.fn_handler("/stream", Method::Get, move |req| {
            // One stream at a time; the pool cannot back two consumers.
            let mut slot = match camera.try_lock() {
                Ok(slot) => slot,
                Err(_) => {
                    req.into_status_response(503)?
                        .write_all(b"stream already in use")?;
                    return Ok::<(), anyhow::Error>(());
                }
            };
            let Some(controller) = slot.as_mut() else {
                req.into_status_response(503)?
                    .write_all(b"camera offline")?;
                return Ok(());
            };

            let response =
                req.into_response(200, Some("OK"), &[("Content-Type", mjpeg::CONTENT_TYPE)])?;
            info!("stream client connected");
            let mut encoder = JpegConverter::new();
            let mut sink = HttpPartSink {
                response,
                shutdown: stream_shutdown.clone(),
            };
            match run_stream(controller, &mut encoder, &mut sink) {
                StreamEnd::ClientClosed => info!("stream client disconnected"),
                StreamEnd::Aborted(fault) => warn!("stream aborted: {fault}"),
            }
            Ok(())
        })?;

        info!("stream server listening on port 80");
        Ok(Self {
            _server: server,
            shutdown,
        })
    }

    /// Makes every in-flight stream write fail. Must happen before this
    /// server is dropped: httpd processes the stop request only once the
    /// handler task is idle, and a handler streaming to a healthy client
    /// never returns on its own.
    pub fn begin_shutdown(&self) {
        self.shutdown.trip();
    }
}

struct HttpPartSink<W> {
    response: W,
    shutdown: ShutdownFlag,
}

impl<W: Write> PartSink for HttpPartSink<W> {
    fn write_all(&mut self, buf: &[u8]) -> Result<(), Fault> {
        if self.shutdown.is_tripped() {
            return Err(Fault::SendFailed);
        }
        Write::write_all(&mut self.response, buf).map_err(|_| Fault::SendFailed)
    }

    fn yield_now(&mut self) {
        FreeRtos::delay_ms(1);
    }
}
