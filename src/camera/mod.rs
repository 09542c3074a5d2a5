//! OV2640 sensor driver wrapper (espressif/esp32-camera component).
//!
//! `CameraController` owns the driver's lifetime: constructing it runs
//! `esp_camera_init`, dropping it runs `esp_camera_deinit`. A checked-out
//! frame buffer is wrapped in [`CapturedFrame`], whose `Drop` returns the
//! buffer to the driver pool.

pub mod encoder;

use std::sync::{Arc, Mutex};

use esp_idf_sys::camera;
use log::{info, warn};
use stream_core::fault::Fault;
use stream_core::frame::{FrameSize, PixelFormat};
use stream_core::stream::{Frame, FrameSource};

use crate::config::Config;

/// Camera slot shared between the stream server and the update coordinator.
/// `None` means the driver has been torn down for a firmware update.
pub type SharedCamera = Arc<Mutex<Option<CameraController>>>;

/// AI-Thinker ESP32-CAM pin map.
mod pins {
    pub const PWDN: i32 = 32;
    pub const RESET: i32 = -1;
    pub const XCLK: i32 = 0;
    pub const SIOD: i32 = 26;
    pub const SIOC: i32 = 27;
    pub const D7: i32 = 35;
    pub const D6: i32 = 34;
    pub const D5: i32 = 39;
    pub const D4: i32 = 36;
    pub const D3: i32 = 21;
    pub const D2: i32 = 19;
    pub const D1: i32 = 18;
    pub const D0: i32 = 5;
    pub const VSYNC: i32 = 25;
    pub const HREF: i32 = 23;
    pub const PCLK: i32 = 22;
}

const XCLK_FREQ_HZ: i32 = 20_000_000;

fn pixformat(format: PixelFormat) -> camera::pixformat_t {
    match format {
        PixelFormat::Jpeg => camera::pixformat_t_PIXFORMAT_JPEG,
        PixelFormat::Rgb565 => camera::pixformat_t_PIXFORMAT_RGB565,
        PixelFormat::Yuv422 => camera::pixformat_t_PIXFORMAT_YUV422,
        PixelFormat::Grayscale => camera::pixformat_t_PIXFORMAT_GRAYSCALE,
    }
}

fn framesize(size: FrameSize) -> camera::framesize_t {
    match size {
        FrameSize::Qvga => camera::framesize_t_FRAMESIZE_QVGA,
        FrameSize::Vga => camera::framesize_t_FRAMESIZE_VGA,
        FrameSize::Svga => camera::framesize_t_FRAMESIZE_SVGA,
        FrameSize::Xga => camera::framesize_t_FRAMESIZE_XGA,
        FrameSize::Sxga => camera::framesize_t_FRAMESIZE_SXGA,
        FrameSize::Uxga => camera::framesize_t_FRAMESIZE_UXGA,
    }
}

pub struct CameraController {
    /// Last known-good driver configuration, reused on fault recovery.
    config: camera::camera_config_t,
}

impl CameraController {
    /// Initializes the sensor. Fatal at boot: the device has no purpose
    /// without a working camera.
    pub fn init(config: &Config) -> Result<Self, Fault> {
        let driver_config = Self::driver_config(config);
        Self::init_driver(&driver_config)?;

        // OV2640 modules on this board are mounted right-side up.
        unsafe {
            let sensor = camera::esp_camera_sensor_get();
            if !sensor.is_null() {
                if let Some(set_vflip) = (*sensor).set_vflip {
                    set_vflip(sensor, 0);
                }
            }
        }

        info!(
            "Camera initialized: {} {} quality {} fb_count {}",
            config.frame_size,
            config.pixel_format,
            config.sensor_jpeg_quality,
            config.fb_count
        );
        Ok(Self {
            config: driver_config,
        })
    }

    fn driver_config(config: &Config) -> camera::camera_config_t {
        // camera_config_t nests anonymous unions for the SCCB pins; start
        // from zeroed storage and assign fields. sccb_i2c_port stays 0.
        let mut cfg: camera::camera_config_t = unsafe { core::mem::zeroed() };
        cfg.pin_pwdn = pins::PWDN;
        cfg.pin_reset = pins::RESET;
        cfg.pin_xclk = pins::XCLK;
        cfg.__bindgen_anon_1.pin_sccb_sda = pins::SIOD;
        cfg.__bindgen_anon_2.pin_sccb_scl = pins::SIOC;
        cfg.pin_d7 = pins::D7;
        cfg.pin_d6 = pins::D6;
        cfg.pin_d5 = pins::D5;
        cfg.pin_d4 = pins::D4;
        cfg.pin_d3 = pins::D3;
        cfg.pin_d2 = pins::D2;
        cfg.pin_d1 = pins::D1;
        cfg.pin_d0 = pins::D0;
        cfg.pin_vsync = pins::VSYNC;
        cfg.pin_href = pins::HREF;
        cfg.pin_pclk = pins::PCLK;
        cfg.xclk_freq_hz = XCLK_FREQ_HZ;
        cfg.ledc_timer = camera::ledc_timer_t_LEDC_TIMER_0;
        cfg.ledc_channel = camera::ledc_channel_t_LEDC_CHANNEL_0;
        cfg.pixel_format = pixformat(config.pixel_format);
        cfg.frame_size = framesize(config.frame_size);
        cfg.jpeg_quality = i32::from(config.sensor_jpeg_quality);
        cfg.fb_count = usize::from(config.fb_count.clamp(1, 2));
        cfg.fb_location = camera::camera_fb_location_t_CAMERA_FB_IN_PSRAM;
        cfg.grab_mode = camera::camera_grab_mode_t_CAMERA_GRAB_WHEN_EMPTY;
        cfg
    }

    fn init_driver(cfg: &camera::camera_config_t) -> Result<(), Fault> {
        let err = unsafe { camera::esp_camera_init(cfg) };
        if err != esp_idf_sys::ESP_OK {
            warn!("esp_camera_init failed: {err}");
            return Err(Fault::HardwareInit);
        }
        Ok(())
    }
}

impl FrameSource for CameraController {
    type Frame = CapturedFrame;

    fn acquire(&mut self) -> Result<CapturedFrame, Fault> {
        let fb = unsafe { camera::esp_camera_fb_get() };
        if fb.is_null() {
            return Err(Fault::CaptureTimeout);
        }
        Ok(CapturedFrame { fb })
    }

    fn reinit_on_fault(&mut self) -> Result<(), Fault> {
        warn!("capture wedged, reinitializing sensor");
        unsafe {
            camera::esp_camera_deinit();
        }
        Self::init_driver(&self.config)
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        let err = unsafe { camera::esp_camera_deinit() };
        if err != esp_idf_sys::ESP_OK {
            warn!("esp_camera_deinit failed: {err}");
        }
    }
}

/// One frame buffer checked out of the driver pool.
pub struct CapturedFrame {
    fb: *mut camera::camera_fb_t,
}

impl CapturedFrame {
    pub(crate) fn raw(&self) -> *mut camera::camera_fb_t {
        self.fb
    }
}

impl Frame for CapturedFrame {
    fn width(&self) -> u32 {
        unsafe { core::ptr::addr_of!((*self.fb).width).read_unaligned() as u32 }
    }

    fn height(&self) -> u32 {
        unsafe { core::ptr::addr_of!((*self.fb).height).read_unaligned() as u32 }
    }

    fn pixel_format(&self) -> PixelFormat {
        let format = unsafe { core::ptr::addr_of!((*self.fb).format).read_unaligned() };
        match format {
            f if f == camera::pixformat_t_PIXFORMAT_JPEG => PixelFormat::Jpeg,
            f if f == camera::pixformat_t_PIXFORMAT_RGB565 => PixelFormat::Rgb565,
            f if f == camera::pixformat_t_PIXFORMAT_GRAYSCALE => PixelFormat::Grayscale,
            _ => PixelFormat::Yuv422,
        }
    }

    fn data(&self) -> &[u8] {
        unsafe {
            let buf = core::ptr::addr_of!((*self.fb).buf).read_unaligned();
            let len = core::ptr::addr_of!((*self.fb).len).read_unaligned();
            core::slice::from_raw_parts(buf, len)
        }
    }
}

impl Drop for CapturedFrame {
    fn drop(&mut self) {
        unsafe {
            camera::esp_camera_fb_return(self.fb);
        }
    }
}
