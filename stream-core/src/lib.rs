//! Stream Core - Hardware-independent logic for the ESP32-CAM repeater
//!
//! This crate contains the streaming, link-state and update-state logic that
//! can be tested on the host platform without requiring camera hardware.

pub mod fault;
pub mod frame;
pub mod link;
pub mod mjpeg;
pub mod stream;
pub mod update;
