//! Firmware update channel: exclusive resource seizure, OTA partition
//! writes, terminal-until-restart semantics.

pub mod coordinator;
pub mod manager;
pub mod server;

pub use coordinator::UpdateCoordinator;
pub use server::UpdateServer;
