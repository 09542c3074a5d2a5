//! Firmware-update phase machine.
//!
//! Starting an update seizes the camera and the stream listener: the gate
//! hands back the teardown steps in the order they must run (listeners
//! first, then the camera) before the first payload byte may be written.
//! Finishing, in success or failure, leaves the device pending a restart;
//! the streaming pipeline is never reconstructed in-process.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePhase {
    #[default]
    Idle,
    /// Teardown done, payload transfer in progress.
    Active,
    /// Terminal until restart.
    Done(UpdateOutcome),
}

impl UpdatePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdatePhase::Idle => "idle",
            UpdatePhase::Active => "active",
            UpdatePhase::Done(UpdateOutcome::Success) => "success",
            UpdatePhase::Done(UpdateOutcome::Failed) => "failed",
        }
    }
}

/// Resource-teardown steps required before accepting payload bytes.
/// Listeners stop before the camera so no request is served mid-teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    StopListeners,
    ReleaseCamera,
}

/// An update was requested while one is active or already finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRejected;

impl core::fmt::Display for UpdateRejected {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "update already in progress or device pending restart")
    }
}

impl std::error::Error for UpdateRejected {}

/// Serializes update attempts and gates payload acceptance on teardown.
#[derive(Debug, Default)]
pub struct UpdateGate {
    phase: UpdatePhase,
}

impl UpdateGate {
    pub const fn new() -> Self {
        Self {
            phase: UpdatePhase::Idle,
        }
    }

    /// Idle -> Active. Returns the teardown steps the caller must execute,
    /// in order, before writing any payload.
    pub fn begin(&mut self) -> Result<[TeardownStep; 2], UpdateRejected> {
        match self.phase {
            UpdatePhase::Idle => {
                self.phase = UpdatePhase::Active;
                Ok([TeardownStep::StopListeners, TeardownStep::ReleaseCamera])
            }
            _ => Err(UpdateRejected),
        }
    }

    /// Whether payload bytes may currently be accepted.
    pub fn payload_allowed(&self) -> bool {
        self.phase == UpdatePhase::Active
    }

    /// Active -> Done. Records the outcome; the device now requires a
    /// restart to resume service.
    pub fn finish(&mut self, outcome: UpdateOutcome) {
        if self.phase == UpdatePhase::Active {
            self.phase = UpdatePhase::Done(outcome);
        }
    }

    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_emits_teardown_in_order() {
        let mut gate = UpdateGate::new();
        assert!(!gate.payload_allowed());
        let steps = gate.begin().expect("idle gate accepts update");
        assert_eq!(
            steps,
            [TeardownStep::StopListeners, TeardownStep::ReleaseCamera]
        );
        assert!(gate.payload_allowed());
    }

    #[test]
    fn concurrent_update_rejected() {
        let mut gate = UpdateGate::new();
        gate.begin().unwrap();
        assert_eq!(gate.begin(), Err(UpdateRejected));
    }

    #[test]
    fn finished_device_stays_down_until_restart() {
        let mut gate = UpdateGate::new();
        gate.begin().unwrap();
        gate.finish(UpdateOutcome::Failed);
        assert_eq!(gate.phase(), UpdatePhase::Done(UpdateOutcome::Failed));
        assert!(!gate.payload_allowed());
        // No second update without a reboot, even after failure.
        assert_eq!(gate.begin(), Err(UpdateRejected));
    }

    #[test]
    fn finish_is_ignored_when_idle() {
        let mut gate = UpdateGate::new();
        gate.finish(UpdateOutcome::Success);
        assert_eq!(gate.phase(), UpdatePhase::Idle);
    }

    #[test]
    fn phase_strings_for_status_endpoint() {
        assert_eq!(UpdatePhase::Idle.as_str(), "idle");
        assert_eq!(UpdatePhase::Active.as_str(), "active");
        assert_eq!(UpdatePhase::Done(UpdateOutcome::Success).as_str(), "success");
        assert_eq!(UpdatePhase::Done(UpdateOutcome::Failed).as_str(), "failed");
    }
}
