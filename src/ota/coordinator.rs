//! Executes the update gate's teardown against the live resources.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use log::info;
use stream_core::update::{TeardownStep, UpdateGate, UpdateOutcome, UpdatePhase};

use crate::camera::SharedCamera;
use crate::network::stream_server::StreamServer;
use crate::ota::manager::OtaWriter;

pub struct UpdateCoordinator {
    camera: SharedCamera,
    listener: Mutex<Option<StreamServer>>,
    gate: Mutex<UpdateGate>,
}

impl UpdateCoordinator {
    pub fn new(camera: SharedCamera, listener: StreamServer) -> Arc<Self> {
        Arc::new(Self {
            camera,
            listener: Mutex::new(Some(listener)),
            gate: Mutex::new(UpdateGate::new()),
        })
    }

    /// Seizes the camera and the stream listener, then opens the OTA
    /// session. Teardown runs in gate order: the listener stops first so no
    /// new stream starts while the camera comes down.
    pub fn begin(&self, size: usize) -> Result<OtaWriter> {
        let steps = self
            .gate
            .lock()
            .map_err(|_| anyhow!("update gate poisoned"))?
            .begin()?;

        for step in steps {
            match step {
                TeardownStep::StopListeners => {
                    let stopped = self
                        .listener
                        .lock()
                        .map_err(|_| anyhow!("listener slot poisoned"))?
                        .take();
                    if let Some(listener) = stopped {
                        // Trip the in-flight streams before the drop:
                        // httpd_stop waits for the handler task to go
                        // idle, and a handler streaming to a healthy
                        // client only returns once its writes fail.
                        listener.begin_shutdown();
                        drop(listener);
                        info!("stream listener stopped for update");
                    }
                }
                TeardownStep::ReleaseCamera => {
                    let released = self
                        .camera
                        .lock()
                        .map_err(|_| anyhow!("camera slot poisoned"))?
                        .take();
                    if released.is_some() {
                        info!("camera released for update");
                    }
                }
            }
        }

        match OtaWriter::begin(size) {
            Ok(writer) => Ok(writer),
            Err(e) => {
                // Teardown already happened; the device is down until the
                // caller restarts it.
                self.finish(UpdateOutcome::Failed);
                Err(e.into())
            }
        }
    }

    pub fn finish(&self, outcome: UpdateOutcome) {
        if let Ok(mut gate) = self.gate.lock() {
            gate.finish(outcome);
        }
    }

    pub fn phase(&self) -> UpdatePhase {
        self.gate
            .lock()
            .map(|gate| gate.phase())
            .unwrap_or_default()
    }
}
