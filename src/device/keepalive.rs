//! Background task that keeps the portal overlay hidden.
//!
//! The portal re-enables its debug overlay on its own, so a single broadcast
//! at reset time does not hold for a long task.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::DeviceController;

/// Re-sends the overlay-disable broadcast every `interval` until stopped.
pub struct OverlayKeepalive {
    handle: Option<JoinHandle<()>>,
}

impl OverlayKeepalive {
    pub fn start(device: Arc<DeviceController>, interval: Duration) -> Self {
        debug!(interval_secs = interval.as_secs_f64(), "Starting overlay keepalive");
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // reset already hid the overlay

            loop {
                tick.tick().await;
                if let Err(e) = device.disable_overlay().await {
                    debug!(error = %e, "Overlay keepalive broadcast failed");
                }
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    /// Cancels the background task and waits for it to wind down.
    pub async fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        debug!("Overlay keepalive stopped");
    }
}

impl Drop for OverlayKeepalive {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
