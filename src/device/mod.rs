//! Device controller: puts the target device into a known state before each task.
//!
//! All device mutation goes through [`DeviceController`]; nothing else in the
//! crate assumes anything about accessibility or overlay state.

pub mod adb;
pub mod keepalive;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{BenchError, BridgeError};

pub use adb::AdbBridge;
pub use keepalive::OverlayKeepalive;

/// Broadcast that hides the portal's debug overlay.
const DISABLE_OVERLAY_BROADCAST: &str =
    "am broadcast -a com.droidrun.portal.TOGGLE_OVERLAY --ez overlay_visible false";

/// Primitive commands against one device.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Runs a shell command on the device and returns its stdout.
    async fn shell(&self, command: &str) -> Result<String, BridgeError>;

    /// Installs (or reinstalls) an APK, granting runtime permissions.
    async fn install(&self, apk: &Path) -> Result<(), BridgeError>;

    /// Restarts the device daemon with root access.
    async fn root(&self) -> Result<(), BridgeError>;

    /// Connection state as reported by the bridge (`device`, `offline`, ...).
    async fn state(&self) -> Result<String, BridgeError>;
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_backoff,
        }
    }

    /// Retries without sleeping between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// Outcome of the one-time device setup.
#[derive(Debug, Clone, Default)]
pub struct SetupReport {
    pub installed: Vec<String>,
    pub rooted: bool,
    pub warnings: Vec<String>,
}

/// Owns all device mutation for a run.
pub struct DeviceController {
    bridge: Arc<dyn DeviceBridge>,
    portal_service: String,
    retry: RetryPolicy,
}

impl DeviceController {
    pub fn new(bridge: Arc<dyn DeviceBridge>, portal_service: impl Into<String>) -> Self {
        Self {
            bridge,
            portal_service: portal_service.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Package part of the portal component name.
    pub fn portal_package(&self) -> &str {
        self.portal_service
            .split('/')
            .next()
            .unwrap_or(&self.portal_service)
    }

    /// Leaves exactly the portal service enabled and the overlay hidden.
    ///
    /// Safe to call before every task. Exhausting the retries means the
    /// device is gone, which ends the run.
    pub async fn reset_accessibility_services(&self) -> Result<(), BenchError> {
        let previous = self
            .with_retry("read accessibility services", || async {
                self.ensure_online().await?;
                self.bridge
                    .shell("settings get secure enabled_accessibility_services")
                    .await
            })
            .await
            .map_err(|e| BenchError::DeviceUnreachable(e.to_string()))?;

        let previous = parse_service_list(&previous);
        let stale: Vec<&String> = previous
            .iter()
            .filter(|s| **s != self.portal_service)
            .collect();
        if !stale.is_empty() {
            debug!(services = ?stale, "Disabling accessibility services");
        }

        let enable = format!(
            "settings put secure enabled_accessibility_services {}",
            self.portal_service
        );
        for command in [
            "settings put secure enabled_accessibility_services ''",
            enable.as_str(),
            "settings put secure accessibility_enabled 1",
        ] {
            self.with_retry(command, || self.bridge.shell(command))
                .await
                .map_err(|e| BenchError::DeviceUnreachable(e.to_string()))?;
        }

        if let Err(e) = self.disable_overlay().await {
            warn!(error = %e, "Failed to disable portal overlay");
        }

        info!(service = %self.portal_service, "Accessibility services reset");
        Ok(())
    }

    /// Hides the portal debug overlay.
    pub async fn disable_overlay(&self) -> Result<(), BridgeError> {
        self.with_retry("disable overlay", || {
            self.bridge.shell(DISABLE_OVERLAY_BROADCAST)
        })
        .await
        .map(|_| ())
    }

    /// Currently enabled accessibility services.
    pub async fn enabled_services(&self) -> Result<Vec<String>, BridgeError> {
        let raw = self
            .bridge
            .shell("settings get secure enabled_accessibility_services")
            .await?;
        Ok(parse_service_list(&raw))
    }

    pub async fn install_app(&self, apk: &Path) -> Result<(), BenchError> {
        self.with_retry("install app", || self.bridge.install(apk))
            .await
            .map_err(|e| BenchError::TaskSetup(format!("install {}: {}", apk.display(), e)))
    }

    pub async fn ensure_root(&self) -> Result<(), BenchError> {
        self.with_retry("root", || self.bridge.root())
            .await
            .map_err(|e| BenchError::TaskSetup(format!("root: {}", e)))
    }

    /// One-time setup; failures are reported as warnings.
    pub async fn perform_first_run_setup(&self, portal_apk: Option<&Path>) -> SetupReport {
        let mut report = SetupReport::default();

        match portal_apk {
            Some(apk) if apk.exists() => match self.install_app(apk).await {
                Ok(()) => report.installed.push(apk.display().to_string()),
                Err(e) => report.warnings.push(e.to_string()),
            },
            Some(apk) => report
                .warnings
                .push(format!("portal APK not found at {}", apk.display())),
            None => report
                .warnings
                .push("no portal APK given; assuming the portal is installed".to_string()),
        }

        match self.ensure_root().await {
            Ok(()) => report.rooted = true,
            Err(e) => report.warnings.push(e.to_string()),
        }

        for warning in &report.warnings {
            warn!("Device setup: {}", warning);
        }
        info!(
            installed = report.installed.len(),
            rooted = report.rooted,
            "First-run device setup finished"
        );
        report
    }

    /// Current UI state as exposed by the portal content provider.
    ///
    /// `Ok(None)` when the portal answered but had no usable state. Errors
    /// that point at a lost connection are returned so the caller can
    /// decide whether the device is gone.
    pub async fn observe(&self) -> Result<Option<Value>, BridgeError> {
        let command = format!(
            "content query --uri content://{}/state",
            self.portal_package()
        );
        match self.bridge.shell(&command).await {
            Ok(raw) => Ok(parse_portal_state(&raw)),
            Err(e) if e.is_connection_loss() => Err(e),
            Err(e) => {
                debug!(error = %e, "Portal state unavailable");
                Ok(None)
            }
        }
    }

    /// Fails unless the bridge reports the device as attached.
    pub async fn ensure_online(&self) -> Result<(), BridgeError> {
        let state = self.bridge.state().await?;
        if state != "device" {
            return Err(BridgeError::Offline(state));
        }
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, BridgeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry.attempts => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        operation = what,
                        attempt,
                        error = %e,
                        "Device command failed, retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Parses the colon-separated `enabled_accessibility_services` value.
fn parse_service_list(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "null" {
        return Vec::new();
    }
    raw.split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "''")
        .map(String::from)
        .collect()
}

/// Extracts the JSON payload from `content query` output.
fn parse_portal_state(raw: &str) -> Option<Value> {
    let start = raw.find('{')?;
    let value: Value = serde_json::from_str(raw[start..].trim()).ok()?;
    // The portal wraps its payload as {"status": .., "data": "<json string>"}.
    match value.get("data") {
        Some(Value::String(inner)) => serde_json::from_str(inner)
            .ok()
            .or_else(|| Some(Value::String(inner.clone()))),
        Some(other) => Some(other.clone()),
        None => Some(value),
    }
}
