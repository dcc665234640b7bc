//! `adb`-backed device bridge.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::DeviceBridge;
use crate::error::BridgeError;

/// Runs adb commands against one device serial.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    adb_path: PathBuf,
    serial: String,
    command_timeout: Duration,
    install_timeout: Duration,
}

impl AdbBridge {
    pub fn new(adb_path: impl Into<PathBuf>, serial: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial: serial.into(),
            command_timeout: Duration::from_secs(60),
            install_timeout: Duration::from_secs(300),
        }
    }

    /// Arguments for one invocation, always pinned to the serial.
    fn args_for<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = vec!["-s", self.serial.as_str()];
        full.extend_from_slice(args);
        full
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<String, BridgeError> {
        let full = self.args_for(args);
        debug!(adb = %self.adb_path.display(), args = ?full, "Running adb");

        let mut cmd = Command::new(&self.adb_path);
        cmd.args(&full)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BridgeError::NotFound(self.adb_path.display().to_string()))
            }
            Ok(Err(e)) => return Err(BridgeError::Io(e)),
            Err(_) => return Err(BridgeError::Timeout(timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let status = output.status.code().unwrap_or(-1);
            if is_offline_message(&stderr) {
                return Err(BridgeError::Offline(stderr.trim().to_string()));
            }
            return Err(BridgeError::CommandFailed {
                status,
                detail: format_output(&stdout, &stderr),
            });
        }

        Ok(stdout)
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn shell(&self, command: &str) -> Result<String, BridgeError> {
        self.run(&["shell", command], self.command_timeout).await
    }

    async fn install(&self, apk: &Path) -> Result<(), BridgeError> {
        let apk = apk.to_string_lossy();
        let out = self
            .run(&["install", "-r", "-g", apk.as_ref()], self.install_timeout)
            .await?;
        // Older adb versions exit 0 on install failure.
        if out.contains("Failure") {
            return Err(BridgeError::CommandFailed {
                status: 0,
                detail: out.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn root(&self) -> Result<(), BridgeError> {
        self.run(&["root"], self.command_timeout).await?;
        self.run(&["wait-for-device"], self.command_timeout).await?;
        Ok(())
    }

    async fn state(&self) -> Result<String, BridgeError> {
        let out = self.run(&["get-state"], self.command_timeout).await?;
        Ok(out.trim().to_string())
    }
}

fn is_offline_message(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("device offline")
        || lower.contains("no devices/emulators found")
        || (lower.contains("device '") && lower.contains("not found"))
}

fn format_output(stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim();
    let stderr = stderr.trim();
    match (stdout.is_empty(), stderr.is_empty()) {
        (true, true) => "no output".to_string(),
        (false, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{}\n{}", stdout, stderr),
    }
}
