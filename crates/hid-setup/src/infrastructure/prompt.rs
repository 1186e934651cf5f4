//! ADB-based debug prompt trigger.
//!
//! Once USB debugging is switched on, the phone shows "Allow USB debugging?"
//! the first time an ADB client on an untrusted host talks to it.  Running
//! `adb devices -l` is enough to make that happen; its output is irrelevant.
//!
//! Failing to start `adb` at all is an error, since the dialog will never
//! appear.  A non-zero exit is only logged: `adb` routinely complains about
//! an unauthorized device, which is exactly the state being provoked.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::application::reconnect::{DebugPromptTrigger, PromptError};

/// Triggers the debug prompt by running `<adb> devices -l`.
#[derive(Debug, Clone)]
pub struct AdbPromptTrigger {
    adb_path: PathBuf,
}

impl AdbPromptTrigger {
    pub fn new(adb_path: impl Into<PathBuf>) -> Self {
        Self {
            adb_path: adb_path.into(),
        }
    }
}

#[async_trait]
impl DebugPromptTrigger for AdbPromptTrigger {
    async fn trigger(&self) -> Result<(), PromptError> {
        let output = Command::new(&self.adb_path)
            .args(["devices", "-l"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| PromptError::Spawn {
                program: self.adb_path.display().to_string(),
                source,
            })?;

        if output.status.success() {
            debug!(
                stdout = %String::from_utf8_lossy(&output.stdout).trim(),
                "adb devices"
            );
        } else {
            warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "adb exited with an error"
            );
        }
        Ok(())
    }
}
