//! Orchestrator: one complete run, from device selection to teardown.
//!
//! # Run lifecycle (for beginners)
//!
//! ```text
//! init USB context
//!   └─ resolve profile + script        ── UnsupportedDevice / ResetNotImplemented
//!       └─ discover ─ connect ─ AOA ─ keyboard ─ mouse ─ start
//!           └─ release discovery handle
//!               └─ run steps [0, reconnect_point)
//!                   └─ drain host events, reconnect supervisor
//!                       └─ run steps [reconnect_point, len)
//! teardown (always, whatever happened above)
//! ```
//!
//! The profile is resolved before the phone is touched, so an unknown device
//! type never sends a single HID event.
//!
//! Every failure is final for the run: the orchestrator logs how far the
//! script got, tears the session down, and returns the error.  A caller that
//! wants another attempt starts a new run.

use std::sync::Arc;

use hid_setup_core::{
    DeviceProfile, ProfileLookupError, ProfileRegistry, Script, TaskKind,
};
use thiserror::Error;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use super::actions::ActionError;
use super::events::EventSurface;
use super::reconnect::{DebugPromptTrigger, ReconnectError, ReconnectSettings, ReconnectionSupervisor};
use super::run_script::{EngineError, ScriptEngine};
use super::session::{AccessoryBackend, BackendError, DeviceSummary, Session, Stage, StageError};

/// What to run, and on which device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub serial: String,
    pub device_type: String,
    pub task: TaskKind,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub device_type: String,
    pub task: TaskKind,
    pub steps_executed: usize,
    pub reconnected: bool,
}

/// Error type for a run.  Every variant is final for the run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no USB device with serial `{serial}`")]
    DeviceNotFound { serial: String },
    #[error("connection failed at {stage}: {source}")]
    ConnectionFailed {
        stage: Stage,
        #[source]
        source: BackendError,
    },
    #[error("unsupported device type `{device_type}`")]
    UnsupportedDevice { device_type: String },
    #[error("factory reset is not implemented for `{device_type}` devices: {reason}")]
    ResetNotImplemented { device_type: String, reason: String },
    #[error("step {index} failed: {source}")]
    StepFailed {
        index: usize,
        #[source]
        source: ActionError,
    },
    #[error("reconnect failed: {0}")]
    Reconnect(#[source] ReconnectError),
}

impl RunError {
    fn from_stage(err: StageError, serial: &str) -> Self {
        match err.stage {
            Stage::Discover => RunError::DeviceNotFound {
                serial: serial.to_string(),
            },
            stage => RunError::ConnectionFailed {
                stage,
                source: err.source,
            },
        }
    }
}

impl From<ProfileLookupError> for RunError {
    fn from(err: ProfileLookupError) -> Self {
        match err {
            ProfileLookupError::UnsupportedDevice { device_type } => {
                RunError::UnsupportedDevice { device_type }
            }
            ProfileLookupError::ResetNotImplemented {
                device_type,
                reason,
            } => RunError::ResetNotImplemented {
                device_type,
                reason,
            },
        }
    }
}

impl From<EngineError> for RunError {
    fn from(err: EngineError) -> Self {
        let EngineError::StepFailed { index, source } = err;
        RunError::StepFailed { index, source }
    }
}

impl From<ReconnectError> for RunError {
    fn from(err: ReconnectError) -> Self {
        match err {
            ReconnectError::DeviceNotFound { serial } => RunError::DeviceNotFound { serial },
            other => RunError::Reconnect(other),
        }
    }
}

/// Owns the session and everything else a run needs.
pub struct Orchestrator<B: AccessoryBackend, P: DebugPromptTrigger> {
    session: Session<B>,
    registry: ProfileRegistry,
    prompt: P,
    settings: ReconnectSettings,
    events: EventSurface,
}

impl<B: AccessoryBackend, P: DebugPromptTrigger> Orchestrator<B, P> {
    pub fn new(backend: B, registry: ProfileRegistry, prompt: P) -> Self {
        Self {
            session: Session::new(backend),
            registry,
            prompt,
            settings: ReconnectSettings::default(),
            events: EventSurface::new(),
        }
    }

    pub fn with_reconnect_settings(mut self, settings: ReconnectSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Performs one run.  The session is torn down before this returns,
    /// whether the run succeeded or not.
    ///
    /// # Errors
    ///
    /// Returns the first [`RunError`] encountered.
    pub async fn run(&mut self, request: &RunRequest) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "run",
            %run_id,
            serial = %request.serial,
            device_type = %request.device_type,
            task = %request.task,
        );

        let result = self.run_inner(run_id, request).instrument(span.clone()).await;
        span.in_scope(|| self.session.teardown());

        if let Err(e) = &result {
            span.in_scope(|| error!("run failed: {e}"));
        }
        result
    }

    async fn run_inner(&mut self, run_id: Uuid, request: &RunRequest) -> Result<RunReport, RunError> {
        self.session
            .init_context()
            .map_err(|e| RunError::from_stage(e, &request.serial))?;

        let profile: Arc<DeviceProfile> = self.registry.get(&request.device_type)?;
        let script = profile.script_for(request.task)?;
        info!(
            script = script.name(),
            steps = script.len(),
            reconnect_point = ?script.reconnect_point(),
            "profile selected"
        );

        self.session
            .bring_up(&request.serial, self.events.disconnect_callback())
            .map_err(|e| RunError::from_stage(e, &request.serial))?;
        self.session.release_device();

        let mut engine = ScriptEngine::new(script);
        let outcome = self.execute(script, &mut engine, &request.serial).await;
        match outcome {
            Ok(reconnected) => {
                info!(steps = engine.next_index(), reconnected, "run complete");
                Ok(RunReport {
                    run_id,
                    device_type: profile.device_type.clone(),
                    task: request.task,
                    steps_executed: engine.next_index(),
                    reconnected,
                })
            }
            Err(e) => {
                error!("reached step {} of {}", engine.next_index(), script.len());
                Err(e)
            }
        }
    }

    /// Runs both script segments around the reconnect point.
    async fn execute(
        &mut self,
        script: &Script,
        engine: &mut ScriptEngine<'_>,
        serial: &str,
    ) -> Result<bool, RunError> {
        let (before, after) = script.segments();
        engine.run_until(&self.session, before.end).await?;

        if script.reconnect_point().is_none() {
            return Ok(false);
        }

        for event in self.events.drain() {
            info!(?event, "host event at reconnect point");
        }
        let supervisor = ReconnectionSupervisor::new(self.settings, &self.prompt);
        supervisor
            .reconnect(&mut self.session, serial, self.events.disconnect_callback())
            .await?;

        engine.run_until(&self.session, after.end).await?;
        Ok(true)
    }
}

/// Lists connectable devices on a fresh session, releasing it afterwards.
///
/// Used to show the operator which serials are available.
///
/// # Errors
///
/// Returns the [`StageError`] if the USB context cannot be created, or a
/// [`Stage::Discover`] error if enumeration fails.
pub fn list_devices<B: AccessoryBackend>(backend: B) -> Result<Vec<DeviceSummary>, StageError> {
    let mut session = Session::new(backend);
    session.init_context()?;
    session.list_devices().map_err(|source| StageError {
        stage: Stage::Discover,
        source,
    })
}
