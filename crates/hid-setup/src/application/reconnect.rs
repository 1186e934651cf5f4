//! ReconnectionSupervisor: rebuilds the session after the device re-enumerates.
//!
//! Enabling USB debugging makes the phone drop off the bus and come back as
//! a new USB device.  The old session is dead at that point, so the
//! supervisor runs a fixed procedure:
//!
//! ```text
//! 1. wait disconnect_settle           (phone finishes dropping off)
//! 2. discover the serial again        ── DeviceNotFound stops here
//! 3. connect + accessory handshake
//! 4. register keyboard and mouse
//! 5. start
//! 6. wait services_settle             (phone services come back)
//! 7. trigger the debug prompt, wait, accept it, go home
//! ```
//!
//! Every step runs only if the one before succeeded, and nothing is
//! retried.  Steps 1-6 are verified by nothing but fixed delays.

use std::time::Duration;

use async_trait::async_trait;
use hid_setup_core::{HidKeyCode, KeyStroke, Macro, Step};
use thiserror::Error;
use tracing::info;

use super::actions::{perform, ActionError};
use super::session::{AccessoryBackend, BackendError, DisconnectCallback, Session, Stage};

// ── Debug prompt port ─────────────────────────────────────────────────────────

/// Error raised when the host cannot trigger the debug prompt.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Makes the phone show its "allow USB debugging" dialog.
///
/// The dialog appears when a host-side ADB client first talks to a phone
/// that has debugging enabled but does not yet trust this host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DebugPromptTrigger: Send + Sync {
    async fn trigger(&self) -> Result<(), PromptError>;
}

// ── Supervisor ────────────────────────────────────────────────────────────────

/// Fixed waits used by the reconnect procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectSettings {
    /// Step 1: wait for the device to finish disconnecting.
    pub disconnect_settle: Duration,
    /// Step 6: wait for device services after the session restarts.
    pub services_settle: Duration,
    /// Wait between triggering the debug prompt and answering it.
    pub prompt_wait: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            disconnect_settle: Duration::from_millis(1000),
            services_settle: Duration::from_millis(1000),
            prompt_wait: Duration::from_millis(1000),
        }
    }
}

/// Error type for the reconnect procedure.
#[derive(Debug, Error)]
pub enum ReconnectError {
    #[error("device `{serial}` did not come back after disconnecting")]
    DeviceNotFound { serial: String },
    #[error("rebuilding the session failed at {stage}: {source}")]
    Rebuild {
        stage: Stage,
        #[source]
        source: BackendError,
    },
    #[error("could not trigger the debug prompt: {0}")]
    Prompt(#[from] PromptError),
    #[error("answering the debug prompt failed: {0}")]
    Accept(#[source] ActionError),
}

/// Key sequence that answers the debug prompt and returns to the home screen.
///
/// Enter ticks "always allow from this computer", the confirm macro presses
/// the dialog's allow button, and three back gestures leave settings.
pub fn accept_prompt_steps() -> Vec<Step> {
    let mut steps = vec![
        Step::key(KeyStroke::plain(HidKeyCode::Enter)),
        Step::Macro(Macro::Confirm),
    ];
    steps.extend(std::iter::repeat(Step::Macro(Macro::Back)).take(3));
    steps
}

/// Runs the reconnect procedure against a [`Session`].
pub struct ReconnectionSupervisor<'p, P: DebugPromptTrigger + ?Sized> {
    settings: ReconnectSettings,
    prompt: &'p P,
}

impl<'p, P: DebugPromptTrigger + ?Sized> ReconnectionSupervisor<'p, P> {
    pub fn new(settings: ReconnectSettings, prompt: &'p P) -> Self {
        Self { settings, prompt }
    }

    /// Rebuilds `session` for `serial` and accepts the debug prompt.
    ///
    /// # Errors
    ///
    /// Returns [`ReconnectError::DeviceNotFound`] if discovery fails, and the
    /// first other failure otherwise.  The session keeps whatever was
    /// acquired before the failure so its teardown can release it.
    pub async fn reconnect<B: AccessoryBackend>(
        &self,
        session: &mut Session<B>,
        serial: &str,
        on_disconnect: DisconnectCallback,
    ) -> Result<(), ReconnectError> {
        info!(wait = ?self.settings.disconnect_settle, "reconnect 1/7: waiting for device to disconnect");
        tokio::time::sleep(self.settings.disconnect_settle).await;
        session.release_connection();

        info!(serial, "reconnect 2-5/7: rediscovering and restarting accessory session");
        session
            .bring_up(serial, on_disconnect)
            .map_err(|e| match e.stage {
                Stage::Discover => ReconnectError::DeviceNotFound {
                    serial: serial.to_string(),
                },
                stage => ReconnectError::Rebuild {
                    stage,
                    source: e.source,
                },
            })?;
        session.release_device();

        info!(wait = ?self.settings.services_settle, "reconnect 6/7: waiting for device services");
        tokio::time::sleep(self.settings.services_settle).await;

        info!("reconnect 7/7: triggering and accepting the debug prompt");
        self.prompt.trigger().await?;
        tokio::time::sleep(self.settings.prompt_wait).await;
        for step in accept_prompt_steps() {
            perform(&*session, &step)
                .await
                .map_err(ReconnectError::Accept)?;
        }

        info!("reconnect complete");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use hid_setup_core::ConnectionState;
    use tokio::time::Instant;

    use super::*;
    use crate::application::actions::{Action, HidSink, KeyEvent, MouseEvent, SendError};
    use crate::application::session::DeviceSummary;

    /// Backend whose discover call fails once `discover_budget` is spent.
    #[derive(Default)]
    struct FlakyBackend {
        discover_budget: usize,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FlakyBackend {
        fn log(&self, name: &str) {
            self.calls.lock().unwrap().push(name.to_string());
        }
    }

    impl HidSink for FlakyBackend {
        fn send_key(&self, event: &KeyEvent) -> Result<(), SendError> {
            if event.action == Action::Press {
                self.log(&format!("key {:?} {}", event.key, event.modifiers));
            }
            Ok(())
        }
        fn send_mouse(&self, _event: &MouseEvent) -> Result<(), SendError> {
            Ok(())
        }
    }

    impl AccessoryBackend for FlakyBackend {
        type Device = ();

        fn init_context(&mut self) -> Result<(), BackendError> {
            Ok(())
        }
        fn list_devices(&mut self) -> Result<Vec<DeviceSummary>, BackendError> {
            Ok(Vec::new())
        }
        fn discover(&mut self, serial: &str) -> Result<(), BackendError> {
            if self.discover_budget == 0 {
                return Err(BackendError::NotFound {
                    serial: serial.to_string(),
                });
            }
            self.discover_budget -= 1;
            self.log("discover");
            Ok(())
        }
        fn connect(&mut self, _: &(), _: DisconnectCallback) -> Result<(), BackendError> {
            self.log("connect");
            Ok(())
        }
        fn init_accessory(&mut self) -> Result<(), BackendError> {
            self.log("init_accessory");
            Ok(())
        }
        fn init_keyboard(&mut self) -> Result<(), BackendError> {
            self.log("init_keyboard");
            Ok(())
        }
        fn init_mouse(&mut self) -> Result<(), BackendError> {
            self.log("init_mouse");
            Ok(())
        }
        fn start(&mut self) -> Result<(), BackendError> {
            self.log("start");
            Ok(())
        }
        fn stop(&mut self) {}
        fn destroy_mouse(&mut self) {}
        fn destroy_keyboard(&mut self) {}
        fn destroy_accessory(&mut self) {}
        fn disconnect(&mut self) {}
        fn release_device(&mut self, _: ()) {}
        fn destroy_context(&mut self) {}
    }

    fn started_session(discover_budget: usize) -> (Session<FlakyBackend>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut session = Session::new(FlakyBackend {
            discover_budget,
            calls: Arc::clone(&calls),
        });
        session.init_context().unwrap();
        session.bring_up("ABC123", Arc::new(|| {})).unwrap();
        calls.lock().unwrap().clear();
        (session, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_rebuilds_session_and_accepts_prompt() {
        // Arrange
        let (mut session, calls) = started_session(2);
        let mut prompt = MockDebugPromptTrigger::new();
        prompt.expect_trigger().times(1).returning(|| Ok(()));
        let supervisor = ReconnectionSupervisor::new(ReconnectSettings::default(), &prompt);
        let start = Instant::now();

        // Act
        supervisor
            .reconnect(&mut session, "ABC123", Arc::new(|| {}))
            .await
            .unwrap();

        // Assert
        assert_eq!(session.state(), ConnectionState::Started);
        assert!(!session.holds_device());
        let calls = calls.lock().unwrap();
        assert_eq!(
            calls[..6],
            ["discover", "connect", "init_accessory", "init_keyboard", "init_mouse", "start"]
        );
        assert_eq!(
            calls[6..],
            [
                "key Enter none",
                "key Tab shift",
                "key Enter none",
                "key ArrowLeft meta",
                "key ArrowLeft meta",
                "key ArrowLeft meta",
            ]
        );
        // 3 × 1000 ms waits, Enter (400), confirm (2600), back × 3 (1200)
        assert_eq!(start.elapsed(), Duration::from_millis(7200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_failure_stops_before_endpoint_init() {
        // Arrange
        let (mut session, calls) = started_session(1);
        let mut prompt = MockDebugPromptTrigger::new();
        prompt.expect_trigger().never();
        let supervisor = ReconnectionSupervisor::new(ReconnectSettings::default(), &prompt);

        // Act
        let result = supervisor
            .reconnect(&mut session, "ABC123", Arc::new(|| {}))
            .await;

        // Assert
        assert!(matches!(
            result,
            Err(ReconnectError::DeviceNotFound { ref serial }) if serial == "ABC123"
        ));
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_spawn_failure_is_fatal() {
        let (mut session, calls) = started_session(2);
        let mut prompt = MockDebugPromptTrigger::new();
        prompt.expect_trigger().times(1).returning(|| {
            Err(PromptError::Spawn {
                program: "adb".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        });
        let supervisor = ReconnectionSupervisor::new(ReconnectSettings::default(), &prompt);

        let result = supervisor
            .reconnect(&mut session, "ABC123", Arc::new(|| {}))
            .await;

        assert!(matches!(result, Err(ReconnectError::Prompt(_))));
        assert!(!calls.lock().unwrap().iter().any(|c| c.starts_with("key")));
    }

    #[test]
    fn test_accept_prompt_steps_end_with_three_back_gestures() {
        let steps = accept_prompt_steps();

        assert_eq!(steps.len(), 5);
        assert!(steps[2..].iter().all(|s| *s == Step::Macro(Macro::Back)));
    }
}
