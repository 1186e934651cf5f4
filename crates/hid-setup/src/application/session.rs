//! The accessory backend port and the [`Session`] that owns it.
//!
//! # Acquire and release (for beginners)
//!
//! Bringing up HID input on a phone acquires resources in a fixed order, and
//! every one of them must be released again, in reverse dependency order,
//! no matter where a run stops:
//!
//! | Acquire (stage)    | Release                                   |
//! |--------------------|-------------------------------------------|
//! | `init_context`     | `destroy_context`                         |
//! | `discover`         | `release_device`                          |
//! | `connect`          | `stop_usb`, `join_usb`, `disconnect`      |
//! | `init_accessory`   | `join_accessory`, `destroy_accessory`     |
//! | `init_keyboard`    | `destroy_keyboard`                        |
//! | `init_mouse`       | `destroy_mouse`                           |
//! | `start`            | `stop`                                    |
//!
//! [`Session`] records a flag for each stage that succeeded.  Its
//! [`Session::teardown`] walks the release column for exactly the flags that
//! are set, then clears them, so calling it twice is harmless.  `Drop` calls
//! it too: an early `?` return, a panic, or a cancelled future all release
//! the device.
//!
//! A disconnect notification from the backend marks the connection lost.
//! From then on [`Session::state`] reports `Disconnected` and input is
//! refused, but the acquisition flags stay set so teardown still releases
//! every endpoint.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hid_setup_core::ConnectionState;
use thiserror::Error;
use tracing::{debug, info};

use super::actions::{HidSink, KeyEvent, MouseEvent, SendError};

// ── Port types ────────────────────────────────────────────────────────────────

/// Invoked by backend code when the device drops off the bus.
///
/// May be called from any thread, at most once per connection.
pub type DisconnectCallback = Arc<dyn Fn() + Send + Sync>;

/// A fallible lifecycle stage, in startup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    InitContext,
    Discover,
    Connect,
    InitAccessory,
    InitKeyboard,
    InitMouse,
    Start,
}

impl Stage {
    /// Every stage in startup order.
    pub const ALL: [Stage; 7] = [
        Stage::InitContext,
        Stage::Discover,
        Stage::Connect,
        Stage::InitAccessory,
        Stage::InitKeyboard,
        Stage::InitMouse,
        Stage::Start,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::InitContext => "init_context",
            Stage::Discover => "discover",
            Stage::Connect => "connect",
            Stage::InitAccessory => "init_accessory",
            Stage::InitKeyboard => "init_keyboard",
            Stage::InitMouse => "init_mouse",
            Stage::Start => "start",
        };
        f.write_str(name)
    }
}

/// Error type for accessory backend lifecycle calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("no USB device with serial `{serial}`")]
    NotFound { serial: String },
    #[error("device does not support HID over AOA (protocol version {version})")]
    UnsupportedProtocol { version: u16 },
    #[error("USB error: {0}")]
    Usb(String),
    #[error("{0} called out of order")]
    OutOfOrder(Stage),
}

/// A connectable device as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: Option<String>,
}

impl fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:04x}:{:04x}",
            self.serial, self.vendor_id, self.product_id
        )?;
        if let Some(product) = &self.product {
            write!(f, " {product}")?;
        }
        f.write_str(")")
    }
}

/// USB transport plus Android accessory HID lifecycle.
///
/// Lifecycle calls are synchronous and are made only by [`Session`], which
/// guarantees ordering: a release method is called only if its acquiring
/// stage succeeded, and each at most once per acquisition.
pub trait AccessoryBackend: HidSink {
    /// Handle to a discovered device, held until `release_device`.
    type Device: Send + Sync + fmt::Debug;

    fn init_context(&mut self) -> Result<(), BackendError>;

    /// Lists every device currently visible on the bus.
    fn list_devices(&mut self) -> Result<Vec<DeviceSummary>, BackendError>;

    /// Finds a device by serial number.
    fn discover(&mut self, serial: &str) -> Result<Self::Device, BackendError>;

    /// Opens the device and registers the disconnect callback.
    fn connect(
        &mut self,
        device: &Self::Device,
        on_disconnect: DisconnectCallback,
    ) -> Result<(), BackendError>;

    fn init_accessory(&mut self) -> Result<(), BackendError>;

    fn init_keyboard(&mut self) -> Result<(), BackendError>;

    fn init_mouse(&mut self) -> Result<(), BackendError>;

    fn start(&mut self) -> Result<(), BackendError>;

    fn stop(&mut self);

    /// Stops USB event handling for the connected device.
    fn stop_usb(&mut self) {}

    fn destroy_mouse(&mut self);

    fn destroy_keyboard(&mut self);

    /// Waits for accessory background work to finish.
    fn join_accessory(&mut self) {}

    fn destroy_accessory(&mut self);

    /// Waits for USB event handling to finish.
    fn join_usb(&mut self) {}

    fn disconnect(&mut self);

    fn release_device(&mut self, device: Self::Device);

    fn destroy_context(&mut self);
}

// ── Session ───────────────────────────────────────────────────────────────────

/// A startup stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: BackendError,
}

/// The single accessory session of a run.
///
/// Owns the backend exclusively; there is never more than one session per
/// process.
pub struct Session<B: AccessoryBackend> {
    backend: B,
    context: bool,
    device: Option<B::Device>,
    usb_connected: bool,
    accessory: bool,
    keyboard: bool,
    mouse: bool,
    started: bool,
    /// Set by the disconnect callback of the current connection.
    lost: Arc<AtomicBool>,
}

impl<B: AccessoryBackend> Session<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            context: false,
            device: None,
            usb_connected: false,
            accessory: false,
            keyboard: false,
            mouse: false,
            started: false,
            lost: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current lifecycle stage, derived from what is held.
    ///
    /// Collapses to `Disconnected` once the backend has reported the device
    /// gone, even though endpoints are still held for teardown.
    pub fn state(&self) -> ConnectionState {
        if self.connection_lost() {
            ConnectionState::Disconnected
        } else if self.started {
            ConnectionState::Started
        } else if self.mouse {
            ConnectionState::MouseReady
        } else if self.keyboard {
            ConnectionState::KeyboardReady
        } else if self.accessory {
            ConnectionState::AccessoryInitialized
        } else if self.usb_connected {
            ConnectionState::UsbConnected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Returns `true` once the current connection's disconnect callback fired.
    pub fn connection_lost(&self) -> bool {
        self.usb_connected && self.lost.load(Ordering::SeqCst)
    }

    fn holds_connection(&self) -> bool {
        self.usb_connected || self.accessory || self.keyboard || self.mouse || self.started
    }

    /// Returns `true` while a discovered device handle is still held.
    pub fn holds_device(&self) -> bool {
        self.device.is_some()
    }

    /// Initialises the USB context.  Does nothing if already initialised.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] for [`Stage::InitContext`].
    pub fn init_context(&mut self) -> Result<(), StageError> {
        if self.context {
            return Ok(());
        }
        self.backend
            .init_context()
            .map_err(|source| StageError {
                stage: Stage::InitContext,
                source,
            })?;
        self.context = true;
        Ok(())
    }

    /// Lists connectable devices.
    ///
    /// # Errors
    ///
    /// Returns the backend error if enumeration fails.
    pub fn list_devices(&mut self) -> Result<Vec<DeviceSummary>, BackendError> {
        self.backend.list_devices()
    }

    /// Runs the startup stages from discovery through `start`.
    ///
    /// On error, every stage that did succeed stays recorded and is released
    /// by the next [`Session::teardown`] or [`Session::release_connection`].
    ///
    /// # Errors
    ///
    /// Returns the first [`StageError`].  The context must already be
    /// initialised and no connection may be held.
    pub fn bring_up(
        &mut self,
        serial: &str,
        on_disconnect: DisconnectCallback,
    ) -> Result<(), StageError> {
        let fail = |stage| move |source| StageError { stage, source };

        if !self.context || self.device.is_some() || self.usb_connected {
            return Err(StageError {
                stage: Stage::Discover,
                source: BackendError::OutOfOrder(Stage::Discover),
            });
        }

        let device = self
            .backend
            .discover(serial)
            .map_err(fail(Stage::Discover))?;
        debug!(?device, "device found");
        let device = self.device.insert(device);

        // A fresh flag per connection: a late callback from the previous
        // connection cannot mark this one lost.
        let lost = Arc::new(AtomicBool::new(false));
        self.lost = Arc::clone(&lost);
        let on_disconnect: DisconnectCallback = Arc::new(move || {
            lost.store(true, Ordering::SeqCst);
            on_disconnect();
        });

        self.backend
            .connect(device, on_disconnect)
            .map_err(fail(Stage::Connect))?;
        self.usb_connected = true;

        self.backend
            .init_accessory()
            .map_err(fail(Stage::InitAccessory))?;
        self.accessory = true;

        self.backend
            .init_keyboard()
            .map_err(fail(Stage::InitKeyboard))?;
        self.keyboard = true;

        self.backend
            .init_mouse()
            .map_err(fail(Stage::InitMouse))?;
        self.mouse = true;

        self.backend.start().map_err(fail(Stage::Start))?;
        self.started = true;

        info!(serial, "accessory session started");
        Ok(())
    }

    /// Releases the discovery handle once the connection no longer needs it.
    pub fn release_device(&mut self) {
        if let Some(device) = self.device.take() {
            self.backend.release_device(device);
        }
    }

    /// Releases everything except the USB context.
    ///
    /// Used before rebuilding the session after the device re-enumerates.
    pub fn release_connection(&mut self) {
        if self.started {
            self.backend.stop();
            self.started = false;
        }
        if self.usb_connected {
            self.backend.stop_usb();
        }
        if self.mouse {
            self.backend.destroy_mouse();
            self.mouse = false;
        }
        if self.keyboard {
            self.backend.destroy_keyboard();
            self.keyboard = false;
        }
        if self.accessory {
            self.backend.join_accessory();
            self.backend.destroy_accessory();
            self.accessory = false;
        }
        if self.usb_connected {
            self.backend.join_usb();
            self.backend.disconnect();
            self.usb_connected = false;
        }
        self.release_device();
    }

    /// Releases every held resource in reverse dependency order.
    ///
    /// Idempotent: a second call finds nothing held and does nothing.
    pub fn teardown(&mut self) {
        let held = self.holds_connection() || self.device.is_some() || self.context;
        if !held {
            return;
        }
        debug!(state = %self.state(), "tearing down accessory session");
        self.release_connection();
        if self.context {
            self.backend.destroy_context();
            self.context = false;
        }
    }
}

impl<B: AccessoryBackend> HidSink for Session<B> {
    fn send_key(&self, event: &KeyEvent) -> Result<(), SendError> {
        if !self.started || self.connection_lost() {
            return Err(SendError::NotStarted {
                state: self.state(),
            });
        }
        self.backend.send_key(event)
    }

    fn send_mouse(&self, event: &MouseEvent) -> Result<(), SendError> {
        if !self.started || self.connection_lost() {
            return Err(SendError::NotStarted {
                state: self.state(),
            });
        }
        self.backend.send_mouse(event)
    }
}

impl<B: AccessoryBackend> Drop for Session<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use hid_setup_core::{HidKeyCode, KeyStroke};

    use super::*;

    /// Minimal backend that records lifecycle call names.
    #[derive(Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<&'static str>>>,
        fail_at: Option<Stage>,
        on_disconnect: Arc<Mutex<Option<DisconnectCallback>>>,
    }

    impl Recorder {
        fn push(&self, name: &'static str) {
            self.calls.lock().unwrap().push(name);
        }

        fn stage(&self, stage: Stage, name: &'static str) -> Result<(), BackendError> {
            if self.fail_at == Some(stage) {
                return Err(BackendError::Usb("injected".into()));
            }
            self.push(name);
            Ok(())
        }
    }

    impl HidSink for Recorder {
        fn send_key(&self, _event: &KeyEvent) -> Result<(), SendError> {
            self.push("send_key");
            Ok(())
        }

        fn send_mouse(&self, _event: &MouseEvent) -> Result<(), SendError> {
            self.push("send_mouse");
            Ok(())
        }
    }

    impl AccessoryBackend for Recorder {
        type Device = String;

        fn init_context(&mut self) -> Result<(), BackendError> {
            self.stage(Stage::InitContext, "init_context")
        }
        fn list_devices(&mut self) -> Result<Vec<DeviceSummary>, BackendError> {
            Ok(Vec::new())
        }
        fn discover(&mut self, serial: &str) -> Result<String, BackendError> {
            self.stage(Stage::Discover, "discover")?;
            Ok(serial.to_string())
        }
        fn connect(&mut self, _: &String, cb: DisconnectCallback) -> Result<(), BackendError> {
            self.stage(Stage::Connect, "connect")?;
            *self.on_disconnect.lock().unwrap() = Some(cb);
            Ok(())
        }
        fn init_accessory(&mut self) -> Result<(), BackendError> {
            self.stage(Stage::InitAccessory, "init_accessory")
        }
        fn init_keyboard(&mut self) -> Result<(), BackendError> {
            self.stage(Stage::InitKeyboard, "init_keyboard")
        }
        fn init_mouse(&mut self) -> Result<(), BackendError> {
            self.stage(Stage::InitMouse, "init_mouse")
        }
        fn start(&mut self) -> Result<(), BackendError> {
            self.stage(Stage::Start, "start")
        }
        fn stop(&mut self) {
            self.push("stop");
        }
        fn stop_usb(&mut self) {
            self.push("stop_usb");
        }
        fn destroy_mouse(&mut self) {
            self.push("destroy_mouse");
        }
        fn destroy_keyboard(&mut self) {
            self.push("destroy_keyboard");
        }
        fn join_accessory(&mut self) {
            self.push("join_accessory");
        }
        fn destroy_accessory(&mut self) {
            self.push("destroy_accessory");
        }
        fn join_usb(&mut self) {
            self.push("join_usb");
        }
        fn disconnect(&mut self) {
            self.push("disconnect");
        }
        fn release_device(&mut self, _: String) {
            self.push("release_device");
        }
        fn destroy_context(&mut self) {
            self.push("destroy_context");
        }
    }

    fn noop_callback() -> DisconnectCallback {
        Arc::new(|| {})
    }

    #[test]
    fn test_full_teardown_releases_in_reverse_dependency_order() {
        // Arrange
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut session = Session::new(Recorder {
            calls: Arc::clone(&calls),
            ..Default::default()
        });
        session.init_context().unwrap();
        session.bring_up("ABC123", noop_callback()).unwrap();
        calls.lock().unwrap().clear();

        // Act
        session.teardown();

        // Assert
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "stop",
                "stop_usb",
                "destroy_mouse",
                "destroy_keyboard",
                "join_accessory",
                "destroy_accessory",
                "join_usb",
                "disconnect",
                "release_device",
                "destroy_context",
            ]
        );
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut session = Session::new(Recorder {
            calls: Arc::clone(&calls),
            ..Default::default()
        });
        session.init_context().unwrap();
        session.bring_up("ABC123", noop_callback()).unwrap();
        session.teardown();
        let after_first = calls.lock().unwrap().len();

        session.teardown();
        drop(session);

        assert_eq!(calls.lock().unwrap().len(), after_first);
    }

    #[test]
    fn test_failure_at_keyboard_releases_only_what_was_acquired() {
        // Arrange
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut session = Session::new(Recorder {
            calls: Arc::clone(&calls),
            fail_at: Some(Stage::InitKeyboard),
            ..Default::default()
        });
        session.init_context().unwrap();

        // Act
        let err = session.bring_up("ABC123", noop_callback()).unwrap_err();
        assert_eq!(session.state(), ConnectionState::AccessoryInitialized);
        calls.lock().unwrap().clear();
        drop(session);

        // Assert
        assert_eq!(err.stage, Stage::InitKeyboard);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "stop_usb",
                "join_accessory",
                "destroy_accessory",
                "join_usb",
                "disconnect",
                "release_device",
                "destroy_context",
            ]
        );
    }

    #[test]
    fn test_release_connection_keeps_context() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut session = Session::new(Recorder {
            calls: Arc::clone(&calls),
            ..Default::default()
        });
        session.init_context().unwrap();
        session.bring_up("ABC123", noop_callback()).unwrap();
        session.release_device();

        session.release_connection();

        assert!(!calls.lock().unwrap().contains(&"destroy_context"));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        session.bring_up("ABC123", noop_callback()).unwrap();
        assert_eq!(session.state(), ConnectionState::Started);
    }

    #[test]
    fn test_failed_bring_up_only_ever_moved_forward_one_stage() {
        for stage in Stage::ALL.into_iter().skip(2) {
            // Arrange
            let mut session = Session::new(Recorder {
                fail_at: Some(stage),
                ..Default::default()
            });
            session.init_context().unwrap();

            // Act
            let err = session.bring_up("ABC123", noop_callback()).unwrap_err();

            // Assert: the state reached is the one just before the failing stage.
            assert_eq!(err.stage, stage);
            let reached = session.state();
            let mut expected = ConnectionState::Disconnected;
            for _ in Stage::ALL.iter().skip(2).take_while(|s| **s != stage) {
                let next = expected.next().unwrap();
                assert!(expected.can_transition_to(next));
                expected = next;
            }
            assert_eq!(reached, expected);
            session.teardown();
            assert!(ConnectionState::Started.can_transition_to(session.state()));
        }
    }

    fn fire_disconnect(slot: &Arc<Mutex<Option<DisconnectCallback>>>) {
        let callback = slot.lock().unwrap().clone().expect("connect stored a callback");
        callback();
    }

    #[test]
    fn test_disconnect_notification_collapses_state_and_refuses_input() {
        // Arrange
        let calls = Arc::new(Mutex::new(Vec::new()));
        let slot = Arc::new(Mutex::new(None));
        let notified = Arc::new(AtomicBool::new(false));
        let mut session = Session::new(Recorder {
            calls: Arc::clone(&calls),
            on_disconnect: Arc::clone(&slot),
            ..Default::default()
        });
        session.init_context().unwrap();
        let seen = Arc::clone(&notified);
        session
            .bring_up("ABC123", Arc::new(move || seen.store(true, Ordering::SeqCst)))
            .unwrap();
        session.release_device();
        assert_eq!(session.state(), ConnectionState::Started);

        // Act
        fire_disconnect(&slot);
        let result = session.send_key(&KeyEvent::press(KeyStroke::plain(HidKeyCode::Enter)));

        // Assert
        assert!(notified.load(Ordering::SeqCst), "caller's callback still runs");
        assert!(session.connection_lost());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(
            result,
            Err(SendError::NotStarted {
                state: ConnectionState::Disconnected
            })
        );
        assert!(!calls.lock().unwrap().contains(&"send_key"));

        // Teardown still releases every endpoint acquired before the loss.
        calls.lock().unwrap().clear();
        session.teardown();
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "stop",
                "stop_usb",
                "destroy_mouse",
                "destroy_keyboard",
                "join_accessory",
                "destroy_accessory",
                "join_usb",
                "disconnect",
                "destroy_context",
            ]
        );
    }

    #[test]
    fn test_rebuilt_connection_ignores_previous_disconnect_callback() {
        // Arrange
        let slot = Arc::new(Mutex::new(None));
        let mut session = Session::new(Recorder {
            on_disconnect: Arc::clone(&slot),
            ..Default::default()
        });
        session.init_context().unwrap();
        session.bring_up("ABC123", noop_callback()).unwrap();
        let stale = slot.lock().unwrap().clone().unwrap();
        fire_disconnect(&slot);
        session.release_connection();

        // Act
        session.bring_up("ABC123", noop_callback()).unwrap();
        stale();

        // Assert
        assert!(!session.connection_lost());
        assert_eq!(session.state(), ConnectionState::Started);
        assert!(session
            .send_key(&KeyEvent::press(KeyStroke::plain(HidKeyCode::Enter)))
            .is_ok());
    }

    #[test]
    fn test_send_before_start_is_rejected_with_state() {
        let mut session = Session::new(Recorder::default());
        session.init_context().unwrap();

        let result = session.send_key(&KeyEvent::press(KeyStroke::plain(HidKeyCode::Enter)));

        assert_eq!(
            result,
            Err(SendError::NotStarted {
                state: ConnectionState::Disconnected
            })
        );
    }

    #[test]
    fn test_bring_up_without_context_is_out_of_order() {
        let mut session = Session::new(Recorder::default());

        let err = session.bring_up("ABC123", noop_callback()).unwrap_err();

        assert_eq!(err.source, BackendError::OutOfOrder(Stage::Discover));
        assert!(!session.holds_device());
    }

    #[test]
    fn test_stage_display_names() {
        let names: Vec<String> = Stage::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec![
                "init_context",
                "discover",
                "connect",
                "init_accessory",
                "init_keyboard",
                "init_mouse",
                "start"
            ]
        );
    }
}
