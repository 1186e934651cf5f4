//! Mock accessory backend for tests.
//!
//! # Why a mock backend?
//!
//! The real [`super::aoa::AoaBackend`] needs a phone on the USB bus, sends
//! real key presses to it, and gives no way to observe what was sent.  The
//! `MockBackend` replaces every USB call with in-memory recording:
//!
//! - Every lifecycle call and HID event is appended to a log with a
//!   `tokio::time::Instant` timestamp, so tests on a paused clock can check
//!   exact gaps between events.
//! - It tracks which resources are currently held and records a *violation*
//!   whenever something is released that was never acquired (or acquired
//!   twice), so teardown ordering bugs show up as assertion failures.
//!
//! # Usage in tests
//!
//! ```ignore
//! let mock = MockBackend::new().fail_at(Stage::InitMouse);
//! let mut orchestrator = Orchestrator::new(mock.clone(), registry, prompt);
//!
//! let result = orchestrator.run(&request).await;
//!
//! assert!(mock.leaks().is_empty());
//! assert!(mock.violations().is_empty());
//! ```
//!
//! The backend is `Clone`; clones share one log, so a test keeps a clone
//! after handing the original to the orchestrator.
//!
//! # Failure injection
//!
//! - [`MockBackend::fail_at`]: a lifecycle stage always fails.
//! - [`MockBackend::fail_at_attempt`]: a lifecycle stage fails on its `n`th
//!   call only, e.g. `connect` succeeding at startup and failing when the
//!   session is rebuilt after the phone re-enumerates.
//! - [`MockBackend::fail_discover_after`]: discovery succeeds `n` times, then
//!   reports the device missing (a phone that never comes back).
//! - [`MockBackend::fail_sends_after`]: the HID event after the first `n`
//!   fails with a transfer error.
//! - [`MockBackend::disconnect_after_events`]: after `n` HID events the phone
//!   "drops off the bus": the disconnect callback fires and sends fail with
//!   [`SendError::Disconnected`] until the next `connect`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::time::Instant;

use crate::application::actions::{Action, HidSink, KeyEvent, MouseEvent, SendError};
use crate::application::session::{
    AccessoryBackend, BackendError, DeviceSummary, DisconnectCallback, Stage,
};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    InitContext,
    ListDevices,
    Discover(String),
    Connect(String),
    InitAccessory,
    InitKeyboard,
    InitMouse,
    Start,
    Stop,
    StopUsb,
    DestroyMouse,
    DestroyKeyboard,
    JoinAccessory,
    DestroyAccessory,
    JoinUsb,
    Disconnect,
    ReleaseDevice(String),
    DestroyContext,
    Key(KeyEvent),
    Mouse(MouseEvent),
}

impl Call {
    /// Returns `true` for HID input events.
    pub fn is_hid(&self) -> bool {
        matches!(self, Call::Key(_) | Call::Mouse(_))
    }
}

/// A call plus the virtual time it was made at.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub at: Instant,
    pub call: Call,
}

#[derive(Default)]
struct Held {
    context: bool,
    device: usize,
    usb: bool,
    accessory: bool,
    keyboard: bool,
    mouse: bool,
    started: bool,
}

#[derive(Default)]
struct MockState {
    log: Vec<Recorded>,
    held: Held,
    violations: Vec<String>,
    discovers: usize,
    attempts: HashMap<Stage, usize>,
    hid_events: usize,
    on_disconnect: Option<DisconnectCallback>,
    disconnected: bool,
}

impl MockState {
    fn record(&mut self, call: Call) {
        self.log.push(Recorded {
            at: Instant::now(),
            call,
        });
    }

    fn acquire(flag: &mut bool, name: &str, violations: &mut Vec<String>) {
        if *flag {
            violations.push(format!("{name} while already held"));
        }
        *flag = true;
    }

    fn release(flag: &mut bool, name: &str, violations: &mut Vec<String>) {
        if !*flag {
            violations.push(format!("{name} without a matching acquire"));
        }
        *flag = false;
    }

    fn require(flag: bool, name: &str, violations: &mut Vec<String>) {
        if !flag {
            violations.push(format!("{name} on a resource that is not held"));
        }
    }
}

/// A recording [`AccessoryBackend`] with failure injection.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
    devices: Option<Vec<String>>,
    fail_at: Option<Stage>,
    fail_attempt: Option<(Stage, usize)>,
    discover_limit: Option<usize>,
    send_limit: Option<usize>,
    disconnect_after: Option<usize>,
}

impl MockBackend {
    /// Creates a backend on which every serial is discoverable and every
    /// call succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts discovery (and `list_devices`) to these serials.
    pub fn with_devices(mut self, serials: &[&str]) -> Self {
        self.devices = Some(serials.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn fail_at(mut self, stage: Stage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    /// Makes `stage` fail on its `attempt`th call (counting from 1).
    pub fn fail_at_attempt(mut self, stage: Stage, attempt: usize) -> Self {
        self.fail_attempt = Some((stage, attempt));
        self
    }

    pub fn fail_discover_after(mut self, successes: usize) -> Self {
        self.discover_limit = Some(successes);
        self
    }

    pub fn fail_sends_after(mut self, events: usize) -> Self {
        self.send_limit = Some(events);
        self
    }

    pub fn disconnect_after_events(mut self, events: usize) -> Self {
        self.disconnect_after = Some(events);
        self
    }

    /// Fires the registered disconnect callback, as a hot-unplug would.
    pub fn simulate_disconnect(&self) {
        let callback = {
            let mut state = self.state.lock().unwrap();
            state.disconnected = true;
            state.on_disconnect.take()
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .map(|r| r.call.clone())
            .collect()
    }

    /// Every call made so far with its timestamp.
    pub fn recorded(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().log.clone()
    }

    /// Lifecycle calls only (HID events filtered out).
    pub fn lifecycle_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| !c.is_hid()).collect()
    }

    /// Key-down events with their timestamps.
    pub fn key_presses(&self) -> Vec<(Instant, KeyEvent)> {
        self.recorded()
            .into_iter()
            .filter_map(|r| match r.call {
                Call::Key(e) if e.action == Action::Press => Some((r.at, e)),
                _ => None,
            })
            .collect()
    }

    /// Number of HID events (key and mouse) delivered.
    pub fn hid_event_count(&self) -> usize {
        self.state.lock().unwrap().hid_events
    }

    /// Resources that are still held.
    pub fn leaks(&self) -> Vec<&'static str> {
        let state = self.state.lock().unwrap();
        let held = &state.held;
        let mut leaks = Vec::new();
        if held.context {
            leaks.push("context");
        }
        if held.device > 0 {
            leaks.push("device");
        }
        if held.usb {
            leaks.push("usb");
        }
        if held.accessory {
            leaks.push("accessory");
        }
        if held.keyboard {
            leaks.push("keyboard");
        }
        if held.mouse {
            leaks.push("mouse");
        }
        if held.started {
            leaks.push("started");
        }
        leaks
    }

    /// Ordering violations observed so far.
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().unwrap().violations.clone()
    }

    fn stage(&self, state: &mut MockState, stage: Stage) -> Result<(), BackendError> {
        let attempt = state.attempts.entry(stage).or_insert(0);
        *attempt += 1;
        if self.fail_at == Some(stage) || self.fail_attempt == Some((stage, *attempt)) {
            return Err(BackendError::Usb(format!(
                "injected failure at {stage} (attempt {attempt})"
            )));
        }
        Ok(())
    }

    fn deliver(&self, call: Call) -> Result<(), SendError> {
        let callback = {
            let mut state = self.state.lock().unwrap();
            if state.disconnected {
                return Err(SendError::Disconnected);
            }
            if !state.held.started {
                state
                    .violations
                    .push("HID event while accessory is not started".to_string());
            }
            if self.send_limit == Some(state.hid_events) {
                return Err(SendError::Transfer("injected send failure".to_string()));
            }
            state.record(call);
            state.hid_events += 1;
            if self.disconnect_after == Some(state.hid_events) {
                state.disconnected = true;
                state.on_disconnect.take()
            } else {
                None
            }
        };
        if let Some(callback) = callback {
            callback();
        }
        Ok(())
    }
}

impl HidSink for MockBackend {
    fn send_key(&self, event: &KeyEvent) -> Result<(), SendError> {
        self.deliver(Call::Key(*event))
    }

    fn send_mouse(&self, event: &MouseEvent) -> Result<(), SendError> {
        self.deliver(Call::Mouse(*event))
    }
}

impl AccessoryBackend for MockBackend {
    type Device = String;

    fn init_context(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::InitContext);
        self.stage(&mut state, Stage::InitContext)?;
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::acquire(&mut held.context, "init_context", violations);
        Ok(())
    }

    fn list_devices(&mut self) -> Result<Vec<DeviceSummary>, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::ListDevices);
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::require(held.context, "list_devices", violations);
        Ok(self
            .devices
            .iter()
            .flatten()
            .map(|serial| DeviceSummary {
                serial: serial.clone(),
                vendor_id: 0x18d1,
                product_id: 0x4ee7,
                product: Some("Mock Phone".to_string()),
            })
            .collect())
    }

    fn discover(&mut self, serial: &str) -> Result<String, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::Discover(serial.to_string()));
        self.stage(&mut state, Stage::Discover)?;
        let known = self
            .devices
            .as_ref()
            .map_or(true, |devices| devices.iter().any(|d| d == serial));
        let exhausted = self.discover_limit.is_some_and(|limit| state.discovers >= limit);
        if !known || exhausted {
            return Err(BackendError::NotFound {
                serial: serial.to_string(),
            });
        }
        state.discovers += 1;
        state.held.device += 1;
        Ok(serial.to_string())
    }

    fn connect(
        &mut self,
        device: &String,
        on_disconnect: DisconnectCallback,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::Connect(device.clone()));
        self.stage(&mut state, Stage::Connect)?;
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::require(held.device > 0, "connect", violations);
        MockState::acquire(&mut held.usb, "connect", violations);
        state.on_disconnect = Some(on_disconnect);
        state.disconnected = false;
        Ok(())
    }

    fn init_accessory(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::InitAccessory);
        self.stage(&mut state, Stage::InitAccessory)?;
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::require(held.usb, "init_accessory", violations);
        MockState::acquire(&mut held.accessory, "init_accessory", violations);
        Ok(())
    }

    fn init_keyboard(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::InitKeyboard);
        self.stage(&mut state, Stage::InitKeyboard)?;
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::require(held.accessory, "init_keyboard", violations);
        MockState::acquire(&mut held.keyboard, "init_keyboard", violations);
        Ok(())
    }

    fn init_mouse(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::InitMouse);
        self.stage(&mut state, Stage::InitMouse)?;
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::require(held.accessory, "init_mouse", violations);
        MockState::acquire(&mut held.mouse, "init_mouse", violations);
        Ok(())
    }

    fn start(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::Start);
        self.stage(&mut state, Stage::Start)?;
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::require(held.keyboard && held.mouse, "start", violations);
        MockState::acquire(&mut held.started, "start", violations);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.record(Call::Stop);
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::release(&mut held.started, "stop", violations);
    }

    fn stop_usb(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.record(Call::StopUsb);
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::require(held.usb, "stop_usb", violations);
    }

    fn destroy_mouse(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.record(Call::DestroyMouse);
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::release(&mut held.mouse, "destroy_mouse", violations);
    }

    fn destroy_keyboard(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.record(Call::DestroyKeyboard);
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::release(&mut held.keyboard, "destroy_keyboard", violations);
    }

    fn join_accessory(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.record(Call::JoinAccessory);
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::require(held.accessory, "join_accessory", violations);
    }

    fn destroy_accessory(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.record(Call::DestroyAccessory);
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::require(!held.keyboard && !held.mouse, "destroy_accessory", violations);
        MockState::release(&mut held.accessory, "destroy_accessory", violations);
    }

    fn join_usb(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.record(Call::JoinUsb);
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::require(held.usb, "join_usb", violations);
    }

    fn disconnect(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.record(Call::Disconnect);
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::require(!held.accessory, "disconnect", violations);
        MockState::release(&mut held.usb, "disconnect", violations);
        state.on_disconnect = None;
    }

    fn release_device(&mut self, device: String) {
        let mut state = self.state.lock().unwrap();
        state.record(Call::ReleaseDevice(device));
        if state.held.device == 0 {
            state
                .violations
                .push("release_device without a matching discover".to_string());
        } else {
            state.held.device -= 1;
        }
    }

    fn destroy_context(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.record(Call::DestroyContext);
        let MockState {
            held, violations, ..
        } = &mut *state;
        MockState::require(
            held.device == 0 && !held.usb,
            "destroy_context",
            violations,
        );
        MockState::release(&mut held.context, "destroy_context", violations);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
