//! Android Open Accessory (AOA) HID backend over `nusb`.
//!
//! # What is AOA HID? (for beginners)
//!
//! Android Open Accessory protocol version 2 lets a USB *host* register
//! virtual HID devices on a phone with nothing but vendor control transfers
//! on endpoint 0.  The phone then treats the host as a plugged-in keyboard
//! and mouse.  No app, no ADB, no accessory-mode switch is needed, which is
//! exactly what a phone sitting on its first-boot welcome screen allows.
//!
//! | Request               | Code | `value`    | `index`      | Data            |
//! |-----------------------|------|------------|--------------|-----------------|
//! | `GET_PROTOCOL`        | 51   | 0          | 0            | in: u16 LE      |
//! | `REGISTER_HID`        | 54   | HID id     | desc length  | none            |
//! | `UNREGISTER_HID`      | 55   | HID id     | 0            | none            |
//! | `SET_HID_REPORT_DESC` | 56   | HID id     | offset       | descriptor      |
//! | `SEND_HID_EVENT`      | 57   | HID id     | 0            | one HID report  |
//!
//! HID support needs protocol version 2 or later; version 0 means the phone
//! does not speak AOA at all.
//!
//! # Reports
//!
//! The keyboard uses the standard 8-byte boot report:
//!
//! ```text
//! [modifiers, reserved, key, 0, 0, 0, 0, 0]    key down
//! [0, 0, 0, 0, 0, 0, 0, 0]                     all keys up
//! ```
//!
//! The mouse report is `[buttons, dx, dy, wheel]` with signed 8-bit motion,
//! so a larger relative move is split into several reports of at most ±127.
//!
//! # Disconnection
//!
//! `nusb` has no hot-unplug callback.  A transfer that fails with
//! [`TransferError::Disconnected`] is how this backend learns the phone is
//! gone; it then invokes the session's disconnect callback once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nusb::transfer::{Control, ControlType, Recipient, TransferError};
use tracing::{debug, info, warn};

use crate::application::actions::{Action, HidSink, KeyEvent, MouseEvent, SendError};
use crate::application::session::{
    AccessoryBackend, BackendError, DeviceSummary, DisconnectCallback, Stage,
};

// ── AOA constants ─────────────────────────────────────────────────────────────

const AOA_GET_PROTOCOL: u8 = 51;
const AOA_REGISTER_HID: u8 = 54;
const AOA_UNREGISTER_HID: u8 = 55;
const AOA_SET_HID_REPORT_DESC: u8 = 56;
const AOA_SEND_HID_EVENT: u8 = 57;

/// Oldest AOA protocol version with HID support.
const AOA_MIN_HID_PROTOCOL: u16 = 2;

const KEYBOARD_ID: u16 = 1;
const MOUSE_ID: u16 = 2;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Boot-protocol keyboard: 8 modifier bits, a reserved byte, 5 LED outputs,
/// and six key slots.
pub const KEYBOARD_REPORT_DESC: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0xE0, //   Usage Minimum (224)
    0x29, 0xE7, //   Usage Maximum (231)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute): modifiers
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Constant): reserved byte
    0x95, 0x05, //   Report Count (5)
    0x75, 0x01, //   Report Size (1)
    0x05, 0x08, //   Usage Page (LEDs)
    0x19, 0x01, //   Usage Minimum (1)
    0x29, 0x05, //   Usage Maximum (5)
    0x91, 0x02, //   Output (Data, Variable, Absolute): LEDs
    0x95, 0x01, //   Report Count (1)
    0x75, 0x03, //   Report Size (3)
    0x91, 0x01, //   Output (Constant): LED padding
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x65, //   Logical Maximum (101)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0x65, //   Usage Maximum (101)
    0x81, 0x00, //   Input (Data, Array): key slots
    0xC0, // End Collection
];

/// Relative mouse: five buttons, X, Y and wheel as signed bytes.
pub const MOUSE_REPORT_DESC: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xA1, 0x01, // Collection (Application)
    0x09, 0x01, //   Usage (Pointer)
    0xA1, 0x00, //   Collection (Physical)
    0x05, 0x09, //     Usage Page (Buttons)
    0x19, 0x01, //     Usage Minimum (1)
    0x29, 0x05, //     Usage Maximum (5)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x95, 0x05, //     Report Count (5)
    0x75, 0x01, //     Report Size (1)
    0x81, 0x02, //     Input (Data, Variable, Absolute): buttons
    0x95, 0x01, //     Report Count (1)
    0x75, 0x03, //     Report Size (3)
    0x81, 0x01, //     Input (Constant): padding
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x09, 0x38, //     Usage (Wheel)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x03, //     Report Count (3)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    0xC0, //   End Collection
    0xC0, // End Collection
];

// ── Report encoding ───────────────────────────────────────────────────────────

/// Encodes a key event as a boot keyboard report.
///
/// Only one key is ever down at a time, so a release clears the whole report.
pub fn keyboard_report(event: &KeyEvent) -> [u8; 8] {
    let mut report = [0u8; 8];
    if event.action == Action::Press {
        report[0] = event.modifiers.bits();
        report[2] = event.key.as_u8();
    }
    report
}

/// Encodes a mouse event as one or more `[buttons, dx, dy, wheel]` reports.
pub fn mouse_reports(event: &MouseEvent) -> Vec<[u8; 4]> {
    match *event {
        MouseEvent::Click { buttons, .. } => vec![[buttons, 0, 0, 0]],
        MouseEvent::Motion { dx, dy, buttons } => {
            let (mut rest_x, mut rest_y) = (dx, dy);
            let mut reports = Vec::new();
            loop {
                let step_x = rest_x.clamp(-127, 127);
                let step_y = rest_y.clamp(-127, 127);
                reports.push([buttons, step_x as i8 as u8, step_y as i8 as u8, 0]);
                rest_x -= step_x;
                rest_y -= step_y;
                if rest_x == 0 && rest_y == 0 {
                    break;
                }
            }
            reports
        }
    }
}

// ── Backend ───────────────────────────────────────────────────────────────────

/// AOA HID accessory backend for a single phone.
pub struct AoaBackend {
    context: bool,
    device: Option<nusb::Device>,
    on_disconnect: Option<DisconnectCallback>,
    disconnected: AtomicBool,
    keyboard: bool,
    mouse: bool,
    timeout: Duration,
}

impl AoaBackend {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Creates a backend with a custom per-transfer timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            context: false,
            device: None,
            on_disconnect: None,
            disconnected: AtomicBool::new(false),
            keyboard: false,
            mouse: false,
            timeout,
        }
    }

    fn vendor(request: u8, value: u16, index: u16) -> Control {
        Control {
            control_type: ControlType::Vendor,
            recipient: Recipient::Device,
            request,
            value,
            index,
        }
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<(), TransferError> {
        let device = self.device.as_ref().ok_or(TransferError::Disconnected)?;
        device
            .control_out_blocking(Self::vendor(request, value, index), data, self.timeout)
            .map(|_| ())
    }

    fn protocol_version(&self) -> Result<u16, TransferError> {
        let device = self.device.as_ref().ok_or(TransferError::Disconnected)?;
        let mut buf = [0u8; 2];
        device.control_in_blocking(
            Self::vendor(AOA_GET_PROTOCOL, 0, 0),
            &mut buf,
            self.timeout,
        )?;
        Ok(u16::from_le_bytes(buf))
    }

    fn register_hid(&self, id: u16, descriptor: &[u8]) -> Result<(), BackendError> {
        let length = descriptor.len() as u16;
        self.control_out(AOA_REGISTER_HID, id, length, &[])
            .map_err(usb_error)?;
        self.control_out(AOA_SET_HID_REPORT_DESC, id, 0, descriptor)
            .map_err(usb_error)?;
        debug!(id, length, "HID device registered");
        Ok(())
    }

    fn unregister_hid(&self, id: u16) {
        if let Err(e) = self.control_out(AOA_UNREGISTER_HID, id, 0, &[]) {
            warn!(id, "failed to unregister HID device: {e}");
        }
    }

    fn send_report(&self, id: u16, report: &[u8]) -> Result<(), SendError> {
        self.control_out(AOA_SEND_HID_EVENT, id, 0, report)
            .map_err(|e| self.transfer_failed(e))
    }

    /// Maps a failed HID transfer, firing the disconnect callback the first
    /// time the device is found missing.
    fn transfer_failed(&self, err: TransferError) -> SendError {
        match err {
            TransferError::Disconnected => {
                if !self.disconnected.swap(true, Ordering::SeqCst) {
                    info!("device disconnected");
                    if let Some(callback) = &self.on_disconnect {
                        callback();
                    }
                }
                SendError::Disconnected
            }
            other => SendError::Transfer(other.to_string()),
        }
    }
}

impl Default for AoaBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn usb_error(err: impl std::fmt::Display) -> BackendError {
    BackendError::Usb(err.to_string())
}

impl HidSink for AoaBackend {
    fn send_key(&self, event: &KeyEvent) -> Result<(), SendError> {
        if !self.keyboard {
            return Err(SendError::Disconnected);
        }
        self.send_report(KEYBOARD_ID, &keyboard_report(event))
    }

    fn send_mouse(&self, event: &MouseEvent) -> Result<(), SendError> {
        if !self.mouse {
            return Err(SendError::Disconnected);
        }
        for report in mouse_reports(event) {
            self.send_report(MOUSE_ID, &report)?;
        }
        Ok(())
    }
}

impl AccessoryBackend for AoaBackend {
    type Device = nusb::DeviceInfo;

    fn init_context(&mut self) -> Result<(), BackendError> {
        // nusb keeps no context object; an enumeration proves the host
        // USB stack is reachable.
        nusb::list_devices().map_err(usb_error)?;
        self.context = true;
        Ok(())
    }

    fn list_devices(&mut self) -> Result<Vec<DeviceSummary>, BackendError> {
        let devices = nusb::list_devices().map_err(usb_error)?;
        Ok(devices
            .filter_map(|info| {
                Some(DeviceSummary {
                    serial: info.serial_number()?.to_string(),
                    vendor_id: info.vendor_id(),
                    product_id: info.product_id(),
                    product: info.product_string().map(str::to_string),
                })
            })
            .collect())
    }

    fn discover(&mut self, serial: &str) -> Result<nusb::DeviceInfo, BackendError> {
        if !self.context {
            return Err(BackendError::OutOfOrder(Stage::Discover));
        }
        let mut devices = nusb::list_devices().map_err(usb_error)?;
        devices
            .find(|info| info.serial_number() == Some(serial))
            .ok_or_else(|| BackendError::NotFound {
                serial: serial.to_string(),
            })
    }

    fn connect(
        &mut self,
        device: &nusb::DeviceInfo,
        on_disconnect: DisconnectCallback,
    ) -> Result<(), BackendError> {
        let handle = device.open().map_err(usb_error)?;
        info!(
            vendor_id = format_args!("{:04x}", device.vendor_id()),
            product_id = format_args!("{:04x}", device.product_id()),
            "USB device opened"
        );
        self.device = Some(handle);
        self.on_disconnect = Some(on_disconnect);
        self.disconnected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn init_accessory(&mut self) -> Result<(), BackendError> {
        let version = self.protocol_version().map_err(usb_error)?;
        if version < AOA_MIN_HID_PROTOCOL {
            return Err(BackendError::UnsupportedProtocol { version });
        }
        debug!(version, "AOA protocol");
        Ok(())
    }

    fn init_keyboard(&mut self) -> Result<(), BackendError> {
        self.register_hid(KEYBOARD_ID, KEYBOARD_REPORT_DESC)?;
        self.keyboard = true;
        Ok(())
    }

    fn init_mouse(&mut self) -> Result<(), BackendError> {
        self.register_hid(MOUSE_ID, MOUSE_REPORT_DESC)?;
        self.mouse = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), BackendError> {
        // Reports are sent synchronously from the caller; there is no worker
        // to spawn.
        Ok(())
    }

    fn stop(&mut self) {}

    fn destroy_mouse(&mut self) {
        if !self.disconnected.load(Ordering::SeqCst) {
            self.unregister_hid(MOUSE_ID);
        }
        self.mouse = false;
    }

    fn destroy_keyboard(&mut self) {
        if !self.disconnected.load(Ordering::SeqCst) {
            self.unregister_hid(KEYBOARD_ID);
        }
        self.keyboard = false;
    }

    fn destroy_accessory(&mut self) {}

    fn disconnect(&mut self) {
        self.device = None;
        self.on_disconnect = None;
    }

    fn release_device(&mut self, device: nusb::DeviceInfo) {
        debug!(serial = ?device.serial_number(), "releasing device handle");
    }

    fn destroy_context(&mut self) {
        self.context = false;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
