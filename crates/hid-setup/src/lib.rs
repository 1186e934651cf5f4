//! hid-setup library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does hid-setup do? (for beginners)
//!
//! A freshly reset Android phone has no ADB access, so nothing can be
//! installed or scripted on it.  What it *does* accept is a USB keyboard and
//! mouse.  Android's accessory protocol (AOA 2.0) lets a USB host register
//! virtual HID devices on the phone over the same cable, so this tool:
//!
//! 1. Finds the phone on the USB bus by its serial number.
//! 2. Registers a virtual keyboard and mouse on it.
//! 3. Replays a hand-tuned, timed list of key presses that walks the setup
//!    wizard (or a factory reset) to the end.
//! 4. When enabling USB debugging makes the phone drop off the bus, waits for
//!    it to come back, rebuilds the session, and accepts the "allow USB
//!    debugging" dialog.
//!
//! There is no screen feedback at any point: correctness depends entirely on
//! the per-model script matching the phone's firmware.

/// Application layer: action primitives, script engine, reconnection
/// supervisor, and the orchestrator that owns a run.
pub mod application;

/// Infrastructure layer: USB accessory backends, the debug-prompt trigger,
/// and configuration file loading.
pub mod infrastructure;
