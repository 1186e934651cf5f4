//! Domain model for HID-driven device automation.
//!
//! Nothing in this module touches USB, processes, or the clock.  It describes
//! *what* a run does (steps, scripts, per-model profiles, the accessory
//! lifecycle stages) and leaves *how* to the application crate.
//!
//! # Layering (for beginners)
//!
//! The innermost layer of the workspace is the domain.  It can be compiled
//! and tested on any machine without a phone attached.  The application
//! layer (`hid-setup`) depends on it; it never depends on the application
//! layer.

/// Accessory lifecycle stages.
pub mod connection;
/// Per-model profiles and the registry that selects between them.
pub mod profile;
/// Ordered step lists with an optional reconnect point.
pub mod script;
/// Individual script steps and composite macros.
pub mod step;
/// Default settle delays.
pub mod timing;
