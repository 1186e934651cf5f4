//! # hid-setup-core
//!
//! Shared library for HID-driven Android device setup.  It contains the key
//! translation tables, the script model, and the per-model device profiles.
//!
//! It has no dependency on USB, processes, or an async runtime, so scripts
//! can be loaded and validated anywhere.
//!
//! # Architecture overview (for beginners)
//!
//! `hid-setup` walks an Android phone through its first-boot wizard (or a
//! factory reset) by pretending to be a USB keyboard and mouse.  There is no
//! screen feedback: each device model has a hand-tuned, timed list of key
//! presses that is replayed blindly.
//!
//! This crate defines:
//!
//! - **`keymap`** – USB HID usage IDs, the modifier byte, and the
//!   character-to-key translation used when typing a PIN.
//!
//! - **`domain`** – Steps, macros, scripts with their reconnect point, the
//!   accessory connection lifecycle, and the profile registry that maps a
//!   device type such as `g23` to its scripts.
//!
//! The built-in profiles live in `profiles/*.toml` and are compiled into the
//! binary.

pub mod domain;
pub mod keymap;

pub use domain::connection::ConnectionState;
pub use domain::profile::{
    DeviceProfile, ProfileError, ProfileLookupError, ProfileRegistry, TaskKind,
};
pub use domain::script::{Script, ScriptError};
pub use domain::step::{Macro, MouseButton, ScriptStep, Step};
pub use keymap::hid::HidKeyCode;
pub use keymap::{char_to_keystroke, keystroke_to_char, KeyStroke, KeymapError, Modifiers};
