//! Infrastructure layer.
//!
//! Contains the OS-facing adapters.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `hid_setup_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`accessory`** – Implementations of `AccessoryBackend`: the real
//!   Android Open Accessory backend over `nusb`, and a recording mock.
//!
//! - **`prompt`** – Triggers the on-device "allow USB debugging" dialog by
//!   running `adb devices -l` on the host.
//!
//! - **`config`** – TOML configuration file loading.

pub mod accessory;
pub mod config;
pub mod prompt;
