//! Application layer use cases.
//!
//! - **`actions`** – Timed action primitives (press a key, type a string,
//!   move or click the mouse) on top of a [`actions::HidSink`].
//!
//! - **`session`** – The [`session::AccessoryBackend`] port and the
//!   [`session::Session`] that owns it, tracks what has been acquired, and
//!   releases it in order.
//!
//! - **`events`** – The host event surface that carries asynchronous
//!   disconnect notifications into the run.
//!
//! - **`run_script`** – The script engine: executes steps strictly in order,
//!   resumable from an explicit index.
//!
//! - **`reconnect`** – The reconnection supervisor that rebuilds the session
//!   after the device re-enumerates and accepts the debug prompt.
//!
//! - **`orchestrate`** – One complete run, from device selection to teardown.

pub mod actions;
pub mod events;
pub mod orchestrate;
pub mod reconnect;
pub mod run_script;
pub mod session;
