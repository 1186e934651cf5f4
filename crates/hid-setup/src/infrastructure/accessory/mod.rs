//! Accessory backend implementations.
//!
//! - [`aoa::AoaBackend`] talks to a real phone over USB.
//! - [`mock::MockBackend`] records every call for tests.

pub mod aoa;
pub mod mock;
