//! Accessory connection lifecycle state.
//!
//! # Connection lifecycle (for beginners)
//!
//! Bringing up HID input on an Android device over USB takes several
//! ordered steps, and each one depends on the previous one:
//!
//! ```text
//! Disconnected ──► UsbConnected ──► AccessoryInitialized ──► KeyboardReady
//!      ▲                                                           │
//!      │                                                           ▼
//!      └──────────── teardown / disconnect ◄──── Started ◄──── MouseReady
//! ```
//!
//! - `Disconnected`: no device handle is open.
//! - `UsbConnected`: the device is open on the USB bus.
//! - `AccessoryInitialized`: the device speaks the accessory protocol.
//! - `KeyboardReady` / `MouseReady`: HID descriptors are registered.
//! - `Started`: input reports may be sent.
//!
//! During startup the state only moves forward one stage at a time.  Any
//! teardown or disconnect notification collapses it straight back to
//! `Disconnected`; there is no partial step backwards.

use std::fmt;

/// Lifecycle stage of the single accessory session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    UsbConnected,
    AccessoryInitialized,
    KeyboardReady,
    MouseReady,
    Started,
}

impl ConnectionState {
    /// The stage that follows this one during startup.
    ///
    /// Returns `None` for [`ConnectionState::Started`].
    pub fn next(self) -> Option<Self> {
        match self {
            ConnectionState::Disconnected => Some(ConnectionState::UsbConnected),
            ConnectionState::UsbConnected => Some(ConnectionState::AccessoryInitialized),
            ConnectionState::AccessoryInitialized => Some(ConnectionState::KeyboardReady),
            ConnectionState::KeyboardReady => Some(ConnectionState::MouseReady),
            ConnectionState::MouseReady => Some(ConnectionState::Started),
            ConnectionState::Started => None,
        }
    }

    /// Returns `true` if moving from `self` to `to` is a legal transition:
    /// exactly one stage forward, or a collapse to `Disconnected`.
    pub fn can_transition_to(self, to: Self) -> bool {
        to == ConnectionState::Disconnected || self.next() == Some(to)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::UsbConnected => "usb-connected",
            ConnectionState::AccessoryInitialized => "accessory-initialized",
            ConnectionState::KeyboardReady => "keyboard-ready",
            ConnectionState::MouseReady => "mouse-ready",
            ConnectionState::Started => "started",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: [ConnectionState; 6] = [
        ConnectionState::Disconnected,
        ConnectionState::UsbConnected,
        ConnectionState::AccessoryInitialized,
        ConnectionState::KeyboardReady,
        ConnectionState::MouseReady,
        ConnectionState::Started,
    ];

    #[test]
    fn test_next_walks_the_startup_order() {
        for pair in ORDER.windows(2) {
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
        assert_eq!(ConnectionState::Started.next(), None);
    }

    #[test]
    fn test_every_state_can_collapse_to_disconnected() {
        for state in ORDER {
            assert!(state.can_transition_to(ConnectionState::Disconnected));
        }
    }

    #[test]
    fn test_skipping_a_stage_is_not_allowed() {
        assert!(!ConnectionState::UsbConnected.can_transition_to(ConnectionState::KeyboardReady));
        assert!(!ConnectionState::Disconnected.can_transition_to(ConnectionState::Started));
    }

    #[test]
    fn test_backwards_step_other_than_collapse_is_not_allowed() {
        assert!(!ConnectionState::Started.can_transition_to(ConnectionState::MouseReady));
    }

    #[test]
    fn test_states_are_ordered_by_startup_progress() {
        assert!(ConnectionState::Started > ConnectionState::MouseReady);
        assert!(ConnectionState::UsbConnected > ConnectionState::Disconnected);
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
