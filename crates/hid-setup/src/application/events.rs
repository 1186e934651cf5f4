//! Host event surface: asynchronous notifications from collaborator code.
//!
//! The accessory backend learns that the phone dropped off the bus on
//! whatever thread noticed it.  It does not act on that; it calls the
//! [`DisconnectCallback`] built here, which posts a [`HostEvent`] into an
//! unbounded channel.  The run checks the channel at one point only (the
//! script's reconnect point), so a notification never interrupts a step.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::session::DisconnectCallback;

/// Something the host observed outside the script's control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    DeviceDisconnected,
}

/// Receiving end of host notifications, owned by the orchestrator.
pub struct EventSurface {
    tx: mpsc::UnboundedSender<HostEvent>,
    rx: mpsc::UnboundedReceiver<HostEvent>,
}

impl EventSurface {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Builds the callback handed to the backend on `connect`.
    pub fn disconnect_callback(&self) -> DisconnectCallback {
        let tx = self.tx.clone();
        Arc::new(move || {
            if tx.send(HostEvent::DeviceDisconnected).is_err() {
                warn!("could not post USB disconnection event: surface closed");
            }
        })
    }

    /// Takes every event posted so far without waiting.
    pub fn drain(&mut self) -> Vec<HostEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            debug!(?event, "host event");
            events.push(event);
        }
        events
    }
}

impl Default for EventSurface {
    fn default() -> Self {
        Self::new()
    }
}
