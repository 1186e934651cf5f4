//! Action primitives: timed input sent through a [`HidSink`].
//!
//! Every primitive that sends input waits a fixed settle delay after the
//! event before returning, so consecutive primitives never overlap:
//!
//! ```text
//! press_key:   key-down ── hold ── key-up ── settle
//! type_text:   (key-down ── hold ── key-up ── interval) × chars
//! click:       button-down ── hold ── button-up ── settle
//! move_mouse:  motion ── settle
//! ```
//!
//! Delays use `tokio::time::sleep`, so tests running on a paused clock see
//! exact virtual timestamps.

use std::time::Duration;

use hid_setup_core::{
    char_to_keystroke, ConnectionState, HidKeyCode, KeyStroke, KeymapError, Macro, Modifiers,
    MouseButton, Step,
};
use thiserror::Error;
use tracing::trace;

// ── Events ────────────────────────────────────────────────────────────────────

/// Whether a key or button goes down or comes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Press,
    Release,
}

/// A single keyboard event as sent to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyEvent {
    pub key: HidKeyCode,
    pub modifiers: Modifiers,
    pub action: Action,
    pub repeat: bool,
}

impl KeyEvent {
    pub fn press(stroke: KeyStroke) -> Self {
        Self {
            key: stroke.key,
            modifiers: stroke.modifiers,
            action: Action::Press,
            repeat: false,
        }
    }

    pub fn release(stroke: KeyStroke) -> Self {
        Self {
            action: Action::Release,
            ..Self::press(stroke)
        }
    }
}

/// A single mouse event as sent to the device.
///
/// All motion is relative; there is no absolute positioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseEvent {
    Motion { dx: i32, dy: i32, buttons: u8 },
    Click {
        button: MouseButton,
        action: Action,
        buttons: u8,
    },
}

// ── Sink port ─────────────────────────────────────────────────────────────────

/// Error returned by a [`HidSink`] when an event cannot be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("HID input is not available in state {state}")]
    NotStarted { state: ConnectionState },
    #[error("device disconnected")]
    Disconnected,
    #[error("transfer failed: {0}")]
    Transfer(String),
}

/// Destination for HID input events.
///
/// Implemented by [`crate::application::session::Session`], which forwards to
/// the accessory backend only while the session is started.
pub trait HidSink: Send + Sync {
    fn send_key(&self, event: &KeyEvent) -> Result<(), SendError>;

    fn send_mouse(&self, event: &MouseEvent) -> Result<(), SendError>;
}

/// Error type for action primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error(transparent)]
    Keymap(#[from] KeymapError),
    #[error(transparent)]
    Send(#[from] SendError),
}

// ── Primitives ────────────────────────────────────────────────────────────────

async fn settle(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Presses and releases one key, holding the stroke's modifiers throughout.
///
/// # Errors
///
/// Returns [`ActionError::Send`] if either event cannot be delivered.  A
/// failed key-down is not followed by a key-up.
pub async fn press_key(
    sink: &dyn HidSink,
    stroke: KeyStroke,
    hold: Duration,
    after: Duration,
) -> Result<(), ActionError> {
    trace!(key = ?stroke.key, modifiers = %stroke.modifiers, "key press");
    sink.send_key(&KeyEvent::press(stroke))?;
    settle(hold).await;
    sink.send_key(&KeyEvent::release(stroke))?;
    settle(after).await;
    Ok(())
}

/// Types `text` one character at a time.
///
/// The whole string is translated before the first key is sent, so an
/// unsupported character sends nothing at all.
///
/// # Errors
///
/// Returns [`ActionError::Keymap`] for punctuation, whitespace, or any other
/// character without a key mapping, and [`ActionError::Send`] if delivery
/// fails part-way.
pub async fn type_text(
    sink: &dyn HidSink,
    text: &str,
    hold: Duration,
    interval: Duration,
) -> Result<(), ActionError> {
    let strokes = text
        .chars()
        .map(char_to_keystroke)
        .collect::<Result<Vec<_>, _>>()?;
    for stroke in strokes {
        press_key(sink, stroke, hold, interval).await?;
    }
    Ok(())
}

/// Moves the cursor by a relative offset with no buttons held.
///
/// # Errors
///
/// Returns [`ActionError::Send`] if the event cannot be delivered.
pub async fn move_mouse(
    sink: &dyn HidSink,
    dx: i32,
    dy: i32,
    after: Duration,
) -> Result<(), ActionError> {
    sink.send_mouse(&MouseEvent::Motion { dx, dy, buttons: 0 })?;
    settle(after).await;
    Ok(())
}

/// Presses and releases a mouse button at the current cursor position.
///
/// # Errors
///
/// Returns [`ActionError::Send`] if either event cannot be delivered.
pub async fn click(
    sink: &dyn HidSink,
    button: MouseButton,
    hold: Duration,
    after: Duration,
) -> Result<(), ActionError> {
    sink.send_mouse(&MouseEvent::Click {
        button,
        action: Action::Press,
        buttons: button.mask(),
    })?;
    settle(hold).await;
    sink.send_mouse(&MouseEvent::Click {
        button,
        action: Action::Release,
        buttons: 0,
    })?;
    settle(after).await;
    Ok(())
}

/// Shift+Tab then Enter: accepts the default-focused action of a dialog.
///
/// The keys and delays are those of [`Macro::Confirm`].
///
/// # Errors
///
/// Returns [`ActionError::Send`] if delivery fails.
pub async fn confirm(sink: &dyn HidSink) -> Result<(), ActionError> {
    perform(sink, &Step::Macro(Macro::Confirm)).await
}

/// Executes one script step, expanding macros into their primitives.
///
/// # Errors
///
/// Returns the first [`ActionError`] raised by a primitive.
pub async fn perform(sink: &dyn HidSink, step: &Step) -> Result<(), ActionError> {
    // Worklist in reverse so steps pop in declared order; a macro is
    // replaced by its expansion in place.
    let mut pending = vec![step.clone()];
    while let Some(step) = pending.pop() {
        match step {
            Step::KeyPress {
                stroke,
                hold,
                settle: after,
            } => press_key(sink, stroke, hold, after).await?,
            Step::CharSequence {
                text,
                hold,
                interval,
            } => type_text(sink, &text, hold, interval).await?,
            Step::MouseMove {
                dx,
                dy,
                settle: after,
            } => move_mouse(sink, dx, dy, after).await?,
            Step::MouseClick {
                button,
                hold,
                settle: after,
            } => click(sink, button, hold, after).await?,
            Step::Sleep(duration) => settle(duration).await,
            Step::Macro(m) => pending.extend(m.expand().into_iter().rev()),
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use hid_setup_core::domain::timing;
    use tokio::time::Instant;

    use super::*;

    /// Records events with their virtual timestamps.
    #[derive(Default)]
    struct RecordingSink {
        keys: Mutex<Vec<(Instant, KeyEvent)>>,
        mouse: Mutex<Vec<(Instant, MouseEvent)>>,
        should_fail: bool,
    }

    impl HidSink for RecordingSink {
        fn send_key(&self, event: &KeyEvent) -> Result<(), SendError> {
            if self.should_fail {
                return Err(SendError::Disconnected);
            }
            self.keys.lock().unwrap().push((Instant::now(), *event));
            Ok(())
        }

        fn send_mouse(&self, event: &MouseEvent) -> Result<(), SendError> {
            if self.should_fail {
                return Err(SendError::Disconnected);
            }
            self.mouse.lock().unwrap().push((Instant::now(), *event));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_key_holds_then_settles() {
        // Arrange
        let sink = RecordingSink::default();
        let start = Instant::now();
        let stroke = KeyStroke::plain(HidKeyCode::Enter);

        // Act
        press_key(&sink, stroke, Duration::from_millis(200), Duration::from_millis(300))
            .await
            .unwrap();

        // Assert
        let keys = sink.keys.lock().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].1, KeyEvent::press(stroke));
        assert_eq!(keys[1].1, KeyEvent::release(stroke));
        assert_eq!(keys[1].0 - keys[0].0, Duration::from_millis(200));
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_text_shifts_uppercase_and_spaces_characters() {
        let sink = RecordingSink::default();

        type_text(&sink, "aB0", timing::KEY_HOLD, timing::CHAR_INTERVAL)
            .await
            .unwrap();

        let keys = sink.keys.lock().unwrap();
        let presses: Vec<_> = keys
            .iter()
            .filter(|(_, e)| e.action == Action::Press)
            .collect();
        assert_eq!(presses.len(), 3);
        assert_eq!(presses[0].1.key, HidKeyCode::KeyA);
        assert!(presses[0].1.modifiers.is_empty());
        assert_eq!(presses[1].1.key, HidKeyCode::KeyB);
        assert!(presses[1].1.modifiers.shift());
        assert_eq!(presses[2].1.key, HidKeyCode::Digit0);
        assert_eq!(presses[1].0 - presses[0].0, Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_text_with_punctuation_sends_nothing() {
        let sink = RecordingSink::default();

        let result = type_text(&sink, "ab!", timing::KEY_HOLD, timing::CHAR_INTERVAL).await;

        assert_eq!(
            result,
            Err(ActionError::Keymap(KeymapError::UnsupportedCharacter { ch: '!' }))
        );
        assert!(sink.keys.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_reports_button_mask_then_release() {
        let sink = RecordingSink::default();

        click(&sink, MouseButton::Left, timing::CLICK_HOLD, Duration::ZERO)
            .await
            .unwrap();

        let mouse = sink.mouse.lock().unwrap();
        assert_eq!(
            mouse[0].1,
            MouseEvent::Click {
                button: MouseButton::Left,
                action: Action::Press,
                buttons: 0x01
            }
        );
        assert_eq!(
            mouse[1].1,
            MouseEvent::Click {
                button: MouseButton::Left,
                action: Action::Release,
                buttons: 0
            }
        );
        assert_eq!(mouse[1].0 - mouse[0].0, Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_macro_takes_two_point_six_seconds() {
        let sink = RecordingSink::default();
        let start = Instant::now();

        perform(&sink, &Step::Macro(Macro::Confirm)).await.unwrap();

        let keys = sink.keys.lock().unwrap();
        assert_eq!(keys[0].1.key, HidKeyCode::Tab);
        assert!(keys[0].1.modifiers.shift());
        assert_eq!(keys[2].1.key, HidKeyCode::Enter);
        assert_eq!(keys[2].0 - keys[1].0, Duration::from_millis(200));
        assert_eq!(start.elapsed(), Duration::from_millis(2600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_matches_the_confirm_macro_exactly() {
        // Arrange
        let direct = RecordingSink::default();
        let scripted = RecordingSink::default();
        let start = Instant::now();

        // Act
        confirm(&direct).await.unwrap();
        let midpoint = Instant::now();
        perform(&scripted, &Step::Macro(Macro::Confirm)).await.unwrap();

        // Assert: same events, same offsets from each call's start.
        let offsets = |keys: &[(Instant, KeyEvent)], from: Instant| {
            keys.iter()
                .map(|(at, e)| (*at - from, *e))
                .collect::<Vec<_>>()
        };
        assert_eq!(
            offsets(direct.keys.lock().unwrap().as_slice(), start),
            offsets(scripted.keys.lock().unwrap().as_slice(), midpoint)
        );
        let expected: Duration = Macro::Confirm.expand().iter().map(Step::min_duration).sum();
        assert_eq!(midpoint - start, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_macros_expand_in_declared_order() {
        let sink = RecordingSink::default();

        perform(&sink, &Step::Macro(Macro::Back)).await.unwrap();
        perform(&sink, &Step::Macro(Macro::Confirm)).await.unwrap();

        let pressed: Vec<HidKeyCode> = sink
            .keys
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.action == Action::Press)
            .map(|(_, e)| e.key)
            .collect();
        assert_eq!(
            pressed,
            vec![HidKeyCode::ArrowLeft, HidKeyCode::Tab, HidKeyCode::Enter]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_neutralize_macro_sends_relative_moves_only() {
        let sink = RecordingSink::default();

        perform(&sink, &Step::Macro(Macro::NeutralizeMouse))
            .await
            .unwrap();

        let mouse = sink.mouse.lock().unwrap();
        assert_eq!(mouse.len(), 500);
        assert!(mouse.iter().all(|(_, e)| *e
            == MouseEvent::Motion {
                dx: -4,
                dy: 4,
                buttons: 0
            }));
        assert!(sink.keys.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_key_propagates_send_failure() {
        let sink = RecordingSink {
            should_fail: true,
            ..Default::default()
        };

        let result = press_key(
            &sink,
            KeyStroke::plain(HidKeyCode::Enter),
            timing::KEY_HOLD,
            timing::KEY_SETTLE,
        )
        .await;

        assert_eq!(result, Err(ActionError::Send(SendError::Disconnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_step_sends_nothing() {
        let sink = RecordingSink::default();
        let start = Instant::now();

        perform(&sink, &Step::Sleep(Duration::from_secs(4)))
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(4));
        assert!(sink.keys.lock().unwrap().is_empty());
    }
}
