//! Settle delays used by the action primitives and the script loader.
//!
//! Every input event is followed by a fixed wait so the device UI can finish
//! its transition before the next event arrives.  There is no feedback from
//! the screen, so these values are the only synchronisation the scripts have.

use std::time::Duration;

/// Time a key is held down before the release event is sent.
pub const KEY_HOLD: Duration = Duration::from_millis(200);
/// Default wait after a key release.
pub const KEY_SETTLE: Duration = Duration::from_millis(200);
/// Wait between two characters of a typed sequence.
pub const CHAR_INTERVAL: Duration = Duration::from_millis(200);
/// Time the mouse button is held down during a click.
pub const CLICK_HOLD: Duration = Duration::from_millis(200);
/// Default wait after a mouse click.
pub const CLICK_SETTLE: Duration = Duration::from_millis(200);
/// Default wait after a relative mouse move.
pub const MOUSE_MOVE_SETTLE: Duration = Duration::from_millis(20);

/// Confirm macro: wait after Shift+Tab, before Enter.
pub const CONFIRM_FOCUS_SETTLE: Duration = Duration::from_millis(200);
/// Confirm macro: wait after Enter, for the dialog to close.
pub const CONFIRM_ACCEPT_SETTLE: Duration = Duration::from_millis(2000);
/// Back macro: wait after Meta+Left.
pub const BACK_SETTLE: Duration = Duration::from_millis(200);

/// Neutralize macro: number of relative moves towards the bottom-left corner.
pub const NEUTRALIZE_MOVES: u32 = 500;
/// Neutralize macro: per-move delta (left, down).
pub const NEUTRALIZE_DELTA: (i32, i32) = (-4, 4);
/// Neutralize macro: wait after each move.
pub const NEUTRALIZE_INTERVAL: Duration = Duration::from_millis(20);
