//! Script steps: the atomic unit of a device script.
//!
//! A [`Step`] is one action primitive (or one named macro) together with its
//! timing.  The order of steps is the entire meaning of a script; there are
//! no conditionals and nothing depends on device state.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::timing;
use crate::keymap::{HidKeyCode, KeyStroke, Modifiers};

/// Mouse button identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    /// Bit of this button in a HID mouse report's button byte.
    pub fn mask(self) -> u8 {
        match self {
            MouseButton::Left => 1 << 0,
            MouseButton::Right => 1 << 1,
            MouseButton::Middle => 1 << 2,
        }
    }

    /// Parses the button name used in script files.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "left" => Some(MouseButton::Left),
            "right" => Some(MouseButton::Right),
            "middle" => Some(MouseButton::Middle),
            _ => None,
        }
    }
}

/// Composite actions used across device profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Macro {
    /// Shift+Tab then Enter: accepts the default-focused dialog action.
    Confirm,
    /// Meta+Left: the Android "back" gesture on a HID keyboard.
    Back,
    /// Drives the cursor into the bottom-left corner so later relative
    /// moves start from a known position.
    NeutralizeMouse,
}

impl Macro {
    /// Parses the macro name used in script files.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "confirm" => Some(Macro::Confirm),
            "back" => Some(Macro::Back),
            "neutralize_mouse" | "neutralize" => Some(Macro::NeutralizeMouse),
            _ => None,
        }
    }

    /// Expands the macro into the primitive steps it performs.
    pub fn expand(self) -> Vec<Step> {
        match self {
            Macro::Confirm => vec![
                Step::KeyPress {
                    stroke: KeyStroke::new(HidKeyCode::Tab, Modifiers::SHIFT),
                    hold: timing::KEY_HOLD,
                    settle: timing::CONFIRM_FOCUS_SETTLE,
                },
                Step::KeyPress {
                    stroke: KeyStroke::plain(HidKeyCode::Enter),
                    hold: timing::KEY_HOLD,
                    settle: timing::CONFIRM_ACCEPT_SETTLE,
                },
            ],
            Macro::Back => vec![Step::KeyPress {
                stroke: KeyStroke::new(HidKeyCode::ArrowLeft, Modifiers::META),
                hold: timing::KEY_HOLD,
                settle: timing::BACK_SETTLE,
            }],
            Macro::NeutralizeMouse => {
                let (dx, dy) = timing::NEUTRALIZE_DELTA;
                (0..timing::NEUTRALIZE_MOVES)
                    .map(|_| Step::MouseMove {
                        dx,
                        dy,
                        settle: timing::NEUTRALIZE_INTERVAL,
                    })
                    .collect()
            }
        }
    }
}

impl fmt::Display for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Macro::Confirm => "confirm",
            Macro::Back => "back",
            Macro::NeutralizeMouse => "neutralize_mouse",
        };
        f.write_str(name)
    }
}

/// One action of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Press and release one key, holding `stroke.modifiers` throughout.
    KeyPress {
        stroke: KeyStroke,
        hold: Duration,
        settle: Duration,
    },
    /// Type a string of letters and digits, one key press per character.
    CharSequence {
        text: String,
        hold: Duration,
        interval: Duration,
    },
    /// Relative cursor motion.
    MouseMove { dx: i32, dy: i32, settle: Duration },
    /// Press and release a mouse button.
    MouseClick {
        button: MouseButton,
        hold: Duration,
        settle: Duration,
    },
    /// Wait without sending anything.
    Sleep(Duration),
    /// A named composite action.
    Macro(Macro),
}

impl Step {
    /// A key press with the default hold and settle delays.
    pub fn key(stroke: KeyStroke) -> Self {
        Step::KeyPress {
            stroke,
            hold: timing::KEY_HOLD,
            settle: timing::KEY_SETTLE,
        }
    }

    /// Minimum wall time the step occupies when executed.
    pub fn min_duration(&self) -> Duration {
        match self {
            Step::KeyPress { hold, settle, .. } => *hold + *settle,
            Step::CharSequence {
                text,
                hold,
                interval,
            } => {
                let count = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
                (*hold + *interval).saturating_mul(count)
            }
            Step::MouseMove { settle, .. } => *settle,
            Step::MouseClick { hold, settle, .. } => *hold + *settle,
            Step::Sleep(duration) => *duration,
            Step::Macro(m) => m.expand().iter().map(Step::min_duration).sum(),
        }
    }

    /// Number of key-down events the step sends.
    pub fn key_press_count(&self) -> usize {
        match self {
            Step::KeyPress { .. } => 1,
            Step::CharSequence { text, .. } => text.chars().count(),
            Step::Macro(m) => m.expand().iter().map(Step::key_press_count).sum(),
            Step::MouseMove { .. } | Step::MouseClick { .. } | Step::Sleep(_) => 0,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::KeyPress { stroke, .. } if stroke.modifiers.is_empty() => {
                write!(f, "press {:?}", stroke.key)
            }
            Step::KeyPress { stroke, .. } => {
                write!(f, "press {}+{:?}", stroke.modifiers, stroke.key)
            }
            Step::CharSequence { text, .. } => write!(f, "type {} chars", text.chars().count()),
            Step::MouseMove { dx, dy, .. } => write!(f, "move mouse ({dx}, {dy})"),
            Step::MouseClick { button, .. } => write!(f, "click {button:?}"),
            Step::Sleep(duration) => write!(f, "sleep {duration:?}"),
            Step::Macro(m) => write!(f, "macro {m}"),
        }
    }
}

/// A step plus the optional script annotation it was declared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    pub step: Step,
    pub note: Option<String>,
}

impl From<Step> for ScriptStep {
    fn from(step: Step) -> Self {
        Self { step, note: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_macro_is_shift_tab_then_enter() {
        // Arrange / Act
        let steps = Macro::Confirm.expand();

        // Assert
        assert_eq!(steps.len(), 2);
        assert!(matches!(
            steps[0],
            Step::KeyPress { stroke, settle, .. }
                if stroke == KeyStroke::new(HidKeyCode::Tab, Modifiers::SHIFT)
                && settle == Duration::from_millis(200)
        ));
        assert!(matches!(
            steps[1],
            Step::KeyPress { stroke, settle, .. }
                if stroke == KeyStroke::plain(HidKeyCode::Enter)
                && settle == Duration::from_millis(2000)
        ));
    }

    #[test]
    fn test_neutralize_macro_moves_towards_bottom_left() {
        let steps = Macro::NeutralizeMouse.expand();

        assert_eq!(steps.len(), 500);
        assert!(steps
            .iter()
            .all(|s| matches!(s, Step::MouseMove { dx: -4, dy: 4, .. })));
    }

    #[test]
    fn test_min_duration_of_char_sequence_counts_every_character() {
        let step = Step::CharSequence {
            text: "0000".to_string(),
            hold: Duration::from_millis(200),
            interval: Duration::from_millis(200),
        };

        assert_eq!(step.min_duration(), Duration::from_millis(1600));
        assert_eq!(step.key_press_count(), 4);
    }

    #[test]
    fn test_min_duration_of_confirm_macro() {
        let step = Step::Macro(Macro::Confirm);
        // 200 hold + 200 settle + 200 hold + 2000 settle
        assert_eq!(step.min_duration(), Duration::from_millis(2600));
    }

    #[test]
    fn test_macro_names_parse_case_insensitively() {
        assert_eq!(Macro::from_name("Confirm"), Some(Macro::Confirm));
        assert_eq!(Macro::from_name("BACK"), Some(Macro::Back));
        assert_eq!(
            Macro::from_name("neutralize_mouse"),
            Some(Macro::NeutralizeMouse)
        );
        assert_eq!(Macro::from_name("reboot"), None);
    }

    #[test]
    fn test_mouse_button_masks_are_distinct_bits() {
        assert_eq!(MouseButton::Left.mask(), 0x01);
        assert_eq!(MouseButton::Right.mask(), 0x02);
        assert_eq!(MouseButton::Middle.mask(), 0x04);
    }
}
