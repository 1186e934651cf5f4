//! Key translation for the emulated HID keyboard.
//!
//! Scripts name keys (`"down"`, `"enter"`) or type short strings (`"0000"`).
//! Both end up as a [`KeyStroke`]: a [`HidKeyCode`] plus the [`Modifiers`]
//! byte that must be held while the key is down.
//!
//! # Character translation rules
//!
//! | Input           | Key                           | Modifiers |
//! |-----------------|-------------------------------|-----------|
//! | `a`..=`z`       | `KeyA + (c - 'a')`            | none      |
//! | `A`..=`Z`       | `KeyA + (c - 'A')`            | Shift     |
//! | `1`..=`9`       | `Digit1 + (c - '1')`          | none      |
//! | `0`             | `Digit0` (after `Digit9`)     | none      |
//! | anything else   | [`KeymapError::UnsupportedCharacter`] |   |
//!
//! Punctuation and whitespace are rejected rather than guessed: their key
//! position depends on the device's configured layout, and a wrong guess
//! would silently type something else into a PIN field.

pub mod hid;

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use hid::HidKeyCode;

use hid::{DIGITS_FROM_ONE, LETTERS};

/// Errors produced while translating characters and key names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeymapError {
    /// The character has no scancode mapping (all punctuation, whitespace,
    /// and non-ASCII characters).
    #[error("no scancode mapping for character {ch:?}")]
    UnsupportedCharacter { ch: char },
    /// A script named a key that is not in the table.
    #[error("unknown key name `{name}`")]
    UnknownKey { name: String },
    /// A script named a modifier that is not Shift/Ctrl/Alt/Meta.
    #[error("unknown modifier `{name}`")]
    UnknownModifier { name: String },
}

/// HID keyboard modifier byte (first byte of a boot keyboard report).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modifiers(pub u8);

impl Modifiers {
    pub const NONE: Self = Self(0);
    pub const LEFT_CTRL: Self = Self(1 << 0);
    pub const LEFT_SHIFT: Self = Self(1 << 1);
    pub const LEFT_ALT: Self = Self(1 << 2);
    pub const LEFT_META: Self = Self(1 << 3);
    pub const RIGHT_CTRL: Self = Self(1 << 4);
    pub const RIGHT_SHIFT: Self = Self(1 << 5);
    pub const RIGHT_ALT: Self = Self(1 << 6);
    pub const RIGHT_META: Self = Self(1 << 7);

    /// Shorthand used by scripts: Shift means left Shift.
    pub const SHIFT: Self = Self::LEFT_SHIFT;
    /// Shorthand used by scripts: Meta (GUI / Super) means left Meta.
    pub const META: Self = Self::LEFT_META;
    pub const ALT: Self = Self::LEFT_ALT;
    pub const CTRL: Self = Self::LEFT_CTRL;

    /// Returns the raw modifier byte.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` if no modifier is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if either Shift modifier is active.
    pub fn shift(self) -> bool {
        self.0 & (Self::LEFT_SHIFT.0 | Self::RIGHT_SHIFT.0) != 0
    }

    /// Returns `true` if either Meta (GUI) modifier is active.
    pub fn meta(self) -> bool {
        self.0 & (Self::LEFT_META.0 | Self::RIGHT_META.0) != 0
    }

    /// Parses a single modifier name as written in script files.
    ///
    /// # Errors
    ///
    /// Returns [`KeymapError::UnknownModifier`] for anything other than
    /// `shift`, `ctrl`/`control`, `alt`, or `meta`/`gui`/`super`.
    pub fn from_name(name: &str) -> Result<Self, KeymapError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "shift" => Ok(Self::SHIFT),
            "ctrl" | "control" => Ok(Self::CTRL),
            "alt" => Ok(Self::ALT),
            "meta" | "gui" | "super" => Ok(Self::META),
            _ => Err(KeymapError::UnknownModifier {
                name: name.to_string(),
            }),
        }
    }

    /// Combines a list of modifier names into one byte.
    ///
    /// # Errors
    ///
    /// Returns the first [`KeymapError::UnknownModifier`] encountered.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, KeymapError> {
        names
            .iter()
            .try_fold(Self::NONE, |acc, name| Ok(acc | Self::from_name(name.as_ref())?))
    }
}

impl BitOr for Modifiers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names = [
            (Self::CTRL.0 | Self::RIGHT_CTRL.0, "ctrl"),
            (Self::SHIFT.0 | Self::RIGHT_SHIFT.0, "shift"),
            (Self::ALT.0 | Self::RIGHT_ALT.0, "alt"),
            (Self::META.0 | Self::RIGHT_META.0, "meta"),
        ];
        let mut first = true;
        for (mask, name) in names {
            if self.0 & mask != 0 {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// One key press: the key plus the modifiers held with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyStroke {
    pub key: HidKeyCode,
    pub modifiers: Modifiers,
}

impl KeyStroke {
    pub fn new(key: HidKeyCode, modifiers: Modifiers) -> Self {
        Self { key, modifiers }
    }

    /// A key pressed with no modifier.
    pub fn plain(key: HidKeyCode) -> Self {
        Self::new(key, Modifiers::NONE)
    }
}

/// Translates a printable character into the key stroke that types it.
///
/// # Errors
///
/// Returns [`KeymapError::UnsupportedCharacter`] for every character outside
/// `[a-zA-Z0-9]`.
pub fn char_to_keystroke(ch: char) -> Result<KeyStroke, KeymapError> {
    let unsupported = || KeymapError::UnsupportedCharacter { ch };
    let offset = |base: char| usize::try_from(u32::from(ch) - u32::from(base)).ok();

    let stroke = match ch {
        'a'..='z' => KeyStroke::plain(
            offset('a')
                .and_then(|i| LETTERS.get(i).copied())
                .ok_or_else(unsupported)?,
        ),
        'A'..='Z' => KeyStroke::new(
            offset('A').and_then(|i| LETTERS.get(i).copied()).ok_or_else(unsupported)?,
            Modifiers::SHIFT,
        ),
        // `0` is last in the HID digit row, so it cannot use the linear offset.
        '0' => KeyStroke::plain(HidKeyCode::Digit0),
        '1'..='9' => KeyStroke::plain(
            offset('1')
                .and_then(|i| DIGITS_FROM_ONE.get(i).copied())
                .ok_or_else(unsupported)?,
        ),
        _ => return Err(unsupported()),
    };
    Ok(stroke)
}

/// Inverse of [`char_to_keystroke`].
///
/// Returns `None` for key strokes that no supported character produces
/// (navigation keys, or modifiers other than a lone Shift on a letter).
pub fn keystroke_to_char(stroke: KeyStroke) -> Option<char> {
    let raw = stroke.key.as_u8();
    let shifted = stroke.modifiers == Modifiers::SHIFT;
    if !stroke.modifiers.is_empty() && !shifted {
        return None;
    }

    match raw {
        0x04..=0x1D => {
            let base = if shifted { b'A' } else { b'a' };
            Some(char::from(base + (raw - 0x04)))
        }
        0x1E..=0x26 if !shifted => Some(char::from(b'1' + (raw - 0x1E))),
        0x27 if !shifted => Some('0'),
        _ => None,
    }
}

/// Validates that every character of `text` can be typed.
///
/// # Errors
///
/// Returns [`KeymapError::UnsupportedCharacter`] for the first character
/// without a mapping.
pub fn validate_text(text: &str) -> Result<(), KeymapError> {
    text.chars().try_for_each(|ch| char_to_keystroke(ch).map(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercase_letters_map_to_base_scancode_plus_offset() {
        for (i, ch) in ('a'..='z').enumerate() {
            // Arrange / Act
            let stroke = char_to_keystroke(ch).unwrap();

            // Assert
            assert_eq!(usize::from(stroke.key.as_u8()), 0x04 + i, "{ch:?}");
            assert!(stroke.modifiers.is_empty());
        }
    }

    #[test]
    fn test_uppercase_letters_use_same_scancode_with_shift() {
        for (lower, upper) in ('a'..='z').zip('A'..='Z') {
            let lower_stroke = char_to_keystroke(lower).unwrap();
            let upper_stroke = char_to_keystroke(upper).unwrap();

            assert_eq!(lower_stroke.key, upper_stroke.key);
            assert_eq!(upper_stroke.modifiers, Modifiers::SHIFT);
        }
    }

    #[test]
    fn test_zero_maps_after_nine() {
        let nine = char_to_keystroke('9').unwrap();
        let zero = char_to_keystroke('0').unwrap();

        assert_eq!(zero.key, HidKeyCode::Digit0);
        assert_eq!(zero.key.as_u8(), nine.key.as_u8() + 1);
    }

    #[test]
    fn test_digits_one_to_nine_are_contiguous_from_0x1e() {
        for (i, ch) in ('1'..='9').enumerate() {
            let stroke = char_to_keystroke(ch).unwrap();
            assert_eq!(usize::from(stroke.key.as_u8()), 0x1E + i, "{ch:?}");
        }
    }

    #[test]
    fn test_every_supported_character_round_trips_through_inverse() {
        for ch in ('a'..='z').chain('A'..='Z').chain('0'..='9') {
            let stroke = char_to_keystroke(ch).unwrap();
            assert_eq!(keystroke_to_char(stroke), Some(ch), "{ch:?} via {stroke:?}");
        }
    }

    #[test]
    fn test_punctuation_whitespace_and_symbols_are_unsupported() {
        let rejected = (' '..='~')
            .filter(|c| !c.is_ascii_alphanumeric())
            .chain(['\t', '\n', 'é', 'ß', '€']);

        for ch in rejected {
            assert_eq!(
                char_to_keystroke(ch),
                Err(KeymapError::UnsupportedCharacter { ch }),
                "{ch:?} must be rejected"
            );
        }
    }

    #[test]
    fn test_keystroke_to_char_rejects_navigation_and_foreign_modifiers() {
        assert_eq!(keystroke_to_char(KeyStroke::plain(HidKeyCode::Enter)), None);
        assert_eq!(
            keystroke_to_char(KeyStroke::new(HidKeyCode::KeyI, Modifiers::META)),
            None
        );
        assert_eq!(
            keystroke_to_char(KeyStroke::new(HidKeyCode::Digit1, Modifiers::SHIFT)),
            None
        );
    }

    #[test]
    fn test_validate_text_reports_first_unsupported_character() {
        assert_eq!(validate_text("0000"), Ok(()));
        assert_eq!(
            validate_text("ab-c."),
            Err(KeymapError::UnsupportedCharacter { ch: '-' })
        );
    }

    #[test]
    fn test_modifiers_from_names_combines_bits() {
        // Arrange
        let names = ["shift", "META"];

        // Act
        let mods = Modifiers::from_names(&names).unwrap();

        // Assert
        assert!(mods.shift());
        assert!(mods.meta());
        assert_eq!(mods.bits(), 0x02 | 0x08);
        assert_eq!(mods.to_string(), "shift+meta");
    }

    #[test]
    fn test_modifiers_from_names_rejects_unknown() {
        let result = Modifiers::from_names(&["hyper"]);
        assert!(matches!(result, Err(KeymapError::UnknownModifier { .. })));
    }
}
