//! USB HID Usage IDs (page 0x07, Keyboard/Keypad page).
//!
//! These are the codes the emulated keyboard puts into its input reports.
//! Android maps them to key events exactly as it would for a physical USB
//! keyboard plugged into the device, so navigation keys, Enter, and letters
//! behave the same as on real hardware.
//!
//! Reference: USB HID Usage Tables 1.3, Section 10 (Keyboard/Keypad page 0x07).
//!
//! # Why usage IDs and not characters? (for beginners)
//!
//! A HID usage ID names a **physical key position**, not the symbol printed
//! on it.  `KeyA` is 0x04 whatever layout the device has configured; the
//! upper-case letter is produced by sending the same code with the Shift
//! modifier held.  The device setup scripts only rely on the US layout for
//! letters and digits, which is the Android default on first boot.
//!
//! | Key          | HID Usage ID |
//! |--------------|-------------|
//! | Letter A     | 0x04        |
//! | Digit 1      | 0x1E        |
//! | Digit 0      | 0x27        |
//! | Enter        | 0x28        |
//!
//! Notice that `Digit0` comes *after* `Digit9`: the HID table follows the
//! keyboard's top row, where `0` is the right-most digit key.

use serde::{Deserialize, Serialize};

use super::KeymapError;

/// USB HID Usage ID for the keys the setup scripts can press.
///
/// The numeric value of each variant is its HID Usage ID on the keyboard page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum HidKeyCode {
    // Letters (HID 0x04–0x1D)
    KeyA = 0x04,
    KeyB = 0x05,
    KeyC = 0x06,
    KeyD = 0x07,
    KeyE = 0x08,
    KeyF = 0x09,
    KeyG = 0x0A,
    KeyH = 0x0B,
    KeyI = 0x0C,
    KeyJ = 0x0D,
    KeyK = 0x0E,
    KeyL = 0x0F,
    KeyM = 0x10,
    KeyN = 0x11,
    KeyO = 0x12,
    KeyP = 0x13,
    KeyQ = 0x14,
    KeyR = 0x15,
    KeyS = 0x16,
    KeyT = 0x17,
    KeyU = 0x18,
    KeyV = 0x19,
    KeyW = 0x1A,
    KeyX = 0x1B,
    KeyY = 0x1C,
    KeyZ = 0x1D,

    // Digits (HID 0x1E–0x27)
    Digit1 = 0x1E,
    Digit2 = 0x1F,
    Digit3 = 0x20,
    Digit4 = 0x21,
    Digit5 = 0x22,
    Digit6 = 0x23,
    Digit7 = 0x24,
    Digit8 = 0x25,
    Digit9 = 0x26,
    Digit0 = 0x27,

    // Control keys
    Enter = 0x28,
    Escape = 0x29,
    Backspace = 0x2A,
    Tab = 0x2B,
    Space = 0x2C,

    // Navigation cluster (HID 0x4A–0x52)
    Home = 0x4A,
    PageUp = 0x4B,
    Delete = 0x4C,
    End = 0x4D,
    PageDown = 0x4E,
    ArrowRight = 0x4F,
    ArrowLeft = 0x50,
    ArrowDown = 0x51,
    ArrowUp = 0x52,
}

/// Letters in HID order, indexed by `char - 'a'`.
pub(crate) const LETTERS: [HidKeyCode; 26] = [
    HidKeyCode::KeyA,
    HidKeyCode::KeyB,
    HidKeyCode::KeyC,
    HidKeyCode::KeyD,
    HidKeyCode::KeyE,
    HidKeyCode::KeyF,
    HidKeyCode::KeyG,
    HidKeyCode::KeyH,
    HidKeyCode::KeyI,
    HidKeyCode::KeyJ,
    HidKeyCode::KeyK,
    HidKeyCode::KeyL,
    HidKeyCode::KeyM,
    HidKeyCode::KeyN,
    HidKeyCode::KeyO,
    HidKeyCode::KeyP,
    HidKeyCode::KeyQ,
    HidKeyCode::KeyR,
    HidKeyCode::KeyS,
    HidKeyCode::KeyT,
    HidKeyCode::KeyU,
    HidKeyCode::KeyV,
    HidKeyCode::KeyW,
    HidKeyCode::KeyX,
    HidKeyCode::KeyY,
    HidKeyCode::KeyZ,
];

/// Digits `1`..=`9` in HID order, indexed by `char - '1'`.  `0` is separate.
pub(crate) const DIGITS_FROM_ONE: [HidKeyCode; 9] = [
    HidKeyCode::Digit1,
    HidKeyCode::Digit2,
    HidKeyCode::Digit3,
    HidKeyCode::Digit4,
    HidKeyCode::Digit5,
    HidKeyCode::Digit6,
    HidKeyCode::Digit7,
    HidKeyCode::Digit8,
    HidKeyCode::Digit9,
];

impl HidKeyCode {
    /// Converts a raw HID Usage ID to a [`HidKeyCode`].
    ///
    /// Returns `None` for usage IDs the scripts never press.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x04..=0x1D => LETTERS.get(usize::from(value - 0x04)).copied(),
            0x1E..=0x26 => DIGITS_FROM_ONE.get(usize::from(value - 0x1E)).copied(),
            0x27 => Some(HidKeyCode::Digit0),
            0x28 => Some(HidKeyCode::Enter),
            0x29 => Some(HidKeyCode::Escape),
            0x2A => Some(HidKeyCode::Backspace),
            0x2B => Some(HidKeyCode::Tab),
            0x2C => Some(HidKeyCode::Space),
            0x4A => Some(HidKeyCode::Home),
            0x4B => Some(HidKeyCode::PageUp),
            0x4C => Some(HidKeyCode::Delete),
            0x4D => Some(HidKeyCode::End),
            0x4E => Some(HidKeyCode::PageDown),
            0x4F => Some(HidKeyCode::ArrowRight),
            0x50 => Some(HidKeyCode::ArrowLeft),
            0x51 => Some(HidKeyCode::ArrowDown),
            0x52 => Some(HidKeyCode::ArrowUp),
            _ => None,
        }
    }

    /// Returns the raw USB HID Usage ID value for this key code.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses the key name used in script files.
    ///
    /// Names are case-insensitive.  Single letters and digits name their own
    /// key (`"i"`, `"0"`); navigation keys use their common names (`"down"`,
    /// `"end"`, `"enter"`).
    ///
    /// # Errors
    ///
    /// Returns [`KeymapError::UnknownKey`] for names with no mapping.
    pub fn from_name(name: &str) -> Result<Self, KeymapError> {
        let lower = name.trim().to_ascii_lowercase();
        let mut chars = lower.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                return super::char_to_keystroke(c).map(|stroke| stroke.key);
            }
        }

        let key = match lower.as_str() {
            "enter" | "return" => HidKeyCode::Enter,
            "escape" | "esc" => HidKeyCode::Escape,
            "backspace" => HidKeyCode::Backspace,
            "tab" => HidKeyCode::Tab,
            "space" => HidKeyCode::Space,
            "home" => HidKeyCode::Home,
            "page_up" | "pageup" => HidKeyCode::PageUp,
            "delete" | "del" => HidKeyCode::Delete,
            "end" => HidKeyCode::End,
            "page_down" | "pagedown" => HidKeyCode::PageDown,
            "right" => HidKeyCode::ArrowRight,
            "left" => HidKeyCode::ArrowLeft,
            "down" => HidKeyCode::ArrowDown,
            "up" => HidKeyCode::ArrowUp,
            _ => {
                return Err(KeymapError::UnknownKey {
                    name: name.to_string(),
                })
            }
        };
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMED_KEYS: &[(&str, HidKeyCode, u8)] = &[
        ("enter", HidKeyCode::Enter, 0x28),
        ("RETURN", HidKeyCode::Enter, 0x28),
        ("esc", HidKeyCode::Escape, 0x29),
        ("tab", HidKeyCode::Tab, 0x2B),
        ("end", HidKeyCode::End, 0x4D),
        ("right", HidKeyCode::ArrowRight, 0x4F),
        ("left", HidKeyCode::ArrowLeft, 0x50),
        ("down", HidKeyCode::ArrowDown, 0x51),
        ("Up", HidKeyCode::ArrowUp, 0x52),
        ("i", HidKeyCode::KeyI, 0x0C),
        ("0", HidKeyCode::Digit0, 0x27),
    ];

    #[test]
    fn test_from_name_resolves_script_key_names() {
        for &(name, expected, raw) in NAMED_KEYS {
            // Arrange / Act
            let key = HidKeyCode::from_name(name).unwrap();

            // Assert
            assert_eq!(key, expected, "name {name:?}");
            assert_eq!(key.as_u8(), raw, "{key:?} should be 0x{raw:02X}");
        }
    }

    #[test]
    fn test_from_name_rejects_unknown_names() {
        let result = HidKeyCode::from_name("hyper");
        assert!(matches!(result, Err(KeymapError::UnknownKey { name }) if name == "hyper"));
    }

    #[test]
    fn test_from_u8_recovers_every_letter_and_digit() {
        for code in LETTERS.iter().chain(DIGITS_FROM_ONE.iter()) {
            assert_eq!(HidKeyCode::from_u8(code.as_u8()), Some(*code));
        }
        assert_eq!(HidKeyCode::from_u8(0x27), Some(HidKeyCode::Digit0));
    }

    #[test]
    fn test_from_u8_returns_none_for_unassigned_values() {
        for unassigned in [0x00, 0x01, 0x03, 0x2D, 0x39, 0x53, 0xE0, 0xFF] {
            assert_eq!(
                HidKeyCode::from_u8(unassigned),
                None,
                "0x{unassigned:02X} should have no mapping"
            );
        }
    }

    #[test]
    fn test_letters_are_contiguous_from_0x04() {
        for (i, letter) in LETTERS.iter().enumerate() {
            assert_eq!(usize::from(letter.as_u8()), 0x04 + i, "{letter:?}");
        }
    }
}
