//! Per-model device profiles and the registry that selects between them.
//!
//! A profile pairs a device-type identifier with two scripts: the first-boot
//! setup wizard and (optionally) the factory-reset flow.  Profiles are data,
//! written as TOML documents, so tuning a model's step counts never touches
//! the execution engine.
//!
//! # Profile file format
//!
//! ```toml
//! device_type = "g23"
//! aliases = ["moto_g23"]
//!
//! [setup]
//! steps = [
//!     { press = "up", times = 100, settle_ms = 2000, note = "wake screen" },
//!     { press = "down", times = 17 },
//!     { press = "enter" },
//!     { macro = "confirm" },
//!     { type = "0000" },
//!     { reconnect = true },
//! ]
//!
//! [reset]
//! steps = [ { press = "i", modifiers = ["meta"], settle_ms = 2000 } ]
//! ```
//!
//! A profile without a reset flow can say why with
//! `reset_unsupported = "<reason>"`.
//!
//! `times` is expanded when the file is loaded, so the resulting [`Script`]
//! is a flat list and every step has a stable index.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::script::{Script, ScriptError};
use super::step::{Macro, MouseButton, ScriptStep, Step};
use super::timing;
use crate::keymap::{self, HidKeyCode, KeyStroke, KeymapError, Modifiers};

/// Built-in profile documents, embedded at compile time.
const BUILTIN_PROFILES: &[(&str, &str)] = &[
    ("g23.toml", include_str!("../../profiles/g23.toml")),
    ("pixel_8.toml", include_str!("../../profiles/pixel_8.toml")),
];

/// Which flow to run on the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// First-boot setup wizard through to USB debugging being enabled.
    #[default]
    Setup,
    /// Factory reset from the settings menu.
    FactoryReset,
}

impl TaskKind {
    /// Interprets the optional third command-line argument.
    ///
    /// Only the literal `reset` (any case) selects [`TaskKind::FactoryReset`];
    /// anything else, or no argument, keeps the setup flow.
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            Some(a) if a.eq_ignore_ascii_case("reset") => TaskKind::FactoryReset,
            _ => TaskKind::Setup,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Setup => f.write_str("setup"),
            TaskKind::FactoryReset => f.write_str("factory-reset"),
        }
    }
}

/// Errors raised while loading profile documents.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to parse profile `{origin}`: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("I/O error reading profiles at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{script} entry {entry}: {reason}")]
    InvalidStep {
        script: String,
        entry: usize,
        reason: String,
    },
    #[error("{script} entry {entry}: {source}")]
    Keymap {
        script: String,
        entry: usize,
        #[source]
        source: KeymapError,
    },
    #[error("{script} entry {entry}: a script can have only one reconnect point")]
    DuplicateReconnectPoint { script: String, entry: usize },
    #[error("profile `{device_type}` has both a [reset] script and `reset_unsupported`")]
    ConflictingReset { device_type: String },
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Errors raised when selecting a script for a device type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileLookupError {
    #[error("unsupported device type `{device_type}`")]
    UnsupportedDevice { device_type: String },
    #[error("factory reset is not implemented for `{device_type}` devices: {reason}")]
    ResetNotImplemented { device_type: String, reason: String },
}

/// An immutable per-model profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub device_type: String,
    pub aliases: Vec<String>,
    pub description: Option<String>,
    pub setup: Script,
    pub reset: Option<Script>,
    /// Why there is no reset script, when the profile says so.
    pub reset_unsupported: Option<String>,
}

impl DeviceProfile {
    /// Parses a profile document.
    ///
    /// `origin` names the document in error messages (a file name).
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] for malformed TOML, unknown key, modifier, or
    /// macro names, characters with no scancode mapping, or a misplaced
    /// reconnect point.
    pub fn from_toml(origin: &str, text: &str) -> Result<Self, ProfileError> {
        let doc: ProfileDocument = toml::from_str(text).map_err(|source| ProfileError::Parse {
            origin: origin.to_string(),
            source,
        })?;

        if doc.reset.is_some() && doc.reset_unsupported.is_some() {
            return Err(ProfileError::ConflictingReset {
                device_type: doc.device_type,
            });
        }

        let setup = compile_script(&format!("{}/setup", doc.device_type), &doc.setup)?;
        let reset = doc
            .reset
            .as_ref()
            .map(|raw| compile_script(&format!("{}/reset", doc.device_type), raw))
            .transpose()?;

        debug!(
            device_type = %doc.device_type,
            setup_steps = setup.len(),
            reset_steps = reset.as_ref().map(Script::len),
            "profile loaded"
        );

        Ok(Self {
            device_type: doc.device_type,
            aliases: doc.aliases,
            description: doc.description,
            setup,
            reset,
            reset_unsupported: doc.reset_unsupported,
        })
    }

    /// Returns the script for `task`.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileLookupError::ResetNotImplemented`] when a factory reset
    /// is requested from a profile that has no reset script.
    pub fn script_for(&self, task: TaskKind) -> Result<&Script, ProfileLookupError> {
        match task {
            TaskKind::Setup => Ok(&self.setup),
            TaskKind::FactoryReset => {
                self.reset
                    .as_ref()
                    .ok_or_else(|| ProfileLookupError::ResetNotImplemented {
                        device_type: self.device_type.clone(),
                        reason: self
                            .reset_unsupported
                            .clone()
                            .unwrap_or_else(|| "no reset script in profile".to_string()),
                    })
            }
        }
    }
}

/// Case-insensitive map from device-type identifier to profile.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, Arc<DeviceProfile>>,
}

impl ProfileRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in profiles.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] if an embedded profile is malformed.
    pub fn builtin() -> Result<Self, ProfileError> {
        let mut registry = Self::new();
        for (origin, text) in BUILTIN_PROFILES {
            registry.insert(DeviceProfile::from_toml(origin, text)?);
        }
        Ok(registry)
    }

    /// Adds a profile, replacing any profile with the same identifier or alias.
    ///
    /// A profile with the same device type is dropped entirely, aliases
    /// included, so no name keeps pointing at the replaced script.
    pub fn insert(&mut self, profile: DeviceProfile) {
        let profile = Arc::new(profile);
        self.profiles.retain(|name, existing| {
            let replaced = existing.device_type.eq_ignore_ascii_case(&profile.device_type);
            if replaced {
                debug!(name = %name, device_type = %existing.device_type, "profile name replaced");
            }
            !replaced
        });
        let names = std::iter::once(&profile.device_type).chain(profile.aliases.iter());
        for name in names {
            self.profiles
                .insert(name.to_ascii_lowercase(), Arc::clone(&profile));
        }
    }

    /// Loads every `*.toml` file in `dir`, replacing built-ins of the same name.
    ///
    /// Returns the number of profiles loaded.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::Io`] if the directory cannot be read and the
    /// first parse/validation error of any file.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, ProfileError> {
        let io_err = |source| ProfileError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        for path in &paths {
            let text = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
                path: path.clone(),
                source,
            })?;
            let profile = DeviceProfile::from_toml(&path.display().to_string(), &text)?;
            info!(device_type = %profile.device_type, path = %path.display(), "loaded profile");
            self.insert(profile);
        }
        Ok(paths.len())
    }

    /// Looks up a profile by device type or alias, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileLookupError::UnsupportedDevice`] for unknown identifiers.
    pub fn get(&self, device_type: &str) -> Result<Arc<DeviceProfile>, ProfileLookupError> {
        self.profiles
            .get(&device_type.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ProfileLookupError::UnsupportedDevice {
                device_type: device_type.to_string(),
            })
    }

    /// Distinct device types, sorted.
    pub fn device_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .profiles
            .values()
            .map(|p| p.device_type.clone())
            .collect();
        types.sort();
        types.dedup();
        types
    }
}

// ── Raw document schema ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileDocument {
    device_type: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    reset_unsupported: Option<String>,
    setup: RawScript,
    #[serde(default)]
    reset: Option<RawScript>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawScript {
    steps: Vec<RawStep>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    press: Option<String>,
    #[serde(default)]
    modifiers: Vec<String>,
    #[serde(rename = "type")]
    text: Option<String>,
    mouse_move: Option<[i32; 2]>,
    click: Option<String>,
    sleep_ms: Option<u64>,
    #[serde(rename = "macro")]
    macro_name: Option<String>,
    #[serde(default)]
    reconnect: bool,
    times: Option<u32>,
    hold_ms: Option<u64>,
    settle_ms: Option<u64>,
    note: Option<String>,
}

impl RawStep {
    fn action_count(&self) -> usize {
        [
            self.press.is_some(),
            self.text.is_some(),
            self.mouse_move.is_some(),
            self.click.is_some(),
            self.sleep_ms.is_some(),
            self.macro_name.is_some(),
            self.reconnect,
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    /// Whether any per-step option is set alongside the action.
    fn has_step_options(&self) -> bool {
        self.times.is_some()
            || !self.modifiers.is_empty()
            || self.hold_ms.is_some()
            || self.settle_ms.is_some()
            || self.note.is_some()
    }
}

/// Upper bound on `times` for a single entry.
const MAX_TIMES: u32 = 10_000;

fn compile_script(name: &str, raw: &RawScript) -> Result<Script, ProfileError> {
    let mut steps = Vec::new();
    let mut reconnect_point = None;

    for (entry, raw_step) in raw.steps.iter().enumerate() {
        let invalid = |reason: &str| ProfileError::InvalidStep {
            script: name.to_string(),
            entry,
            reason: reason.to_string(),
        };

        if raw_step.action_count() != 1 {
            return Err(invalid(
                "exactly one of press, type, mouse_move, click, sleep_ms, macro, reconnect is required",
            ));
        }

        if raw_step.reconnect {
            if raw_step.has_step_options() {
                return Err(invalid(
                    "a reconnect point takes no times, modifiers, hold_ms, settle_ms or note",
                ));
            }
            if reconnect_point.is_some() {
                return Err(ProfileError::DuplicateReconnectPoint {
                    script: name.to_string(),
                    entry,
                });
            }
            reconnect_point = Some(steps.len());
            continue;
        }

        let times = raw_step.times.unwrap_or(1);
        if times == 0 {
            return Err(invalid("`times` must be at least 1"));
        }
        if times > MAX_TIMES {
            return Err(invalid(&format!("`times` must be at most {MAX_TIMES}")));
        }
        if !raw_step.modifiers.is_empty() && raw_step.press.is_none() {
            return Err(invalid("`modifiers` only applies to `press`"));
        }

        let step = compile_step(raw_step).map_err(|e| match e {
            StepCompileError::Keymap(source) => ProfileError::Keymap {
                script: name.to_string(),
                entry,
                source,
            },
            StepCompileError::Invalid(reason) => invalid(&reason),
        })?;

        for i in 0..times {
            steps.push(ScriptStep {
                step: step.clone(),
                note: if i == 0 { raw_step.note.clone() } else { None },
            });
        }
    }

    Ok(Script::new(name, steps, reconnect_point)?)
}

enum StepCompileError {
    Keymap(KeymapError),
    Invalid(String),
}

impl From<KeymapError> for StepCompileError {
    fn from(e: KeymapError) -> Self {
        StepCompileError::Keymap(e)
    }
}

fn compile_step(raw: &RawStep) -> Result<Step, StepCompileError> {
    let ms = |value: Option<u64>, default: Duration| value.map_or(default, Duration::from_millis);

    if let Some(name) = &raw.press {
        let key = HidKeyCode::from_name(name)?;
        let modifiers = Modifiers::from_names(&raw.modifiers)?;
        return Ok(Step::KeyPress {
            stroke: KeyStroke::new(key, modifiers),
            hold: ms(raw.hold_ms, timing::KEY_HOLD),
            settle: ms(raw.settle_ms, timing::KEY_SETTLE),
        });
    }
    if let Some(text) = &raw.text {
        keymap::validate_text(text)?;
        return Ok(Step::CharSequence {
            text: text.clone(),
            hold: ms(raw.hold_ms, timing::KEY_HOLD),
            interval: ms(raw.settle_ms, timing::CHAR_INTERVAL),
        });
    }
    if let Some([dx, dy]) = raw.mouse_move {
        return Ok(Step::MouseMove {
            dx,
            dy,
            settle: ms(raw.settle_ms, timing::MOUSE_MOVE_SETTLE),
        });
    }
    if let Some(name) = &raw.click {
        let button = MouseButton::from_name(name)
            .ok_or_else(|| StepCompileError::Invalid(format!("unknown mouse button `{name}`")))?;
        return Ok(Step::MouseClick {
            button,
            hold: ms(raw.hold_ms, timing::CLICK_HOLD),
            settle: ms(raw.settle_ms, timing::CLICK_SETTLE),
        });
    }
    if let Some(sleep) = raw.sleep_ms {
        return Ok(Step::Sleep(Duration::from_millis(sleep)));
    }
    if let Some(name) = &raw.macro_name {
        if raw.hold_ms.is_some() || raw.settle_ms.is_some() {
            return Err(StepCompileError::Invalid(
                "macros have fixed timing; remove hold_ms/settle_ms".to_string(),
            ));
        }
        let m = Macro::from_name(name)
            .ok_or_else(|| StepCompileError::Invalid(format!("unknown macro `{name}`")))?;
        return Ok(Step::Macro(m));
    }
    Err(StepCompileError::Invalid("empty step".to_string()))
}
