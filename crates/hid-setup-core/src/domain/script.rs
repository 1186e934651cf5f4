//! [`Script`]: an ordered list of steps plus the reconnect point.
//!
//! The reconnect point is a position *between* steps.  Steps before it run
//! on the original accessory session; the device is then expected to drop
//! off the bus and re-enumerate (enabling USB debugging does this), the
//! session is rebuilt, and the remaining steps run on the new session.
//!
//! ```text
//!  index:   0    1    2   ...  k-1 │ k  ...  n-1
//!           ──── session #1 ────── │ ── session #2 ──
//!                                  └ reconnect_point = k
//! ```
//!
//! A reconnect point equal to `len()` means "reconnect after the last step",
//! which is how both first-boot setup scripts end.

use std::ops::Range;
use std::time::Duration;

use thiserror::Error;

use super::step::ScriptStep;

/// Errors raised when constructing a [`Script`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("reconnect point {point} is past the end of a {len}-step script")]
    ReconnectPointOutOfRange { point: usize, len: usize },
}

/// An immutable, index-addressable device script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    name: String,
    steps: Vec<ScriptStep>,
    reconnect_point: Option<usize>,
}

impl Script {
    /// Creates a script.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::ReconnectPointOutOfRange`] if the reconnect
    /// point is greater than the number of steps.
    pub fn new(
        name: impl Into<String>,
        steps: Vec<ScriptStep>,
        reconnect_point: Option<usize>,
    ) -> Result<Self, ScriptError> {
        if let Some(point) = reconnect_point {
            if point > steps.len() {
                return Err(ScriptError::ReconnectPointOutOfRange {
                    point,
                    len: steps.len(),
                });
            }
        }
        Ok(Self {
            name: name.into(),
            steps,
            reconnect_point,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn reconnect_point(&self) -> Option<usize> {
        self.reconnect_point
    }

    /// Index ranges executed before and after the reconnect point.
    ///
    /// Without a reconnect point the whole script is the first range and the
    /// second range is empty.
    pub fn segments(&self) -> (Range<usize>, Range<usize>) {
        let split = self.reconnect_point.unwrap_or(self.steps.len());
        (0..split, split..self.steps.len())
    }

    /// Lower bound on the time the script takes, ignoring the reconnect.
    pub fn min_duration(&self) -> Duration {
        self.steps.iter().map(|s| s.step.min_duration()).sum()
    }

    /// Total key-down events the script sends.
    pub fn key_press_count(&self) -> usize {
        self.steps.iter().map(|s| s.step.key_press_count()).sum()
    }
}
