//! ScriptEngine: executes a [`Script`]'s steps strictly in order.
//!
//! The engine remembers only one thing: the flat index of the next step.
//! Because there is no screen feedback, that index is the only record of
//! where the device UI should be, and resuming means "continue from index
//! `k`" on whatever [`HidSink`] is current at the time.
//!
//! A failing step stops the engine immediately.  The index of the failed
//! step is reported and nothing is retried.

use hid_setup_core::Script;
use thiserror::Error;
use tracing::debug;

use super::actions::{perform, ActionError, HidSink};

/// Error type for script execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("step {index} failed: {source}")]
    StepFailed {
        index: usize,
        #[source]
        source: ActionError,
    },
}

/// An engine was asked to start past the end of its script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot start at step {index} of a {len}-step script")]
pub struct StartOutOfRange {
    pub index: usize,
    pub len: usize,
}

/// Cursor over one script.
#[derive(Debug)]
pub struct ScriptEngine<'s> {
    script: &'s Script,
    next: usize,
}

impl<'s> ScriptEngine<'s> {
    /// Creates an engine positioned at the first step.
    pub fn new(script: &'s Script) -> Self {
        Self { script, next: 0 }
    }

    /// Creates an engine positioned at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`StartOutOfRange`] if `index` is past the end.
    pub fn starting_at(script: &'s Script, index: usize) -> Result<Self, StartOutOfRange> {
        if index > script.len() {
            return Err(StartOutOfRange {
                index,
                len: script.len(),
            });
        }
        Ok(Self {
            script,
            next: index,
        })
    }

    /// Index of the next step to run; equals the number of steps completed.
    pub fn next_index(&self) -> usize {
        self.next
    }

    pub fn is_finished(&self) -> bool {
        self.next >= self.script.len()
    }

    /// Runs steps until the next index reaches `end` (clamped to the script
    /// length).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StepFailed`] for the first failing step; the
    /// engine stays positioned on that step.
    pub async fn run_until(&mut self, sink: &dyn HidSink, end: usize) -> Result<(), EngineError> {
        let end = end.min(self.script.len());
        let steps = self.script.steps();
        while self.next < end {
            let index = self.next;
            let entry = &steps[index];
            match &entry.note {
                Some(note) => debug!(index, step = %entry.step, note, "step"),
                None => debug!(index, step = %entry.step, "step"),
            }
            perform(sink, &entry.step)
                .await
                .map_err(|source| EngineError::StepFailed { index, source })?;
            self.next += 1;
        }
        Ok(())
    }

    /// Runs every remaining step.
    ///
    /// # Errors
    ///
    /// As [`ScriptEngine::run_until`].
    pub async fn run_to_end(&mut self, sink: &dyn HidSink) -> Result<(), EngineError> {
        self.run_until(sink, self.script.len()).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
