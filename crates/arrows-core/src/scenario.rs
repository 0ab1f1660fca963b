//! Scenario: a cursor over a [`TrialList`].
//!
//! ```text
//! NotStarted --run--> Running(0) --next--> Running(1) ... Running(n-1)
//!      \                  |                                  |
//!       \---stop---> Stopped <-------------stop--------------/
//! ```
//!
//! `Stopped` may be `run()` again, which restarts at trial 0.

use crate::errors::ScenarioError;
use crate::trial::{Trial, TrialList};

/// Where the cursor is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Never run.
    NotStarted,
    /// Positioned on the trial at this index.
    Running(usize),
    /// Stopped after running.
    Stopped,
}

/// Trial list plus run state.
#[derive(Clone, Debug)]
pub struct Scenario {
    trials: TrialList,
    state: RunState,
}

impl Scenario {
    /// A fresh, not-yet-running scenario.
    pub fn new(trials: TrialList) -> Self {
        Self {
            trials,
            state: RunState::NotStarted,
        }
    }

    /// Start at the first trial.
    pub fn run(&mut self) -> Result<&Trial, ScenarioError> {
        if self.is_running() {
            return Err(ScenarioError::AlreadyRunning);
        }
        self.state = RunState::Running(0);
        Ok(&self.trials[0])
    }

    /// Trial under the cursor.
    pub fn current(&self) -> Result<&Trial, ScenarioError> {
        let index = self.current_index().ok_or(ScenarioError::NotRunning)?;
        Ok(&self.trials[index])
    }

    /// Advance one trial and return it.
    pub fn next(&mut self) -> Result<&Trial, ScenarioError> {
        let index = self.current_index().ok_or(ScenarioError::NotRunning)?;
        if index + 1 >= self.trials.len() {
            return Err(ScenarioError::NoNextTrial(index));
        }
        self.state = RunState::Running(index + 1);
        Ok(&self.trials[index + 1])
    }

    /// True iff running and not on the last trial.
    pub fn has_next(&self) -> bool {
        self.current_index()
            .is_some_and(|index| index + 1 < self.trials.len())
    }

    /// Clear the cursor. Valid from any state.
    pub fn stop(&mut self) {
        self.state = RunState::Stopped;
    }

    /// True while positioned on a trial.
    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running(_))
    }

    /// Cursor index while running.
    pub fn current_index(&self) -> Option<usize> {
        match self.state {
            RunState::Running(index) => Some(index),
            RunState::NotStarted | RunState::Stopped => None,
        }
    }

    /// Raw run state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Number of trials.
    pub fn len(&self) -> usize {
        self.trials.len()
    }

    /// Required next to `len` by clippy's `len_without_is_empty`. Never true,
    /// since the trial list cannot be empty.
    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// The underlying trial list.
    pub fn trials(&self) -> &TrialList {
        &self.trials
    }
}
