//! Run state machine.

use storyreel_shared::{Result, StoryReelError};

/// Stage of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Planning,
    AssetGeneration,
    Composition,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::AssetGeneration => "asset_generation",
            Self::Composition => "composition",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `self -> next` is a legal step. Stages advance strictly in
    /// order; any non-terminal stage may fail.
    pub fn can_transition_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (Self::Planning, Self::AssetGeneration)
                | (Self::AssetGeneration, Self::Composition)
                | (Self::Composition, Self::Done)
        ) || (!self.is_terminal() && next == Self::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus every state visited so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachine {
    history: Vec<RunState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// A machine in [`RunState::Planning`].
    pub fn new() -> Self {
        Self {
            history: vec![RunState::Planning],
        }
    }

    pub fn current(&self) -> RunState {
        self.history
            .last()
            .copied()
            .unwrap_or(RunState::Planning)
    }

    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn into_history(self) -> Vec<RunState> {
        self.history
    }

    /// Move to `next`, rejecting illegal steps.
    pub fn transition(&mut self, next: RunState) -> Result<()> {
        let current = self.current();
        if !current.can_transition_to(next) {
            return Err(StoryReelError::InvalidTransition {
                from: current.as_str(),
                to: next.as_str(),
            });
        }
        self.history.push(next);
        Ok(())
    }

    /// Record failure. A no-op once the run is already terminal.
    pub fn fail(&mut self) {
        if !self.current().is_terminal() {
            self.history.push(RunState::Failed);
        }
    }
}
