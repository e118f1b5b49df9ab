//! Orchestrator lifecycle with transition validation.
//!
//! ```text
//! Uninitialized -> Resolving -> Loaded
//!                  Resolving -> DegradedFallback -> Loaded
//! Loaded -> Resolving
//! ```
//!
//! A run that was dropped before reaching `Loaded` leaves the machine in
//! `Resolving` or `DegradedFallback`; both may re-enter `Resolving`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Uninitialized,
    Resolving,
    /// Dependency-aware mode was abandoned for this run.
    DegradedFallback,
    Loaded,
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrchestratorState::Uninitialized => "Uninitialized",
            OrchestratorState::Resolving => "Resolving",
            OrchestratorState::DegradedFallback => "DegradedFallback",
            OrchestratorState::Loaded => "Loaded",
        };
        write!(f, "{}", s)
    }
}

/// A state that was entered, with its timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub state: OrchestratorState,
    pub entered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachine {
    current: OrchestratorState,
    history: Vec<StateHistoryEntry>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: OrchestratorState::Uninitialized,
            history: vec![StateHistoryEntry {
                state: OrchestratorState::Uninitialized,
                entered_at: Utc::now(),
            }],
        }
    }

    pub fn can_transition(&self, target: OrchestratorState) -> bool {
        use OrchestratorState::*;
        matches!(
            (self.current, target),
            (Uninitialized, Resolving)
                | (Resolving, Loaded)
                | (Resolving, DegradedFallback)
                | (DegradedFallback, Loaded)
                | (Loaded, Resolving)
                | (Resolving, Resolving)
                | (DegradedFallback, Resolving)
        )
    }

    /// True when the last run stopped before reaching `Loaded`.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self.current,
            OrchestratorState::Resolving | OrchestratorState::DegradedFallback
        )
    }

    pub fn transition(&mut self, target: OrchestratorState) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            });
        }
        self.current = target;
        self.history.push(StateHistoryEntry {
            state: target,
            entered_at: Utc::now(),
        });
        Ok(())
    }

    pub fn current(&self) -> OrchestratorState {
        self.current
    }

    pub fn history(&self) -> &[StateHistoryEntry] {
        &self.history
    }
}
