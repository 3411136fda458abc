//! Pure transition rules for the auto-fix retry sub-loop.
//!
//! The driver in [`crate::fix`] performs the I/O; every decision about which
//! state comes next lives here so it can be tested without collaborators.

use serde::{Deserialize, Serialize};

use crate::core::types::ExecutionResult;

/// States of the auto-fix sub-loop. `Done` and `Stopped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixState {
    Run,
    Inspect,
    OfferFix,
    Fixing,
    ReviewFix,
    Stopped,
    Done,
}

impl FixState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FixState::Done | FixState::Stopped)
    }
}

/// What to do when the user declines both to apply a fix and to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndecidedPolicy {
    /// Stay in `ReviewFix` and ask about the same fix again.
    #[default]
    Reask,
    /// Treat the double decline as an implicit stop.
    Stop,
}

/// Tunables for one sub-loop instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixPolicy {
    pub on_undecided: UndecidedPolicy,
    /// Upper bound on `Fixing` rounds. `None` keeps the loop unbounded.
    pub max_fix_rounds: Option<u32>,
}

impl FixPolicy {
    pub fn rounds_exhausted(&self, fix_rounds: u32) -> bool {
        self.max_fix_rounds.is_some_and(|limit| fix_rounds >= limit)
    }
}

/// User's answers while reviewing a proposed fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Apply,
    Stop,
    /// Declined to apply and declined to stop.
    Undecided,
}

/// `Inspect` → `Done` on success (or non-zero with empty stderr), else `OfferFix`.
pub fn inspect(result: &ExecutionResult) -> FixState {
    if result.is_failure() {
        FixState::OfferFix
    } else {
        FixState::Done
    }
}

/// `OfferFix` → `Fixing` when accepted, `Stopped` otherwise.
pub fn offer_fix(accepted: bool) -> FixState {
    if accepted {
        FixState::Fixing
    } else {
        FixState::Stopped
    }
}

/// `ReviewFix` → next state for the given decision.
pub fn review_fix(decision: ReviewDecision, policy: &FixPolicy) -> FixState {
    match decision {
        ReviewDecision::Apply => FixState::Run,
        ReviewDecision::Stop => FixState::Stopped,
        ReviewDecision::Undecided => match policy.on_undecided {
            UndecidedPolicy::Reask => FixState::ReviewFix,
            UndecidedPolicy::Stop => FixState::Stopped,
        },
    }
}

/// Summary of a finished sub-loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixOutcome {
    /// `Done` or `Stopped`.
    pub final_state: FixState,
    /// Every state visited, in order, ending with `final_state`.
    pub trace: Vec<FixState>,
    pub runs: u32,
    pub fix_rounds: u32,
    pub fixes_applied: u32,
}
