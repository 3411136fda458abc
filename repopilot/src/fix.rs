//! Driver for the auto-fix retry sub-loop.
//!
//! Runs the file, and while it keeps failing offers to ask the engine for a
//! fix. Transitions come from [`crate::core::fix_loop`]; this module only
//! performs the I/O each state needs.

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::fix_loop::{
    FixOutcome, FixState, ReviewDecision, inspect, offer_fix, review_fix,
};
use crate::core::types::{
    EngineResponse, ExecutionResult, FeatureRequest, ProposedChange, QueryRequest,
};
use crate::engine::{BackendError, KnowledgeEngine};
use crate::io::applier::ChangeApplier;
use crate::io::interaction::Interaction;
use crate::io::script::ScriptRunner;
use crate::session::Session;

pub const AUTO_FIX_PROMPT: &str =
    "It seems that some errors have occurred, do you need to automatically fix them?";
pub const APPLY_FIX_PROMPT: &str = "Do you want to apply the change to the file?";
pub const STOP_PROMPT: &str = "Do you want to stop?";
pub const RERUN_NOTICE: &str = "Rerun script...";

/// Run `path` and drive fixes for it until it succeeds or the user stops.
///
/// `feature` is resent unchanged with every fix request.
#[instrument(skip_all, fields(path = %path))]
pub fn run_fix_loop<E, A, R, I>(
    session: &Session<'_, E, A, R, I>,
    feature: &FeatureRequest,
    path: &str,
) -> Result<FixOutcome>
where
    E: KnowledgeEngine + ?Sized,
    A: ChangeApplier + ?Sized,
    R: ScriptRunner + ?Sized,
    I: Interaction + ?Sized,
{
    let ui = session.ui;
    let policy = &session.policy;

    let mut state = FixState::Run;
    let mut trace = Vec::new();
    let mut latest: Option<ExecutionResult> = None;
    let mut proposal: Option<ProposedChange> = None;
    let (mut runs, mut fix_rounds, mut fixes_applied) = (0u32, 0u32, 0u32);

    loop {
        trace.push(state);
        debug!(?state, runs, fix_rounds, "fix loop state");
        state = match state {
            FixState::Done | FixState::Stopped => break,
            FixState::Run => {
                latest = Some(session.runner.execute(path)?);
                runs += 1;
                FixState::Inspect
            }
            FixState::Inspect => inspect(current(latest.as_ref())?),
            FixState::OfferFix => {
                let result = current(latest.as_ref())?;
                ui.notice(&format!(
                    "Exit with code {}, error message:\n{}",
                    result.completion_code,
                    result.error_text()
                ));
                if policy.rounds_exhausted(fix_rounds) {
                    ui.notice(&format!(
                        "Reached the limit of {fix_rounds} automatic fix rounds, stopping."
                    ));
                    FixState::Stopped
                } else {
                    offer_fix(ui.confirm(AUTO_FIX_PROMPT)?)
                }
            }
            FixState::Fixing => {
                let request = QueryRequest::FixBugs {
                    feature: feature.clone(),
                    error_text: current(latest.as_ref())?.error_text(),
                };
                fix_rounds += 1;
                proposal = Some(first_change(session.engine.submit(&request)?)?);
                FixState::ReviewFix
            }
            FixState::ReviewFix => {
                let fix = proposal
                    .as_ref()
                    .ok_or_else(|| anyhow!("no fix proposal to review"))?;
                ui.show_change(fix);
                let decision = if ui.confirm(APPLY_FIX_PROMPT)? {
                    ReviewDecision::Apply
                } else if ui.confirm(STOP_PROMPT)? {
                    ReviewDecision::Stop
                } else {
                    ReviewDecision::Undecided
                };
                if decision == ReviewDecision::Apply {
                    session.applier.apply(fix)?;
                    fixes_applied += 1;
                    ui.notice(RERUN_NOTICE);
                }
                review_fix(decision, policy)
            }
        };
    }

    info!(?state, runs, fix_rounds, fixes_applied, "fix loop finished");
    Ok(FixOutcome {
        final_state: state,
        trace,
        runs,
        fix_rounds,
        fixes_applied,
    })
}

fn current(latest: Option<&ExecutionResult>) -> Result<&ExecutionResult> {
    latest.ok_or_else(|| anyhow!("no execution result to inspect"))
}

/// Only the first proposed change of a fix is reviewed.
fn first_change(response: EngineResponse) -> Result<ProposedChange> {
    match response {
        EngineResponse::Changes(changes) => {
            if changes.len() > 1 {
                debug!(ignored = changes.len() - 1, "extra fix proposals ignored");
            }
            changes
                .into_iter()
                .next()
                .ok_or_else(|| BackendError::wrap(anyhow!("engine proposed an empty fix")))
        }
        EngineResponse::Answer(_) => Err(BackendError::wrap(anyhow!(
            "expected a file change for the fix, engine returned an answer"
        ))),
    }
}
