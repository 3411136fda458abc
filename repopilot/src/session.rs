//! Session controller: the understanding and feature-implementation flows.

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::fix_loop::{FixOutcome, FixPolicy};
use crate::core::types::{EngineResponse, FeatureRequest, QueryRequest, parse_target_files};
use crate::engine::{BackendError, KnowledgeEngine};
use crate::fix::run_fix_loop;
use crate::io::applier::ChangeApplier;
use crate::io::interaction::Interaction;
use crate::io::script::ScriptRunner;

pub const QUERY_PROMPT: &str = "Please enter your query";
pub const FEATURE_PROMPT: &str = "Please enter your feature requirement";
pub const TARGETS_PROMPT: &str = "Please enter the path of target files (separated by comma)";
pub const APPLY_CHANGE_PROMPT: &str = "Do you want to apply the change to the file?";
pub const RUN_SCRIPT_PROMPT: &str = "Do you want to run the script?";

/// Collaborators shared by every flow of one interactive session.
pub struct Session<'a, E: ?Sized, A: ?Sized, R: ?Sized, I: ?Sized> {
    pub engine: &'a E,
    pub applier: &'a A,
    pub runner: &'a R,
    pub ui: &'a I,
    pub policy: FixPolicy,
}

/// What happened to one proposed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeOutcome {
    pub path: String,
    pub applied: bool,
    /// Set when the user chose to run the file.
    pub fix: Option<FixOutcome>,
}

/// Result of one feature-implementation session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeatureOutcome {
    /// One entry per proposed change, in engine order. Empty when nothing
    /// was submitted.
    pub changes: Vec<ChangeOutcome>,
}

impl<E, A, R, I> Session<'_, E, A, R, I>
where
    E: KnowledgeEngine + ?Sized,
    A: ChangeApplier + ?Sized,
    R: ScriptRunner + ?Sized,
    I: Interaction + ?Sized,
{
    /// Ask one question and show the answer verbatim. Touches no files.
    #[instrument(skip_all)]
    pub fn understand(&self) -> Result<()> {
        let query = self.ui.input(QUERY_PROMPT)?;
        let response = self.engine.submit(&QueryRequest::Understand { query })?;
        match response {
            EngineResponse::Answer(answer) => {
                self.ui.show_answer(&answer);
                Ok(())
            }
            EngineResponse::Changes(changes) => Err(BackendError::wrap(anyhow!(
                "expected an answer, engine proposed {} file changes",
                changes.len()
            ))),
        }
    }

    /// Propose changes for a feature, then walk each one through review,
    /// optional apply, optional run and the auto-fix loop.
    #[instrument(skip_all)]
    pub fn implement(&self) -> Result<FeatureOutcome> {
        let query = self.ui.input(FEATURE_PROMPT)?;
        let targets = parse_target_files(&self.ui.input(TARGETS_PROMPT)?);
        if targets.is_empty() {
            self.ui.notice("No target files given, nothing was submitted.");
            return Ok(FeatureOutcome::default());
        }
        let feature = FeatureRequest::new(query, targets)?;

        let response = self
            .engine
            .submit(&QueryRequest::FeatureImplementation(feature.clone()))?;
        let changes = match response {
            EngineResponse::Changes(changes) => changes,
            EngineResponse::Answer(_) => {
                return Err(BackendError::wrap(anyhow!(
                    "expected file changes, engine returned an answer"
                )));
            }
        };
        info!(changes = changes.len(), "engine proposed changes");

        let mut outcome = FeatureOutcome::default();
        for change in &changes {
            self.ui.show_change(change);
            let applied = self.ui.confirm(APPLY_CHANGE_PROMPT)?;
            if applied {
                self.applier.apply(change)?;
            }
            let fix = if self.ui.confirm(RUN_SCRIPT_PROMPT)? {
                Some(run_fix_loop(self, &feature, &change.path)?)
            } else {
                None
            };
            debug!(path = %change.path, applied, ran = fix.is_some(), "change processed");
            outcome.changes.push(ChangeOutcome {
                path: change.path.clone(),
                applied,
                fix,
            });
        }
        Ok(outcome)
    }
}
