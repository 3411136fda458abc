//! Top-level interactive loop for `repopilot session`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};

use crate::core::fix_loop::FixPolicy;
use crate::engine::KnowledgeEngine;
use crate::io::applier::ChangeApplier;
use crate::io::interaction::Interaction;
use crate::io::script::ScriptRunner;
use crate::session::{FeatureOutcome, Session};

pub const SOURCE_PROMPT: &str = "Please provide the repo url";
pub const SESSION_TYPE_PROMPT: &str = "Select the type of query";
pub const SESSION_TYPES: [&str; 2] = ["understand_codebase", "feature_implementation"];

/// Summary of a finished top-level loop.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoopSummary {
    /// Sessions dispatched, of either type.
    pub sessions: u32,
    /// Outcomes of the feature-implementation sessions, in order.
    pub features: Vec<FeatureOutcome>,
}

/// Load and index the source once, then dispatch sessions until the user
/// closes the selector.
///
/// `bind` receives the local checkout root and builds the applier and runner
/// that operate on it. Any session error ends the loop.
#[instrument(skip_all)]
pub fn run_top_level<E, I, A, R, F>(
    engine: &mut E,
    ui: &I,
    source: Option<&str>,
    policy: FixPolicy,
    bind: F,
) -> Result<LoopSummary>
where
    E: KnowledgeEngine + ?Sized,
    I: Interaction + ?Sized,
    A: ChangeApplier,
    R: ScriptRunner,
    F: FnOnce(&Path) -> (A, R),
{
    let source = match source {
        Some(source) => source.to_string(),
        None => ui.input(SOURCE_PROMPT)?,
    };
    let root = engine
        .load_source(&source)
        .with_context(|| format!("load source {source}"))?;
    engine.build_index().context("build retrieval index")?;
    info!(root = %root.display(), "engine ready");

    let (applier, runner) = bind(&root);
    let session = Session {
        engine: &*engine,
        applier: &applier,
        runner: &runner,
        ui,
        policy,
    };

    let mut summary = LoopSummary::default();
    while let Some(choice) = ui.select(SESSION_TYPE_PROMPT, &SESSION_TYPES)? {
        debug!(choice, "session type selected");
        match choice {
            0 => session
                .understand()
                .context("understand_codebase session")?,
            1 => {
                let outcome = session
                    .implement()
                    .context("feature_implementation session")?;
                summary.features.push(outcome);
            }
            other => bail!("unknown session type index {other}"),
        }
        summary.sessions += 1;
    }

    info!(sessions = summary.sessions, "interaction closed");
    Ok(summary)
}
