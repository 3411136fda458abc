//! Full stack run: real engine, applier and script runner with a canned
//! generation backend.

#![cfg(unix)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use repopilot::core::fix_loop::{FixPolicy, FixState};
use repopilot::engine::repo::RepoEngine;
use repopilot::io::applier::FsApplier;
use repopilot::io::backend::{Backend, BackendRequest};
use repopilot::io::config::{EngineConfig, IndexConfig, ScriptConfig};
use repopilot::io::paths::PilotPaths;
use repopilot::io::script::InterpreterRunner;
use repopilot::looping::run_top_level;
use repopilot::test_support::{ScriptedInteraction, temp_checkout};

/// Replays queued final messages.
struct QueuedBackend {
    outputs: RefCell<VecDeque<Value>>,
}

impl Backend for QueuedBackend {
    fn exec(&self, request: &BackendRequest) -> Result<()> {
        let output = self
            .outputs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no queued backend output"))?;
        fs::write(&request.output_path, serde_json::to_string(&output)?)?;
        Ok(())
    }
}

#[test]
fn failing_script_is_fixed_through_the_real_stack() {
    let checkout = temp_checkout(&[
        ("run.sh", "echo starting\n"),
        ("lib/greeting.sh", "greeting() { echo hello; }\n"),
    ])
    .expect("checkout");
    let state = tempfile::tempdir().expect("state dir");
    let paths = PilotPaths::new(state.path().join(".pilot"));

    let backend = QueuedBackend {
        outputs: RefCell::new(VecDeque::from([
            json!({ "changes": [{ "path": "run.sh", "content": "greeting\n" }] }),
            json!({
                "changes": [{ "path": "run.sh", "content": ". ./lib/greeting.sh\ngreeting\n" }]
            }),
        ])),
    };
    let mut engine = RepoEngine::new(
        backend,
        paths.clone(),
        EngineConfig::default(),
        IndexConfig::default(),
    )
    .with_session_id("e2e");
    let ui = ScriptedInteraction::new()
        .with_inputs(["print a greeting", "run.sh"])
        .with_confirms([true, true, true, true])
        .with_selects([1]);
    let source = checkout.path().to_str().expect("utf-8 path").to_string();

    let summary = run_top_level(
        &mut engine,
        &ui,
        Some(&source),
        FixPolicy::default(),
        |root| {
            (
                FsApplier::new(root),
                InterpreterRunner::new(root, ScriptConfig::default()),
            )
        },
    )
    .expect("loop");

    let fix = summary.features[0].changes[0]
        .fix
        .clone()
        .expect("fix loop ran");
    assert_eq!(fix.final_state, FixState::Done);
    assert_eq!((fix.runs, fix.fix_rounds, fix.fixes_applied), (2, 1, 1));
    assert_eq!(
        fs::read_to_string(checkout.path().join("run.sh")).expect("read"),
        ". ./lib/greeting.sh\ngreeting\n"
    );

    let session_dir = paths.session_dir("e2e");
    for exchange in ["1", "2"] {
        for artifact in ["prompt.md", "output.json", "meta.json"] {
            assert!(
                session_dir.join(exchange).join(artifact).is_file(),
                "missing {exchange}/{artifact}"
            );
        }
    }
    assert!(paths.schemas_dir.join("changes.schema.json").is_file());

    let prompts = logged_prompts(&session_dir);
    assert!(prompts[1].contains("### Error Output"));
    assert!(prompts[1].contains("greeting"));
    assert!(prompts[1].contains("not found"));
}

fn logged_prompts(session_dir: &Path) -> Vec<String> {
    ["1", "2"]
        .iter()
        .map(|n| fs::read_to_string(session_dir.join(n).join("prompt.md")).expect("prompt"))
        .collect()
}
