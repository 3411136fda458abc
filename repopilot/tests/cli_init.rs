//! CLI tests for `repopilot init` and argument handling.
//!
//! Spawns the binary and verifies the state directory layout and exit codes.

use std::process::Command;

use repopilot::exit_codes;
use repopilot::io::config::{PilotConfig, load_config};
use repopilot::io::paths::PilotPaths;

fn repopilot() -> Command {
    Command::new(env!("CARGO_BIN_EXE_repopilot"))
}

#[test]
fn init_creates_state_dir_with_default_config() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = repopilot()
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("repopilot init");
    assert_eq!(status.code(), Some(exit_codes::OK));

    let paths = PilotPaths::new(temp.path().join(".pilot"));
    assert!(paths.sources_dir.is_dir());
    assert!(paths.schemas_dir.is_dir());
    assert!(paths.exchanges_dir.is_dir());
    assert_eq!(
        load_config(&paths.config_path).expect("load config"),
        PilotConfig::default()
    );
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    let state_dir = temp.path().join("state");

    let first = repopilot()
        .arg("--state-dir")
        .arg(&state_dir)
        .arg("init")
        .status()
        .expect("first init");
    assert_eq!(first.code(), Some(exit_codes::OK));

    let second = repopilot()
        .arg("--state-dir")
        .arg(&state_dir)
        .arg("init")
        .output()
        .expect("second init");
    assert_eq!(second.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&second.stderr).contains("--force"));

    let forced = repopilot()
        .arg("--state-dir")
        .arg(&state_dir)
        .args(["init", "--force"])
        .status()
        .expect("forced init");
    assert_eq!(forced.code(), Some(exit_codes::OK));
}

#[test]
fn session_rejects_invalid_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = PilotPaths::new(temp.path().join(".pilot"));
    std::fs::create_dir_all(&paths.state_dir).expect("state dir");
    std::fs::write(&paths.config_path, "[engine]\ntimeout_secs = 0\n").expect("config");

    let output = repopilot()
        .current_dir(temp.path())
        .args(["session", "--source", "."])
        .output()
        .expect("repopilot session");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("timeout_secs"));
}

#[test]
fn usage_errors_do_not_use_the_backend_exit_code() {
    let output = repopilot()
        .args(["session", "--max-fix-rounds", "0"])
        .output()
        .expect("repopilot session");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
}
