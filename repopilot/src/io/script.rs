//! Runs a file from the checkout and captures how it ended.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::{info, instrument, warn};

use crate::core::types::ExecutionResult;
use crate::io::config::ScriptConfig;
use crate::io::paths::resolve_in_root;
use crate::io::process::run_with_timeout;

/// Abstraction over executing one file.
pub trait ScriptRunner {
    /// Run the file at `path` (relative to the checkout root).
    ///
    /// A non-zero exit is reported through [`ExecutionResult`]; `Err` means
    /// the file could not be launched at all.
    fn execute(&self, path: &str) -> Result<ExecutionResult>;
}

/// Runner that picks an interpreter from the file extension.
#[derive(Debug, Clone)]
pub struct InterpreterRunner {
    root: PathBuf,
    config: ScriptConfig,
}

impl InterpreterRunner {
    pub fn new(root: impl Into<PathBuf>, config: ScriptConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    fn command_for(&self, script: &Path) -> Result<Command> {
        let interpreter = script
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.config.interpreters.get(ext));
        let cmd = match interpreter {
            Some(argv) => {
                let Some((program, args)) = argv.split_first() else {
                    bail!("interpreter for {} is empty", script.display());
                };
                let mut cmd = Command::new(program);
                cmd.args(args).arg(script);
                cmd
            }
            None => Command::new(script),
        };
        Ok(cmd)
    }
}

impl ScriptRunner for InterpreterRunner {
    #[instrument(skip_all, fields(path = %path))]
    fn execute(&self, path: &str) -> Result<ExecutionResult> {
        let script = resolve_in_root(&self.root, path)?;
        if !script.is_file() {
            bail!("cannot run {path}: not a file in the checkout");
        }
        let mut cmd = self.command_for(&script)?;
        cmd.current_dir(&self.root);

        let output = run_with_timeout(
            cmd,
            None,
            self.config.timeout(),
            self.config.output_limit_bytes,
        )
        .with_context(|| format!("run {path}"))?;

        let mut error_output = output.stderr.clone();
        if output.stderr_truncated > 0 {
            error_output.extend_from_slice(
                format!("\n[stderr truncated {} bytes]\n", output.stderr_truncated).as_bytes(),
            );
        }
        if output.timed_out {
            warn!(timeout_secs = self.config.timeout_secs, "script timed out");
            error_output.extend_from_slice(
                format!("\n[script timed out after {}s]\n", self.config.timeout_secs).as_bytes(),
            );
        }

        let result = ExecutionResult::new(output.exit_code(), error_output);
        info!(
            completion_code = result.completion_code,
            stderr_bytes = result.error_output.len(),
            "script finished"
        );
        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;

    fn sh_config() -> ScriptConfig {
        ScriptConfig {
            interpreters: BTreeMap::from([("sh".to_string(), vec!["sh".to_string()])]),
            ..ScriptConfig::default()
        }
    }

    #[test]
    fn reports_success() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("ok.sh"), "echo fine\n").expect("write");
        let runner = InterpreterRunner::new(temp.path(), sh_config());

        let result = runner.execute("ok.sh").expect("execute");
        assert_eq!(result.completion_code, 0);
        assert!(!result.is_failure());
    }

    #[test]
    fn reports_failure_with_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("bad.sh"), "echo boom >&2\nexit 4\n").expect("write");
        let runner = InterpreterRunner::new(temp.path(), sh_config());

        let result = runner.execute("bad.sh").expect("execute");
        assert_eq!(result.completion_code, 4);
        assert_eq!(result.error_text(), "boom\n");
        assert!(result.is_failure());
    }

    #[test]
    fn runs_in_checkout_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("bin")).expect("dir");
        fs::write(temp.path().join("data.txt"), "x").expect("write");
        fs::write(
            temp.path().join("bin/check.sh"),
            "test -f data.txt || { echo missing >&2; exit 1; }\n",
        )
        .expect("write");
        let runner = InterpreterRunner::new(temp.path(), sh_config());

        assert!(!runner.execute("bin/check.sh").expect("execute").is_failure());
    }

    #[test]
    fn timeout_counts_as_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("slow.sh"), "exec sleep 5\n").expect("write");
        let config = ScriptConfig {
            timeout_secs: 1,
            ..sh_config()
        };
        let runner = InterpreterRunner::new(temp.path(), config);

        let result = runner.execute("slow.sh").expect("execute");
        assert_eq!(result.completion_code, -1);
        assert!(result.is_failure());
        assert!(result.error_text().contains("timed out after 1s"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = InterpreterRunner::new(temp.path(), sh_config());

        let err = runner.execute("nope.sh").unwrap_err();
        assert!(err.to_string().contains("not a file"));
    }
}
