//! Generation backend abstraction.
//!
//! The [`Backend`] trait decouples the knowledge engine from the actual
//! generation process (by default `codex exec`). Tests use scripted backends
//! that write predetermined outputs without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CapturedOutput, run_with_timeout};

/// Parameters for one backend invocation.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    /// Working directory for the backend process (the checkout root).
    pub workdir: PathBuf,
    /// Prompt text fed on stdin.
    pub prompt: String,
    /// Path to the JSON Schema that constrains the final message.
    pub output_schema_path: PathBuf,
    /// Path where the backend must write its final JSON message.
    pub output_path: PathBuf,
    /// Path to write backend stdout/stderr log.
    pub log_path: PathBuf,
    /// Maximum time to wait for the backend to complete.
    pub timeout: Duration,
    /// Truncate backend output logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Abstraction over generation backends.
pub trait Backend {
    /// Run the backend. Must write its final JSON message to `request.output_path`.
    fn exec(&self, request: &BackendRequest) -> Result<()>;
}

/// Backend that spawns a codex-compatible CLI.
#[derive(Debug, Clone)]
pub struct CodexBackend {
    command: Vec<String>,
}

impl CodexBackend {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Backend for CodexBackend {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn exec(&self, request: &BackendRequest) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("backend command is empty"))?;
        info!(program = %program, workdir = %request.workdir.display(), "starting backend");

        if !request.output_schema_path.exists() {
            bail!(
                "missing output schema {}",
                request.output_schema_path.display()
            );
        }
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--output-schema")
            .arg(&request.output_schema_path)
            .arg("--output-last-message")
            .arg(&request.output_path)
            .arg("-")
            .current_dir(&request.workdir);

        let output = run_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .with_context(|| format!("run {program}"))?;

        write_backend_log(&request.log_path, &output, request.output_limit_bytes)?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "backend timed out");
            bail!("{program} timed out after {:?}", request.timeout);
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "backend failed");
            bail!(
                "{program} failed with status {:?} (see {})",
                output.status.code(),
                request.log_path.display()
            );
        }

        debug!("backend completed successfully");
        Ok(())
    }
}

/// Run the backend, then load its output as `T` after validating it
/// against `schema`.
#[instrument(skip_all, fields(output_path = %request.output_path.display()))]
pub fn execute_and_load_json<B: Backend + ?Sized, T: DeserializeOwned>(
    backend: &B,
    request: &BackendRequest,
    schema: &Value,
) -> Result<T> {
    remove_stale_output(&request.output_path)?;
    backend.exec(request)?;
    if !request.output_path.exists() {
        bail!("missing backend output {}", request.output_path.display());
    }
    let contents = fs::read_to_string(&request.output_path)
        .with_context(|| format!("read backend output {}", request.output_path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse {}", request.output_path.display()))?;
    validate_schema(&value, schema)?;
    serde_json::from_value(value)
        .with_context(|| format!("decode {}", request.output_path.display()))
}

fn remove_stale_output(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            warn!(path = %path.display(), "removed stale backend output");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("remove stale backend output {}", path.display()))
        }
    }
}

/// Validate a JSON instance against a JSON Schema (Draft 2020-12).
pub fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

fn write_backend_log(path: &Path, output: &CapturedOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create backend log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.truncated_notice("backend"));
    if output.timed_out {
        buf.push_str("\n[backend timed out]\n");
    }

    if buf.len() > output_limit {
        let mut cut = output_limit;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        let dropped = buf.len() - cut;
        buf.truncate(cut);
        buf.push_str(&format!("\n[truncated {dropped} bytes]\n"));
    }

    fs::write(path, buf).with_context(|| format!("write backend log {}", path.display()))
}
