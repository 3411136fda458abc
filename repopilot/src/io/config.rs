//! Pilot configuration stored under `.pilot/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::fix_loop::{FixPolicy, UndecidedPolicy};

/// Pilot configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PilotConfig {
    pub engine: EngineConfig,
    pub index: IndexConfig,
    pub script: ScriptConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Generation command. The runner appends `--output-schema`,
    /// `--output-last-message` and `-` (prompt on stdin).
    pub command: Vec<String>,

    /// Wall-clock limit for one generation call.
    pub timeout_secs: u64,

    /// Truncate backend stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Maximum prompt size before droppable sections are removed.
    pub prompt_budget_bytes: usize,

    /// How many retrieved documents to include as related context.
    pub related_documents: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: ["codex", "exec", "--skip-git-repo-check", "--sandbox", "read-only"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 200_000,
            prompt_budget_bytes: 60_000,
            related_documents: 4,
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    /// Files larger than this are left out of the document store.
    pub max_file_bytes: u64,

    /// Directory names skipped at any depth.
    pub ignore_dirs: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 200_000,
            ignore_dirs: [
                ".git",
                "target",
                "node_modules",
                ".pilot",
                "__pycache__",
                ".venv",
                "dist",
                "build",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScriptConfig {
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,

    /// Interpreter command per file extension (without the dot).
    /// Files with an unmapped extension are executed directly.
    pub interpreters: BTreeMap<String, Vec<String>>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        let interpreters = [("py", "python3"), ("sh", "sh"), ("js", "node"), ("rb", "ruby")]
            .into_iter()
            .map(|(ext, program)| (ext.to_string(), vec![program.to_string()]))
            .collect();
        Self {
            timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
            interpreters,
        }
    }
}

impl ScriptConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SessionConfig {
    /// Behavior when a fix is neither applied nor the loop stopped.
    pub on_undecided: UndecidedPolicy,

    /// Optional cap on auto-fix rounds per executed file. Unset = unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fix_rounds: Option<u32>,
}

impl SessionConfig {
    pub fn fix_policy(&self) -> FixPolicy {
        FixPolicy {
            on_undecided: self.on_undecided,
            max_fix_rounds: self.max_fix_rounds,
        }
    }
}

impl PilotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.engine.command.is_empty() || self.engine.command[0].trim().is_empty() {
            return Err(anyhow!("engine.command must be a non-empty array"));
        }
        if self.engine.timeout_secs == 0 {
            return Err(anyhow!("engine.timeout_secs must be > 0"));
        }
        if self.engine.output_limit_bytes == 0 {
            return Err(anyhow!("engine.output_limit_bytes must be > 0"));
        }
        if self.engine.prompt_budget_bytes == 0 {
            return Err(anyhow!("engine.prompt_budget_bytes must be > 0"));
        }
        if self.index.max_file_bytes == 0 {
            return Err(anyhow!("index.max_file_bytes must be > 0"));
        }
        if self.script.timeout_secs == 0 {
            return Err(anyhow!("script.timeout_secs must be > 0"));
        }
        if self.script.output_limit_bytes == 0 {
            return Err(anyhow!("script.output_limit_bytes must be > 0"));
        }
        for (ext, command) in &self.script.interpreters {
            if command.is_empty() || command[0].trim().is_empty() {
                return Err(anyhow!(
                    "script.interpreters.{ext} must be a non-empty array"
                ));
            }
        }
        if self.session.max_fix_rounds == Some(0) {
            return Err(anyhow!("session.max_fix_rounds must be > 0 when set"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PilotConfig::default()`.
pub fn load_config(path: &Path) -> Result<PilotConfig> {
    if !path.exists() {
        let cfg = PilotConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PilotConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PilotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
