//! Layout of the pilot state directory and `repopilot init` scaffolding.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::debug;

use super::config::{PilotConfig, write_config};

/// Default state directory name, relative to the working directory.
pub const DEFAULT_STATE_DIR: &str = ".pilot";

/// All canonical paths within the state directory.
#[derive(Debug, Clone)]
pub struct PilotPaths {
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub sources_dir: PathBuf,
    pub schemas_dir: PathBuf,
    pub exchanges_dir: PathBuf,
}

impl PilotPaths {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self {
            config_path: state_dir.join("config.toml"),
            sources_dir: state_dir.join("sources"),
            schemas_dir: state_dir.join("schemas"),
            exchanges_dir: state_dir.join("exchanges"),
            state_dir,
        }
    }

    /// Directory holding the exchanges of one interactive session.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.exchanges_dir.join(session_id)
    }
}

/// Options for `init_state_dir`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config with defaults.
    pub force: bool,
}

/// Create the state directory and write the default config.
///
/// Fails if a config already exists unless `options.force` is set.
pub fn init_state_dir(state_dir: &Path, options: &InitOptions) -> Result<PilotPaths> {
    let paths = PilotPaths::new(state_dir);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!(
            "init: {} exists but is not a directory",
            paths.state_dir.display()
        ));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    for dir in [
        &paths.state_dir,
        &paths.sources_dir,
        &paths.schemas_dir,
        &paths.exchanges_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }
    write_config(&paths.config_path, &PilotConfig::default())?;
    debug!(state_dir = %paths.state_dir.display(), "state directory initialized");
    Ok(paths)
}

/// Join a repository-relative `path` onto `root`.
///
/// Rejects empty, absolute and `..` paths so nothing outside the checkout
/// can be written or executed.
pub fn resolve_in_root(root: &Path, path: &str) -> Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    resolved.extend(normal_parts(path)?);
    Ok(resolved)
}

/// `/`-joined form of a repository-relative path, as used for indexed
/// document paths. `./src//app.py` becomes `src/app.py`.
pub fn normalize_relative(path: &str) -> Result<String> {
    Ok(normal_parts(path)?.join("/"))
}

fn normal_parts(path: &str) -> Result<Vec<String>> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        bail!("path must not be empty");
    }
    let mut parts = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => bail!("path escapes the checkout root: {trimmed}"),
            Component::RootDir | Component::Prefix(_) => {
                bail!("path must be relative to the checkout root: {trimmed}")
            }
        }
    }
    if parts.is_empty() {
        bail!("path names the checkout root itself: {trimmed}");
    }
    Ok(parts)
}
