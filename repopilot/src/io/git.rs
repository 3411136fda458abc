//! Git adapter for fetching repository sources.
//!
//! A small, explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Shallow-clone `url` into `dest` and return a handle on the clone.
    #[instrument(skip_all, fields(url = %url, dest = %dest.display()))]
    pub fn clone_shallow(url: &str, dest: &Path) -> Result<Self> {
        let parent = dest
            .parent()
            .ok_or_else(|| anyhow!("clone destination has no parent: {}", dest.display()))?;
        let dest_str = dest
            .to_str()
            .ok_or_else(|| anyhow!("clone destination is not utf-8: {}", dest.display()))?;
        debug!("cloning source");
        Self::new(parent).run_checked(&["clone", "--depth", "1", url, dest_str])?;
        Ok(Self::new(dest))
    }

    /// Fast-forward the current branch from its upstream.
    #[instrument(skip_all)]
    pub fn pull_ff_only(&self) -> Result<()> {
        self.run_checked(&["pull", "--ff-only"])?;
        Ok(())
    }

    /// Return the current HEAD short SHA.
    pub fn head_short_sha(&self, len: usize) -> Result<String> {
        let arg = format!("--short={len}");
        let out = self.run_capture(&["rev-parse", &arg, "HEAD"])?;
        Ok(out.trim().to_string())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}
