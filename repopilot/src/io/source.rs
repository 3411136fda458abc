//! Resolve a repository source (local path or git URL) to a local checkout.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use super::git::Git;

/// A repository available on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSource {
    /// What the user asked for (path or URL).
    pub origin: String,
    /// Local checkout root; every relative file path resolves against it.
    pub root: PathBuf,
    /// HEAD revision when the checkout is a git repository.
    pub revision: Option<String>,
}

/// Resolve `source` to a local checkout.
///
/// An existing directory is used in place. Anything else is cloned into
/// `sources_dir/<slug>`; an existing clone is reused and fast-forwarded.
pub fn resolve_source(source: &str, sources_dir: &Path) -> Result<LoadedSource> {
    let source = source.trim();
    if source.is_empty() {
        return Err(anyhow!("repository source must not be empty"));
    }

    let local = Path::new(source);
    if local.is_dir() {
        let root = local
            .canonicalize()
            .with_context(|| format!("canonicalize {}", local.display()))?;
        info!(root = %root.display(), "using local source");
        return Ok(LoadedSource {
            origin: source.to_string(),
            revision: revision_of(&root),
            root,
        });
    }

    fs::create_dir_all(sources_dir)
        .with_context(|| format!("create sources dir {}", sources_dir.display()))?;
    let dest = sources_dir.join(source_slug(source));
    if dest.join(".git").is_dir() {
        info!(dest = %dest.display(), "reusing existing clone");
        if let Err(err) = Git::new(&dest).pull_ff_only() {
            warn!(err = %err, "could not update existing clone, using it as is");
        }
    } else {
        if dest.exists() {
            return Err(anyhow!(
                "{} exists but is not a git checkout",
                dest.display()
            ));
        }
        Git::clone_shallow(source, &dest).with_context(|| format!("clone {source}"))?;
    }

    let root = dest
        .canonicalize()
        .with_context(|| format!("canonicalize {}", dest.display()))?;
    Ok(LoadedSource {
        origin: source.to_string(),
        revision: revision_of(&root),
        root,
    })
}

fn revision_of(root: &Path) -> Option<String> {
    if !root.join(".git").exists() {
        return None;
    }
    Git::new(root).head_short_sha(12).ok()
}

/// Directory name for a cloned source: non-alphanumerics collapse to `-`.
pub fn source_slug(source: &str) -> String {
    let trimmed = source
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .split("://")
        .last()
        .unwrap_or(source);
    let mut slug = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "source".to_string()
    } else {
        slug
    }
}
