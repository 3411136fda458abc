//! Writes proposed changes into the checkout.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::types::ProposedChange;
use crate::io::paths::resolve_in_root;

/// Abstraction over applying one proposed change.
pub trait ChangeApplier {
    /// Replace the whole file at `change.path` with `change.content`.
    fn apply(&self, change: &ProposedChange) -> Result<()>;
}

/// Applier that writes under a checkout root.
#[derive(Debug, Clone)]
pub struct FsApplier {
    root: PathBuf,
}

impl FsApplier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ChangeApplier for FsApplier {
    #[instrument(skip_all, fields(path = %change.path))]
    fn apply(&self, change: &ProposedChange) -> Result<()> {
        let target = resolve_in_root(&self.root, &change.path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut tmp_name = target.as_os_str().to_owned();
        tmp_name.push(".pilot.tmp");
        let tmp_path = PathBuf::from(tmp_name);
        fs::write(&tmp_path, &change.content)
            .with_context(|| format!("write temp file {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &target)
            .with_context(|| format!("replace {}", target.display()))?;
        info!(bytes = change.content.len(), "change applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrites_existing_file_completely() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("app.py"), "old content that is longer\n").expect("seed");
        let applier = FsApplier::new(temp.path());

        applier
            .apply(&ProposedChange::new("app.py", "new\n"))
            .expect("apply");
        assert_eq!(
            fs::read_to_string(temp.path().join("app.py")).expect("read"),
            "new\n"
        );
        assert!(!temp.path().join("app.py.pilot.tmp").exists());
    }

    #[test]
    fn creates_missing_parent_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let applier = FsApplier::new(temp.path());

        applier
            .apply(&ProposedChange::new("pkg/sub/mod.py", "x = 1\n"))
            .expect("apply");
        assert!(temp.path().join("pkg/sub/mod.py").is_file());
    }

    #[test]
    fn refuses_paths_outside_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("repo");
        fs::create_dir_all(&root).expect("root");
        let applier = FsApplier::new(&root);

        let err = applier
            .apply(&ProposedChange::new("../escape.py", "x"))
            .unwrap_err();
        assert!(err.to_string().contains("escapes"));
        assert!(!temp.path().join("escape.py").exists());
    }
}
