//! Load repository files into memory for indexing.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::core::index::Document;
use crate::io::config::IndexConfig;

/// Walk `root` and collect every text file worth indexing, sorted by path.
///
/// Skips ignored directories, oversized files and files that are not UTF-8.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn load_documents(root: &Path, config: &IndexConfig) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    let mut skipped = 0usize;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_ignored_dir(entry, config));

    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry
            .metadata()
            .with_context(|| format!("stat {}", entry.path().display()))?
            .len();
        if size > config.max_file_bytes {
            skipped += 1;
            continue;
        }
        let Ok(content) = fs::read_to_string(entry.path()) else {
            skipped += 1;
            continue;
        };
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        documents.push(Document {
            path: relative_path_string(relative),
            content,
        });
    }

    documents.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(documents = documents.len(), skipped, "documents loaded");
    Ok(documents)
}

fn is_ignored_dir(entry: &DirEntry, config: &IndexConfig) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| config.ignore_dirs.iter().any(|ignored| ignored == name))
}

fn relative_path_string(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
