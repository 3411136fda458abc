//! Exchange logging helpers for `.pilot/exchanges/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::types::Mode;

#[derive(Debug, Clone, Serialize)]
pub struct ExchangeMeta {
    pub mode: Mode,
    pub query: String,
    pub target_files: Vec<String>,
    pub has_error_text: bool,
    /// Number of proposed changes; `None` for answers and failed exchanges.
    pub changes: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Set when the exchange failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExchangePaths {
    pub dir: PathBuf,
    pub prompt_path: PathBuf,
    pub output_path: PathBuf,
    pub backend_log_path: PathBuf,
    pub meta_path: PathBuf,
}

impl ExchangePaths {
    /// `session_dir` is `.pilot/exchanges/<session-id>`.
    pub fn new(session_dir: &Path, exchange: u32) -> Self {
        let dir = session_dir.join(exchange.to_string());
        Self {
            prompt_path: dir.join("prompt.md"),
            output_path: dir.join("output.json"),
            backend_log_path: dir.join("backend.log"),
            meta_path: dir.join("meta.json"),
            dir,
        }
    }

    /// Create the exchange directory. Fails if it already exists so one
    /// exchange never reads another's artifacts.
    pub fn create(&self) -> Result<()> {
        if let Some(session_dir) = self.dir.parent() {
            fs::create_dir_all(session_dir)
                .with_context(|| format!("create session dir {}", session_dir.display()))?;
        }
        fs::create_dir(&self.dir)
            .with_context(|| format!("create exchange dir {}", self.dir.display()))
    }
}

pub fn write_prompt(paths: &ExchangePaths, prompt: &str) -> Result<()> {
    write_text(&paths.prompt_path, prompt)
}

pub fn write_meta(paths: &ExchangePaths, meta: &ExchangeMeta) -> Result<()> {
    write_json(&paths.meta_path, meta)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn exchange_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ExchangePaths::new(&temp.path().join("exchanges/s-1"), 3);

        assert!(paths.dir.ends_with(Path::new("exchanges/s-1/3")));
        assert!(paths.prompt_path.ends_with("prompt.md"));
        assert!(paths.output_path.ends_with("output.json"));
        assert!(paths.backend_log_path.ends_with("backend.log"));
        assert!(paths.meta_path.ends_with("meta.json"));
    }

    #[test]
    fn create_refuses_an_existing_exchange_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ExchangePaths::new(&temp.path().join("exchanges/s-1"), 1);

        paths.create().expect("first create");
        let err = paths.create().unwrap_err();
        assert!(err.to_string().contains("create exchange dir"));
    }

    #[test]
    fn writes_prompt_and_meta() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ExchangePaths::new(temp.path(), 1);
        paths.create().expect("create");

        write_prompt(&paths, "prompt body").expect("prompt");
        write_meta(
            &paths,
            &ExchangeMeta {
                mode: Mode::FixBugs,
                query: "add logging".to_string(),
                target_files: vec!["app.py".to_string()],
                has_error_text: true,
                changes: Some(1),
                started_at: Utc::now(),
                duration_ms: 12,
                error: None,
            },
        )
        .expect("meta");

        assert_eq!(
            fs::read_to_string(&paths.prompt_path).expect("read"),
            "prompt body"
        );
        let meta: Value =
            serde_json::from_str(&fs::read_to_string(&paths.meta_path).expect("read"))
                .expect("json");
        assert_eq!(meta["mode"], "fix_bugs");
        assert_eq!(meta["target_files"][0], "app.py");
        assert_eq!(meta["has_error_text"], true);
        assert_eq!(meta["changes"], 1);
        assert!(meta.get("error").is_none());
    }
}
