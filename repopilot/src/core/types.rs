//! Shared value types for the session core.
//!
//! These types define the contract between the session controller and its
//! collaborators. They carry no I/O and are cheap to clone.

use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Kind of question being asked of the knowledge engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Understand,
    FeatureImplementation,
    FixBugs,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Understand => "understand",
            Mode::FeatureImplementation => "feature_implementation",
            Mode::FixBugs => "fix_bugs",
        }
    }

    /// True when the engine answers with file changes rather than prose.
    pub fn produces_changes(self) -> bool {
        !matches!(self, Mode::Understand)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query plus the files a change is allowed to touch.
///
/// Held constant for the whole feature session, including every fix round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureRequest {
    query: String,
    target_files: Vec<String>,
}

impl FeatureRequest {
    pub fn new(query: impl Into<String>, target_files: Vec<String>) -> Result<Self> {
        if target_files.is_empty() {
            return Err(anyhow!("feature request needs at least one target file"));
        }
        Ok(Self {
            query: query.into(),
            target_files,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn target_files(&self) -> &[String] {
        &self.target_files
    }
}

/// One submission to the knowledge engine. Each variant carries exactly the
/// fields meaningful for its mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryRequest {
    Understand {
        query: String,
    },
    FeatureImplementation(FeatureRequest),
    FixBugs {
        feature: FeatureRequest,
        error_text: String,
    },
}

impl QueryRequest {
    pub fn mode(&self) -> Mode {
        match self {
            QueryRequest::Understand { .. } => Mode::Understand,
            QueryRequest::FeatureImplementation(_) => Mode::FeatureImplementation,
            QueryRequest::FixBugs { .. } => Mode::FixBugs,
        }
    }

    pub fn query(&self) -> &str {
        match self {
            QueryRequest::Understand { query } => query,
            QueryRequest::FeatureImplementation(feature) => feature.query(),
            QueryRequest::FixBugs { feature, .. } => feature.query(),
        }
    }

    /// Target files, empty for `Understand`.
    pub fn target_files(&self) -> &[String] {
        match self {
            QueryRequest::Understand { .. } => &[],
            QueryRequest::FeatureImplementation(feature) => feature.target_files(),
            QueryRequest::FixBugs { feature, .. } => feature.target_files(),
        }
    }

    pub fn error_text(&self) -> Option<&str> {
        match self {
            QueryRequest::FixBugs { error_text, .. } => Some(error_text),
            _ => None,
        }
    }
}

/// Candidate full replacement of one file's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedChange {
    pub path: String,
    pub content: String,
}

impl ProposedChange {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// What the knowledge engine returns for a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineResponse {
    /// Natural-language answer (`Understand`).
    Answer(String),
    /// Ordered per-file proposals (`FeatureImplementation`, `FixBugs`).
    Changes(Vec<ProposedChange>),
}

/// Outcome of running one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub completion_code: i32,
    pub error_output: Vec<u8>,
}

impl ExecutionResult {
    pub fn new(completion_code: i32, error_output: impl Into<Vec<u8>>) -> Self {
        Self {
            completion_code,
            error_output: error_output.into(),
        }
    }

    /// A run only counts as failed when it exits non-zero AND wrote to stderr.
    ///
    /// A non-zero exit with empty stderr is treated exactly like success.
    pub fn is_failure(&self) -> bool {
        self.completion_code != 0 && !self.error_output.is_empty()
    }

    pub fn error_text(&self) -> String {
        String::from_utf8_lossy(&self.error_output).into_owned()
    }
}

/// Split a comma-separated path list, trimming entries and dropping blanks.
pub fn parse_target_files(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
