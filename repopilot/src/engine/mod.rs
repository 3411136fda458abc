//! Knowledge engine seam: retrieval plus generation over one repository.

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

use anyhow::Result;

use crate::core::types::{EngineResponse, QueryRequest};

pub mod repo;

/// Abstraction over the code-intelligence backend.
///
/// `load_source` and `build_index` run once, in that order, before the first
/// `submit`.
pub trait KnowledgeEngine {
    /// Make `source` (local path or git URL) available and return its
    /// local checkout root.
    fn load_source(&mut self, source: &str) -> Result<PathBuf>;

    /// Build the retrieval index over the loaded source.
    fn build_index(&mut self) -> Result<()>;

    /// Answer a question or propose file changes. Failures carry a
    /// [`BackendError`].
    fn submit(&self, request: &QueryRequest) -> Result<EngineResponse>;
}

/// Marks a failure inside the knowledge engine.
///
/// The binary maps it to its own exit code.
#[derive(Debug)]
pub struct BackendError {
    source: anyhow::Error,
}

impl BackendError {
    pub fn wrap(source: anyhow::Error) -> anyhow::Error {
        anyhow::Error::new(Self { source })
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("knowledge engine failed")
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&*self.source)
    }
}

/// True when any error in the chain came from the knowledge engine.
pub fn is_backend_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<BackendError>())
}
