//! Default knowledge engine: local BM25 retrieval plus a generation backend.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::index::RetrievalIndex;
use crate::core::types::{EngineResponse, ProposedChange, QueryRequest};
use crate::engine::{BackendError, KnowledgeEngine};
use crate::io::backend::{Backend, BackendRequest, execute_and_load_json};
use crate::io::config::{EngineConfig, IndexConfig};
use crate::io::documents::load_documents;
use crate::io::exchange_log::{ExchangeMeta, ExchangePaths, write_meta, write_prompt};
use crate::io::paths::{PilotPaths, normalize_relative, resolve_in_root};
use crate::io::prompt::{PromptBuilder, PromptInputs, RelatedDocument, TargetFile};
use crate::io::source::{LoadedSource, resolve_source};

const ANSWER_SCHEMA: &str = include_str!("../../schemas/answer.schema.json");
const CHANGES_SCHEMA: &str = include_str!("../../schemas/changes.schema.json");

#[derive(Debug, Deserialize)]
struct AnswerOutput {
    answer: String,
}

#[derive(Debug, Deserialize)]
struct ChangesOutput {
    changes: Vec<ProposedChange>,
}

/// Knowledge engine over one repository checkout.
pub struct RepoEngine<B: Backend> {
    backend: B,
    paths: PilotPaths,
    engine: EngineConfig,
    index_config: IndexConfig,
    session_id: String,
    source: Option<LoadedSource>,
    index: Option<RetrievalIndex>,
    exchanges: Cell<u32>,
}

impl<B: Backend> RepoEngine<B> {
    pub fn new(
        backend: B,
        paths: PilotPaths,
        engine: EngineConfig,
        index_config: IndexConfig,
    ) -> Self {
        Self {
            backend,
            paths,
            engine,
            index_config,
            session_id: format!("session-{}", Utc::now().format("%Y%m%d_%H%M%S_%3f")),
            source: None,
            index: None,
            exchanges: Cell::new(0),
        }
    }

    /// Override the generated session id (exchange directory name).
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn session_dir(&self) -> PathBuf {
        self.paths.session_dir(&self.session_id)
    }

    fn next_exchange(&self) -> u32 {
        let next = self.exchanges.get() + 1;
        self.exchanges.set(next);
        next
    }

    fn exchange(&self, request: &QueryRequest) -> Result<EngineResponse> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| anyhow!("no repository source loaded"))?;
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| anyhow!("retrieval index not built (call build_index first)"))?;

        let exchange = ExchangePaths::new(&self.session_dir(), self.next_exchange());
        exchange.create()?;

        let started_at = Utc::now();
        let started = Instant::now();
        let response = self.run_exchange(&exchange, request, source, index);

        let meta = ExchangeMeta {
            mode: request.mode(),
            query: request.query().to_string(),
            target_files: request.target_files().to_vec(),
            has_error_text: request.error_text().is_some(),
            changes: match &response {
                Ok(EngineResponse::Changes(changes)) => Some(changes.len()),
                _ => None,
            },
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            error: response.as_ref().err().map(|err| format!("{err:#}")),
        };
        write_meta(&exchange, &meta)?;
        debug!(dir = %exchange.dir.display(), "exchange logged");

        response
    }

    /// Everything between creating the exchange dir and logging its meta.
    fn run_exchange(
        &self,
        exchange: &ExchangePaths,
        request: &QueryRequest,
        source: &LoadedSource,
        index: &RetrievalIndex,
    ) -> Result<EngineResponse> {
        let targets = read_targets(&source.root, request.target_files())?;
        let related = related_documents(index, request, self.engine.related_documents);
        let inputs = PromptInputs {
            mode: request.mode(),
            query: request.query().to_string(),
            targets,
            error_text: request.error_text().map(str::to_string),
            repository: describe_source(source, index),
            related,
        };
        let prompt = PromptBuilder::new(self.engine.prompt_budget_bytes).build(&inputs)?;
        write_prompt(exchange, prompt.as_str())?;

        let (schema_name, schema_text) = if request.mode().produces_changes() {
            ("changes", CHANGES_SCHEMA)
        } else {
            ("answer", ANSWER_SCHEMA)
        };
        let schema_path = write_schema(&self.paths.schemas_dir, schema_name, schema_text)?;
        let schema: Value = serde_json::from_str(schema_text)
            .with_context(|| format!("parse {schema_name} schema"))?;

        let backend_request = BackendRequest {
            workdir: source.root.clone(),
            prompt: prompt.into_string(),
            output_schema_path: schema_path,
            output_path: exchange.output_path.clone(),
            log_path: exchange.backend_log_path.clone(),
            timeout: self.engine.timeout(),
            output_limit_bytes: self.engine.output_limit_bytes,
        };

        if request.mode().produces_changes() {
            let out: ChangesOutput =
                execute_and_load_json(&self.backend, &backend_request, &schema)?;
            if out.changes.is_empty() {
                return Err(anyhow!("backend proposed no changes"));
            }
            Ok(EngineResponse::Changes(out.changes))
        } else {
            let out: AnswerOutput =
                execute_and_load_json(&self.backend, &backend_request, &schema)?;
            Ok(EngineResponse::Answer(out.answer))
        }
    }
}

impl<B: Backend> KnowledgeEngine for RepoEngine<B> {
    #[instrument(skip_all, fields(source = %source))]
    fn load_source(&mut self, source: &str) -> Result<PathBuf> {
        let loaded = resolve_source(source, &self.paths.sources_dir)?;
        info!(root = %loaded.root.display(), revision = ?loaded.revision, "source loaded");
        let root = loaded.root.clone();
        self.source = Some(loaded);
        self.index = None;
        Ok(root)
    }

    #[instrument(skip_all)]
    fn build_index(&mut self) -> Result<()> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| anyhow!("build_index called before load_source"))?;
        let documents = load_documents(&source.root, &self.index_config)?;
        let index = RetrievalIndex::build(documents);
        info!(documents = index.len(), "index built");
        self.index = Some(index);
        Ok(())
    }

    #[instrument(skip_all, fields(mode = %request.mode()))]
    fn submit(&self, request: &QueryRequest) -> Result<EngineResponse> {
        self.exchange(request).map_err(BackendError::wrap)
    }
}

/// Read each target fresh so fix rounds see the changes applied so far.
fn read_targets(root: &Path, target_files: &[String]) -> Result<Vec<TargetFile>> {
    target_files
        .iter()
        .map(|path| {
            let full = resolve_in_root(root, path)?;
            let path = normalize_relative(path)?;
            if !full.is_file() {
                return Ok(TargetFile {
                    path,
                    exists: false,
                    content: String::new(),
                });
            }
            let bytes = fs::read(&full).with_context(|| format!("read target {}", full.display()))?;
            Ok(TargetFile {
                path,
                exists: true,
                content: String::from_utf8_lossy(&bytes).into_owned(),
            })
        })
        .collect()
}

fn related_documents(
    index: &RetrievalIndex,
    request: &QueryRequest,
    limit: usize,
) -> Vec<RelatedDocument> {
    if limit == 0 {
        return Vec::new();
    }
    let mut search_text = request.query().to_string();
    if let Some(error_text) = request.error_text() {
        search_text.push('\n');
        search_text.push_str(error_text);
    }
    let targets: Vec<String> = request
        .target_files()
        .iter()
        .filter_map(|target| normalize_relative(target).ok())
        .collect();
    index
        .search(&search_text, limit + targets.len())
        .into_iter()
        .filter(|hit| !targets.contains(&hit.document.path))
        .take(limit)
        .map(|hit| RelatedDocument {
            path: hit.document.path.clone(),
            content: hit.document.content.clone(),
        })
        .collect()
}

fn describe_source(source: &LoadedSource, index: &RetrievalIndex) -> String {
    let revision = source
        .revision
        .as_deref()
        .map(|rev| format!(" at revision {rev}"))
        .unwrap_or_default();
    format!(
        "Source `{}`{revision}, {} indexed files.",
        source.origin,
        index.len()
    )
}

fn write_schema(schemas_dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    fs::create_dir_all(schemas_dir)
        .with_context(|| format!("create schema dir {}", schemas_dir.display()))?;
    let path = schemas_dir.join(format!("{name}.schema.json"));
    fs::write(&path, contents).with_context(|| format!("write schema {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::core::types::FeatureRequest;
    use crate::engine::is_backend_error;

    /// Writes a fixed output (or nothing) and records the prompts it was given.
    struct CannedBackend {
        output: Option<Value>,
        prompts: RefCell<Vec<String>>,
    }

    impl CannedBackend {
        fn new(output: Value) -> Self {
            Self {
                output: Some(output),
                prompts: RefCell::new(Vec::new()),
            }
        }

        /// Exits cleanly without writing a final message.
        fn silent() -> Self {
            Self {
                output: None,
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl Backend for CannedBackend {
        fn exec(&self, request: &BackendRequest) -> Result<()> {
            assert!(request.output_schema_path.is_file());
            self.prompts.borrow_mut().push(request.prompt.clone());
            if let Some(output) = &self.output {
                fs::write(&request.output_path, serde_json::to_string(output)?)?;
            }
            Ok(())
        }
    }

    struct Fixture {
        _temp: tempfile::TempDir,
        repo: PathBuf,
        paths: PilotPaths,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = temp.path().join("repo");
        fs::create_dir_all(repo.join("pkg")).expect("repo");
        fs::write(repo.join("app.py"), "from pkg.greeting import greet\ngreet()\n").expect("write");
        fs::write(
            repo.join("pkg/greeting.py"),
            "def greet():\n    print('greeting hello')\n",
        )
        .expect("write");
        fs::write(repo.join("README.md"), "unrelated words only\n").expect("write");
        let paths = PilotPaths::new(temp.path().join(".pilot"));
        Fixture {
            _temp: temp,
            repo,
            paths,
        }
    }

    fn engine(fx: &Fixture, output: Value) -> RepoEngine<CannedBackend> {
        engine_with(fx, CannedBackend::new(output))
    }

    fn engine_with(fx: &Fixture, backend: CannedBackend) -> RepoEngine<CannedBackend> {
        RepoEngine::new(
            backend,
            fx.paths.clone(),
            EngineConfig::default(),
            IndexConfig::default(),
        )
        .with_session_id("s-test")
    }

    fn feature(targets: &[&str]) -> FeatureRequest {
        FeatureRequest::new(
            "change the greeting",
            targets.iter().map(|t| t.to_string()).collect(),
        )
        .expect("feature")
    }

    #[test]
    fn submit_before_build_index_is_a_backend_error() {
        let fx = fixture();
        let mut engine = engine(&fx, serde_json::json!({ "answer": "x" }));
        let request = QueryRequest::Understand {
            query: "what".to_string(),
        };

        let err = engine.submit(&request).unwrap_err();
        assert!(is_backend_error(&err));

        engine
            .load_source(fx.repo.to_str().expect("utf-8"))
            .expect("load");
        let err = engine.submit(&request).unwrap_err();
        assert!(is_backend_error(&err));
        assert!(format!("{err:#}").contains("build_index"));
    }

    #[test]
    fn build_index_requires_source() {
        let fx = fixture();
        let mut engine = engine(&fx, serde_json::json!({ "answer": "x" }));
        let err = engine.build_index().unwrap_err();
        assert!(err.to_string().contains("before load_source"));
    }

    #[test]
    fn understand_returns_answer_and_logs_exchange() {
        let fx = fixture();
        let mut engine = engine(&fx, serde_json::json!({ "answer": "It greets." }));
        let root = engine
            .load_source(fx.repo.to_str().expect("utf-8"))
            .expect("load");
        assert_eq!(root, fx.repo.canonicalize().expect("canonicalize"));
        engine.build_index().expect("index");

        let response = engine
            .submit(&QueryRequest::Understand {
                query: "what does greeting do".to_string(),
            })
            .expect("submit");
        assert_eq!(response, EngineResponse::Answer("It greets.".to_string()));

        let exchange = ExchangePaths::new(&engine.session_dir(), 1);
        assert!(exchange.prompt_path.is_file());
        assert!(exchange.output_path.is_file());
        let meta: Value =
            serde_json::from_str(&fs::read_to_string(&exchange.meta_path).expect("meta"))
                .expect("json");
        assert_eq!(meta["mode"], "understand");
        assert_eq!(meta["has_error_text"], false);
    }

    #[test]
    fn feature_prompt_reads_targets_and_excludes_them_from_related() {
        let fx = fixture();
        let mut engine = engine(
            &fx,
            serde_json::json!({ "changes": [{ "path": "app.py", "content": "print(1)\n" }] }),
        );
        engine
            .load_source(fx.repo.to_str().expect("utf-8"))
            .expect("load");
        engine.build_index().expect("index");

        let response = engine
            .submit(&QueryRequest::FeatureImplementation(feature(&[
                "app.py", "new.py",
            ])))
            .expect("submit");
        assert_eq!(
            response,
            EngineResponse::Changes(vec![ProposedChange::new("app.py", "print(1)\n")])
        );

        let prompts = engine.backend.prompts.borrow();
        let prompt = &prompts[0];
        assert!(prompt.contains("<file path=\"app.py\">\nfrom pkg.greeting import greet"));
        assert!(prompt.contains("(file does not exist yet)"));
        assert!(prompt.contains("### Related Files"));
        assert!(prompt.contains("<file path=\"pkg/greeting.py\">"));
        assert_eq!(prompt.matches("<file path=\"app.py\">").count(), 1);
    }

    #[test]
    fn targets_are_reread_on_every_submit() {
        let fx = fixture();
        let mut engine = engine(
            &fx,
            serde_json::json!({ "changes": [{ "path": "app.py", "content": "x" }] }),
        );
        engine
            .load_source(fx.repo.to_str().expect("utf-8"))
            .expect("load");
        engine.build_index().expect("index");
        let request = QueryRequest::FixBugs {
            feature: feature(&["app.py"]),
            error_text: "NameError".to_string(),
        };

        engine.submit(&request).expect("first");
        fs::write(fx.repo.join("app.py"), "patched_marker = 1\n").expect("write");
        engine.submit(&request).expect("second");

        let prompts = engine.backend.prompts.borrow();
        assert!(!prompts[0].contains("patched_marker"));
        assert!(prompts[1].contains("patched_marker"));
        assert!(prompts[1].contains("NameError"));
        assert!(ExchangePaths::new(&engine.session_dir(), 2).meta_path.is_file());
    }

    #[test]
    fn schema_violation_is_a_backend_error_and_is_logged() {
        let fx = fixture();
        let mut engine = engine(&fx, serde_json::json!({ "changes": [] }));
        engine
            .load_source(fx.repo.to_str().expect("utf-8"))
            .expect("load");
        engine.build_index().expect("index");

        let err = engine
            .submit(&QueryRequest::FeatureImplementation(feature(&["app.py"])))
            .unwrap_err();
        assert!(is_backend_error(&err));
        assert!(format!("{err:#}").contains("schema validation failed"));

        let meta: Value = serde_json::from_str(
            &fs::read_to_string(ExchangePaths::new(&engine.session_dir(), 1).meta_path)
                .expect("meta"),
        )
        .expect("json");
        assert!(meta["error"].is_string());
    }

    fn read_meta(engine: &RepoEngine<CannedBackend>, exchange: u32) -> Value {
        let path = ExchangePaths::new(&engine.session_dir(), exchange).meta_path;
        serde_json::from_str(&fs::read_to_string(path).expect("meta")).expect("json")
    }

    #[test]
    fn failures_before_the_backend_call_are_logged() {
        let fx = fixture();
        let mut engine = engine(
            &fx,
            serde_json::json!({ "changes": [{ "path": "app.py", "content": "x" }] }),
        );
        engine
            .load_source(fx.repo.to_str().expect("utf-8"))
            .expect("load");
        engine.build_index().expect("index");

        let err = engine
            .submit(&QueryRequest::FeatureImplementation(feature(&["../outside.py"])))
            .unwrap_err();
        assert!(is_backend_error(&err));
        assert!(engine.backend.prompts.borrow().is_empty());

        let meta = read_meta(&engine, 1);
        assert!(
            meta["error"]
                .as_str()
                .expect("error")
                .contains("escapes the checkout root")
        );
        assert_eq!(meta["target_files"][0], "../outside.py");
        assert!(meta["changes"].is_null());
    }

    #[test]
    fn silent_backend_never_sees_another_sessions_output() {
        let fx = fixture();
        let request = QueryRequest::FeatureImplementation(feature(&["app.py"]));
        let mut first = engine(
            &fx,
            serde_json::json!({ "changes": [{ "path": "app.py", "content": "STALE" }] }),
        );
        first
            .load_source(fx.repo.to_str().expect("utf-8"))
            .expect("load");
        first.build_index().expect("index");
        first.submit(&request).expect("first session");

        let mut reused = engine_with(&fx, CannedBackend::silent());
        reused
            .load_source(fx.repo.to_str().expect("utf-8"))
            .expect("load");
        reused.build_index().expect("index");
        let err = reused.submit(&request).unwrap_err();
        assert!(is_backend_error(&err));
        assert!(format!("{err:#}").contains("create exchange dir"));
        assert!(reused.backend.prompts.borrow().is_empty());

        let mut fresh = engine_with(&fx, CannedBackend::silent()).with_session_id("s-fresh");
        fresh
            .load_source(fx.repo.to_str().expect("utf-8"))
            .expect("load");
        fresh.build_index().expect("index");
        let err = fresh.submit(&request).unwrap_err();
        assert!(format!("{err:#}").contains("missing backend output"));
        assert!(read_meta(&fresh, 1)["error"].is_string());
    }

    #[test]
    fn default_session_ids_carry_milliseconds() {
        let fx = fixture();
        let engine = RepoEngine::new(
            CannedBackend::silent(),
            fx.paths.clone(),
            EngineConfig::default(),
            IndexConfig::default(),
        );
        let id = engine
            .session_dir()
            .file_name()
            .and_then(|name| name.to_str())
            .expect("session id")
            .to_string();
        // session-YYYYMMDD_HHMMSS_mmm
        assert!(id.starts_with("session-"));
        assert_eq!(id.len(), "session-".len() + 19);
    }

    #[test]
    fn differently_spelled_targets_are_excluded_from_related() {
        let fx = fixture();
        let mut engine = engine(
            &fx,
            serde_json::json!({ "changes": [{ "path": "app.py", "content": "x" }] }),
        );
        engine
            .load_source(fx.repo.to_str().expect("utf-8"))
            .expect("load");
        engine.build_index().expect("index");

        engine
            .submit(&QueryRequest::FeatureImplementation(feature(&[
                "./app.py",
                "pkg//greeting.py",
            ])))
            .expect("submit");

        let prompts = engine.backend.prompts.borrow();
        let prompt = &prompts[0];
        assert_eq!(prompt.matches("<file path=\"app.py\">").count(), 1);
        assert_eq!(prompt.matches("<file path=\"pkg/greeting.py\">").count(), 1);
        assert!(!prompt.contains("<file path=\"./app.py\">"));
    }
}
