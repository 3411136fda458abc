//! Scripted collaborators for driving sessions in tests.
//!
//! Each fake pops pre-queued answers and records what it was asked, so tests
//! can assert on the exact sequence of prompts, submissions, writes and runs.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use crate::core::types::{EngineResponse, ExecutionResult, ProposedChange, QueryRequest};
use crate::engine::{BackendError, KnowledgeEngine};
use crate::io::applier::ChangeApplier;
use crate::io::interaction::Interaction;
use crate::io::script::ScriptRunner;

/// Something the session showed or asked, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Input(String),
    Confirm(String, bool),
    Select(String),
    Answer(String),
    Change(ProposedChange),
    Notice(String),
}

/// Interaction with queued answers.
///
/// `select` returns `None` once its queue is empty, which ends the
/// top-level loop. Running out of inputs or confirmations is an error.
#[derive(Default)]
pub struct ScriptedInteraction {
    inputs: RefCell<VecDeque<String>>,
    confirms: RefCell<VecDeque<bool>>,
    selects: RefCell<VecDeque<usize>>,
    events: RefCell<Vec<UiEvent>>,
}

impl ScriptedInteraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inputs<S: Into<String>>(self, inputs: impl IntoIterator<Item = S>) -> Self {
        self.inputs
            .borrow_mut()
            .extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn with_confirms(self, confirms: impl IntoIterator<Item = bool>) -> Self {
        self.confirms.borrow_mut().extend(confirms);
        self
    }

    pub fn with_selects(self, selects: impl IntoIterator<Item = usize>) -> Self {
        self.selects.borrow_mut().extend(selects);
        self
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.borrow().clone()
    }

    /// Prompts of every confirmation asked, in order.
    pub fn confirm_prompts(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                UiEvent::Confirm(prompt, _) => Some(prompt.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                UiEvent::Notice(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn shown_changes(&self) -> Vec<ProposedChange> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                UiEvent::Change(change) => Some(change.clone()),
                _ => None,
            })
            .collect()
    }

    /// True when every queued input and confirmation was consumed.
    pub fn is_exhausted(&self) -> bool {
        self.inputs.borrow().is_empty() && self.confirms.borrow().is_empty()
    }
}

impl Interaction for ScriptedInteraction {
    fn input(&self, prompt: &str) -> Result<String> {
        self.events
            .borrow_mut()
            .push(UiEvent::Input(prompt.to_string()));
        self.inputs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted input for {prompt:?}"))
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        let answer = self
            .confirms
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted confirmation for {prompt:?}"))?;
        self.events
            .borrow_mut()
            .push(UiEvent::Confirm(prompt.to_string(), answer));
        Ok(answer)
    }

    fn select(&self, prompt: &str, _items: &[&str]) -> Result<Option<usize>> {
        self.events
            .borrow_mut()
            .push(UiEvent::Select(prompt.to_string()));
        Ok(self.selects.borrow_mut().pop_front())
    }

    fn show_answer(&self, answer: &str) {
        self.events
            .borrow_mut()
            .push(UiEvent::Answer(answer.to_string()));
    }

    fn show_change(&self, change: &ProposedChange) {
        self.events
            .borrow_mut()
            .push(UiEvent::Change(change.clone()));
    }

    fn notice(&self, message: &str) {
        self.events
            .borrow_mut()
            .push(UiEvent::Notice(message.to_string()));
    }
}

/// A call made on [`ScriptedEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    LoadSource(String),
    BuildIndex,
    Submit(QueryRequest),
}

/// Knowledge engine that replays queued responses.
///
/// A queued `Err(message)` is returned as a [`BackendError`].
pub struct ScriptedEngine {
    root: PathBuf,
    responses: RefCell<VecDeque<Result<EngineResponse, String>>>,
    calls: RefCell<Vec<EngineCall>>,
}

impl ScriptedEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            responses: RefCell::new(VecDeque::new()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn respond(self, response: EngineResponse) -> Self {
        self.responses.borrow_mut().push_back(Ok(response));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.responses
            .borrow_mut()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.borrow().clone()
    }

    /// Requests passed to `submit`, in order.
    pub fn submissions(&self) -> Vec<QueryRequest> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                EngineCall::Submit(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }
}

impl KnowledgeEngine for ScriptedEngine {
    fn load_source(&mut self, source: &str) -> Result<PathBuf> {
        self.calls
            .borrow_mut()
            .push(EngineCall::LoadSource(source.to_string()));
        Ok(self.root.clone())
    }

    fn build_index(&mut self) -> Result<()> {
        self.calls.borrow_mut().push(EngineCall::BuildIndex);
        Ok(())
    }

    fn submit(&self, request: &QueryRequest) -> Result<EngineResponse> {
        self.calls
            .borrow_mut()
            .push(EngineCall::Submit(request.clone()));
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(BackendError::wrap(anyhow!(message))),
            None => Err(anyhow!("no scripted engine response")),
        }
    }
}

/// Applier that records every change instead of writing it.
#[derive(Default)]
pub struct RecordingApplier {
    applied: RefCell<Vec<ProposedChange>>,
    fail: bool,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applier whose every call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn applied(&self) -> Vec<ProposedChange> {
        self.applied.borrow().clone()
    }
}

impl ChangeApplier for RecordingApplier {
    fn apply(&self, change: &ProposedChange) -> Result<()> {
        if self.fail {
            return Err(anyhow!("write {} failed: disk full", change.path));
        }
        self.applied.borrow_mut().push(change.clone());
        Ok(())
    }
}

/// Script runner that replays queued results.
#[derive(Default)]
pub struct ScriptedRunner {
    results: RefCell<VecDeque<ExecutionResult>>,
    runs: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(results: impl IntoIterator<Item = ExecutionResult>) -> Self {
        Self {
            results: RefCell::new(results.into_iter().collect()),
            runs: RefCell::new(Vec::new()),
        }
    }

    /// Paths passed to `execute`, in order.
    pub fn runs(&self) -> Vec<String> {
        self.runs.borrow().clone()
    }
}

impl ScriptRunner for ScriptedRunner {
    fn execute(&self, path: &str) -> Result<ExecutionResult> {
        self.runs.borrow_mut().push(path.to_string());
        self.results
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted execution result for {path}"))
    }
}

/// Successful run with no error output.
pub fn success() -> ExecutionResult {
    ExecutionResult::new(0, Vec::new())
}

/// Failed run with `stderr` as error output.
pub fn failure(code: i32, stderr: &str) -> ExecutionResult {
    ExecutionResult::new(code, stderr.as_bytes().to_vec())
}

/// Temporary checkout seeded with `(relative path, content)` files.
pub fn temp_checkout(files: &[(&str, &str)]) -> Result<tempfile::TempDir> {
    let dir = tempfile::tempdir().context("create temp checkout")?;
    for (path, content) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&full, content).with_context(|| format!("write {}", full.display()))?;
    }
    Ok(dir)
}
