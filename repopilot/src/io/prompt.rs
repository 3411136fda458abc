//! Prompt pack builder for knowledge engine submissions.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::types::Mode;

const UNDERSTAND_TEMPLATE: &str = include_str!("prompts/understand.md");
const IMPLEMENT_TEMPLATE: &str = include_str!("prompts/implement.md");
const FIX_BUGS_TEMPLATE: &str = include_str!("prompts/fix_bugs.md");

/// Sections dropped first when the prompt exceeds its budget.
const DROP_ORDER: [&str; 2] = ["related", "repository"];
const TRUNCATION_MARKER: &str = "\n[truncated]";

/// A file the request is allowed to change, read fresh from disk.
#[derive(Debug, Clone, Serialize)]
pub struct TargetFile {
    pub path: String,
    pub exists: bool,
    pub content: String,
}

/// Retrieved context that is not a target file.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedDocument {
    pub path: String,
    pub content: String,
}

/// All inputs needed to build a prompt pack.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    pub mode: Mode,
    pub query: String,
    /// Empty for `Mode::Understand`.
    pub targets: Vec<TargetFile>,
    /// Only set for `Mode::FixBugs`.
    pub error_text: Option<String>,
    /// One-paragraph description of the loaded source.
    pub repository: String,
    pub related: Vec<RelatedDocument>,
}

fn template_name(mode: Mode) -> &'static str {
    match mode {
        Mode::Understand => "understand",
        Mode::FeatureImplementation => "implement",
        Mode::FixBugs => "fix_bugs",
    }
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("understand", UNDERSTAND_TEMPLATE)
            .context("load understand template")?;
        env.add_template("implement", IMPLEMENT_TEMPLATE)
            .context("load implement template")?;
        env.add_template("fix_bugs", FIX_BUGS_TEMPLATE)
            .context("load fix_bugs template")?;
        Ok(Self { env })
    }

    fn render(&self, input: &PromptInputs) -> Result<String> {
        let name = template_name(input.mode);
        let template = self.env.get_template(name)?;
        let repository = input.repository.trim();
        let rendered = template
            .render(context! {
                query => input.query.trim(),
                targets => &input.targets,
                error_text => input.error_text.as_deref().map(str::trim),
                repository => (!repository.is_empty()).then_some(repository),
                related => &input.related,
            })
            .with_context(|| format!("render {name} template"))?;
        Ok(rendered)
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Parse sections from rendered template output using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    use std::sync::LazyLock;
    static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("valid section marker regex")
    });

    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str().to_string();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, body_start, key, required)) in markers.iter().enumerate() {
        let body_end = markers
            .get(i + 1)
            .map(|next| next.0)
            .unwrap_or(rendered.len());
        let content = rendered[*body_start..body_end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

/// Drop droppable sections in `DROP_ORDER`, then truncate the last section
/// if the pack is still over budget.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    let Some(last) = sections.last_mut() else {
        return;
    };
    if total <= budget {
        return;
    }
    let other_len = total - last.content.len();
    let allowed = budget.saturating_sub(other_len);
    let before_len = last.content.len();
    let keep = allowed.saturating_sub(TRUNCATION_MARKER.len());
    truncate_at_char_boundary(&mut last.content, keep);
    if allowed > TRUNCATION_MARKER.len() {
        last.content.push_str(TRUNCATION_MARKER);
    }
    debug!(
        section = last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn truncate_at_char_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

/// Builds a prompt pack within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, input: &PromptInputs) -> Result<PromptPack> {
        let rendered = PromptEngine::new()?.render(input)?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        let content = sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(PromptPack { content })
    }
}

/// A rendered prompt ready to send to the backend.
#[derive(Debug, Clone)]
pub struct PromptPack {
    content: String,
}

impl PromptPack {
    pub fn as_str(&self) -> &str {
        &self.content
    }

    pub fn into_string(self) -> String {
        self.content
    }
}
