//! User-facing prompts and output.
//!
//! The session controller only talks to the user through [`Interaction`], so
//! tests drive it with scripted answers instead of a terminal.

use std::path::Path;

use anyhow::{Context, Result};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Select};

use crate::core::types::ProposedChange;

/// Abstraction over the interactive surface.
pub trait Interaction {
    /// Ask for one line of free text. May be empty.
    fn input(&self, prompt: &str) -> Result<String>;

    /// Ask a yes/no question.
    fn confirm(&self, prompt: &str) -> Result<bool>;

    /// Offer a single choice. `None` means the user closed the selector.
    fn select(&self, prompt: &str, items: &[&str]) -> Result<Option<usize>>;

    fn show_answer(&self, answer: &str);

    fn show_change(&self, change: &ProposedChange);

    /// Status line for the user (not a log event).
    fn notice(&self, message: &str);
}

/// Interaction on the controlling terminal.
pub struct TerminalInteraction {
    theme: ColorfulTheme,
}

impl TerminalInteraction {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for TerminalInteraction {
    fn default() -> Self {
        Self::new()
    }
}

impl Interaction for TerminalInteraction {
    fn input(&self, prompt: &str) -> Result<String> {
        Input::<String>::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .with_context(|| format!("read input for {prompt:?}"))
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(false)
            .interact()
            .with_context(|| format!("read confirmation for {prompt:?}"))
    }

    fn select(&self, prompt: &str, items: &[&str]) -> Result<Option<usize>> {
        Select::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(items)
            .default(0)
            .interact_opt()
            .with_context(|| format!("read selection for {prompt:?}"))
    }

    fn show_answer(&self, answer: &str) {
        println!("{answer}");
    }

    fn show_change(&self, change: &ProposedChange) {
        println!("{}", render_change(change));
    }

    fn notice(&self, message: &str) {
        println!("{message}");
    }
}

/// Path header followed by a fenced block tagged with the file extension.
pub fn render_change(change: &ProposedChange) -> String {
    let lang = Path::new(&change.path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");
    let body = change.content.trim_end_matches('\n');
    format!("{}:\n```{lang}\n{body}\n```", change.path)
}
