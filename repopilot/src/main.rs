//! Interactive repository pilot.
//!
//! Loads a repository (local path or git URL) once, then lets the user ask
//! questions about it or request features whose proposed changes can be
//! applied, run and automatically fixed.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;

use repopilot::engine::is_backend_error;
use repopilot::engine::repo::RepoEngine;
use repopilot::exit_codes;
use repopilot::io::applier::FsApplier;
use repopilot::io::backend::CodexBackend;
use repopilot::io::config::load_config;
use repopilot::io::interaction::TerminalInteraction;
use repopilot::io::paths::{DEFAULT_STATE_DIR, InitOptions, PilotPaths, init_state_dir};
use repopilot::io::script::InterpreterRunner;
use repopilot::logging;
use repopilot::looping::run_top_level;

#[derive(Parser)]
#[command(
    name = "repopilot",
    version,
    about = "Review, apply, run and auto-fix generated changes against a repository"
)]
struct Cli {
    /// State directory for config, clones and exchange logs.
    #[arg(long, global = true, default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    /// Raise log verbosity on stderr (`-v` info, `-vv` debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the state directory and write the default config.
    Init {
        /// Overwrite an existing config with defaults.
        #[arg(short, long)]
        force: bool,
    },
    /// Load a repository and start the interactive loop.
    Session {
        /// Local directory or git URL. Prompted for when omitted.
        #[arg(long)]
        source: Option<String>,

        /// Cap automatic fix rounds per executed file (overrides config).
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_fix_rounds: Option<u32>,
    },
}

fn main() {
    // clap exits usage errors with 2, which is BACKEND here.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::FAILED
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    logging::init(cli.verbose);

    let code = match run(cli) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("error: {err:#}");
            if is_backend_error(&err) {
                exit_codes::BACKEND
            } else {
                exit_codes::FAILED
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.state_dir, force),
        Command::Session {
            source,
            max_fix_rounds,
        } => cmd_session(&cli.state_dir, source.as_deref(), max_fix_rounds),
    }
}

fn cmd_init(state_dir: &Path, force: bool) -> Result<()> {
    let paths = init_state_dir(state_dir, &InitOptions { force })?;
    println!("initialized {}", paths.state_dir.display());
    Ok(())
}

fn cmd_session(state_dir: &Path, source: Option<&str>, max_fix_rounds: Option<u32>) -> Result<()> {
    let paths = PilotPaths::new(state_dir);
    let mut config = load_config(&paths.config_path)?;
    if max_fix_rounds.is_some() {
        config.session.max_fix_rounds = max_fix_rounds;
    }
    let policy = config.session.fix_policy();
    debug!(?policy, "session policy");

    let backend = CodexBackend::new(config.engine.command.clone());
    let mut engine = RepoEngine::new(backend, paths, config.engine, config.index);
    let ui = TerminalInteraction::new();
    let script = config.script;

    let summary = run_top_level(&mut engine, &ui, source, policy, |root| {
        (
            FsApplier::new(root),
            InterpreterRunner::new(root, script),
        )
    })?;
    debug!(sessions = summary.sessions, "session loop ended");
    Ok(())
}
