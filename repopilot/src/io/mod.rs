//! I/O helpers: filesystem, processes, the generation backend and the terminal.

pub mod applier;
pub mod backend;
pub mod config;
pub mod documents;
pub mod exchange_log;
pub mod git;
pub mod interaction;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod script;
pub mod source;
