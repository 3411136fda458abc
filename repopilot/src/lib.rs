//! Interactive change-review-run-fix sessions against a code repository.
//!
//! A user asks questions about a repository or requests a feature; the
//! knowledge engine proposes whole-file changes, the user decides which to
//! apply and run, and failing runs feed their error output back to the
//! engine until the file works or the user stops. The crate is split as:
//!
//! - **[`core`]**: Pure logic (request types, fix-loop transitions, retrieval
//!   index). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, processes,
//!   terminal). Isolated behind traits to enable fakes in tests.
//!
//! Orchestration modules ([`session`], [`fix`], [`looping`]) drive the core
//! through the [`engine::KnowledgeEngine`] and `io` traits.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod fix;
pub mod io;
pub mod logging;
pub mod looping;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
