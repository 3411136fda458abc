//! Stable exit codes for repopilot CLI commands.

/// Command succeeded, or the session ended because input was closed.
pub const OK: i32 = 0;
/// Invalid config, I/O failure, or any error not raised by the engine.
pub const FAILED: i32 = 1;
/// The knowledge engine failed (see `engine::BackendError`).
pub const BACKEND: i32 = 2;
