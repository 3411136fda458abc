//! Development-time tracing for debugging sessions.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG` or `-v`,
//!   output to stderr so it never mixes with the interactive prompts.
//!
//! - **Exchange logging (`io/exchange_log`)**: Product artifacts in
//!   `.pilot/exchanges/`. Always written, unaffected by log filters.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "warn,repopilot=info",
        _ => "warn,repopilot=debug",
    }
}

/// Initialize tracing subscriber for development logging.
///
/// `RUST_LOG` wins over `verbosity` (the number of `-v` flags).
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=repopilot::fix=debug repopilot session --source .
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity > 1)
                .compact(),
        )
        .init();
}
