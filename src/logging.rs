//! `tracing` subscriber setup for the agent.
//!
//! The filter comes from `MIXIN_LOG` (standard `EnvFilter` syntax) and falls
//! back to `info`, or `debug` when verbose logging was asked for. Output goes
//! to stderr so it never mixes with the application's stdout.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_ENV_VAR: &str = "MIXIN_LOG";

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Builds the filter the agent would install.
pub fn env_filter(verbose: bool) -> EnvFilter {
    match std::env::var(LOG_ENV_VAR) {
        Ok(directives) if !directives.trim().is_empty() => {
            EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
        }
        _ => EnvFilter::new(default_directive(verbose)),
    }
}

/// Installs the global subscriber once. Later calls, or a subscriber that
/// the host already installed, are left alone.
pub fn init_logging(verbose: bool) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(env_filter(verbose)),
        );

        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already initialized, keeping it");
        }
    });
}
