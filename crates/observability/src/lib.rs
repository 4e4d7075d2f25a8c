//! `opsledger-observability`: shared tracing/logging setup.
//!
//! Engine operations are instrumented with `tenant_id`/`actor_id`/document-id
//! span fields; this crate wires up the subscriber those spans land in.

use tracing_subscriber::EnvFilter;

/// Output format for process logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line, for log shippers.
    #[default]
    Json,
    /// Human-readable output for local development.
    Text,
}

impl LogFormat {
    /// Pick the format from `OPSLEDGER_LOG_FORMAT` (`json` or `text`),
    /// defaulting to JSON.
    pub fn from_env() -> Self {
        match std::env::var("OPSLEDGER_LOG_FORMAT").as_deref() {
            Ok("text") => LogFormat::Text,
            _ => LogFormat::Json,
        }
    }
}

/// Initialize process-wide tracing with the given output format.
///
/// Filtering comes from `RUST_LOG`, defaulting to `info`. Safe to call
/// multiple times; subsequent calls are no-ops.
pub fn init_with(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Json => {
            let _ = builder
                .json()
                .with_timer(tracing_subscriber::fmt::time::SystemTime)
                .try_init();
        }
        LogFormat::Text => {
            let _ = builder.try_init();
        }
    }
}

/// Initialize with the format chosen from the environment.
pub fn init() {
    init_with(LogFormat::from_env());
}
