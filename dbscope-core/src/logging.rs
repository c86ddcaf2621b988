use std::error::Error;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,dbscope=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a human-readable `tracing` subscriber filtered by `RUST_LOG`.
///
/// Rendered SQL is emitted on the `dbscope::sql` target at `DEBUG`; set
/// `RUST_LOG=dbscope::sql=off` to silence it. Calling this more than once is
/// harmless: only the first subscriber is installed.
pub fn init_tracing() {
    let _ = try_init_tracing();
}

/// Like [`init_tracing`], but reports when a global subscriber already exists.
pub fn try_init_tracing() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter(env_filter()).try_init()
}

/// Like [`init_tracing`], with one JSON object per event.
pub fn init_tracing_json() {
    let _ = try_init_tracing_json();
}

pub fn try_init_tracing_json() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter())
        .try_init()
}
