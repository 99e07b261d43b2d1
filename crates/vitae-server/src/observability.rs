//! Log setup for the Vitae service.
//!
//! The subscriber starts before the config file is read, so the filter sits
//! behind a reload layer and the configured `logging.level` is swapped in
//! afterwards. `RUST_LOG` always wins over the config file.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

fn rust_log_is_set() -> bool {
    std::env::var_os("RUST_LOG").is_some()
}

fn startup_filter(level: &str) -> EnvFilter {
    if rust_log_is_set() {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
    }
    EnvFilter::new(level)
}

pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing_with_level(level: &str) {
    let (filter, handle) = reload::Layer::new(startup_filter(level));
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// Switch to the configured level. Ignored while `RUST_LOG` is set.
pub fn apply_logging_level(level: &str) {
    if rust_log_is_set() {
        return;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return;
    };
    if let Err(e) = handle.reload(EnvFilter::new(level)) {
        tracing::warn!(error = %e, level = %level, "could not apply logging level");
    }
}
