//! Tracing subscriber setup.

use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber: env-filtered fmt output plus an
/// `ErrorLayer` so spans are captured into error reports.
///
/// Call once at process start; a second call is a no-op rather than a panic,
/// so tests and embedding applications can both use it freely.
pub fn init() {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,questloom=info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init();
}

/// Install miette's panic hook for pretty panic reports.
pub fn init_panic_reports() {
    miette::set_panic_hook();
}
