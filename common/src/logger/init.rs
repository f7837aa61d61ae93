use once_cell::sync::OnceCell;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

static LOGGER_INIT: OnceCell<()> = OnceCell::new();

/// Install the process-wide tracing subscriber.
///
/// `json = true` emits one JSON object per event (production), otherwise a
/// human-readable layout. `RUST_LOG` overrides the default `info` filter.
/// Only the first call has an effect.
pub fn init_logger(service_name: &'static str, json: bool) {
    LOGGER_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let base = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_span_events(fmt::format::FmtSpan::CLOSE);

        let registry = tracing_subscriber::registry().with(filter);
        let installed = if json {
            registry.with(base.json()).try_init()
        } else {
            registry.with(base.compact()).try_init()
        };

        // A subscriber installed elsewhere (e.g. by a test harness) wins.
        if installed.is_ok() {
            tracing::info!(service = service_name, "logger initialized");
        }
    });
}
