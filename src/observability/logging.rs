//! Structured logging.
//!
//! # Design Decisions
//! - `tracing` with a pretty formatter for development and JSON for
//!   production, selected by `observability.log_format`
//! - `RUST_LOG` overrides the configured level
//! - JSON lines carry the current span only; every request span records
//!   `correlation_id`

use tracing::Subscriber;
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "edge_gateway={level},tower_http={level}",
            level = config.log_level
        ))
    });

    let json = config.log_format == "json";
    let result = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(json_layer))
        .with((!json).then(fmt::layer))
        .try_init();

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

/// The production JSON formatter.
pub fn json_layer<S>() -> fmt::Layer<S, JsonFields, Format<Json>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer().json().with_current_span(true).with_span_list(false)
}
