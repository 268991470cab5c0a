//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → correlation.rs (ID + request span)
//!     → every subsystem logs inside that span (logging.rs)
//!     → counters/gauges/histograms (metrics.rs)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Structured fields everywhere, never interpolated strings for data
//! - Correlation ID flows through logs, upstream requests and responses
//! - Metric updates are cheap and no-ops without a recorder

pub mod correlation;
pub mod logging;
pub mod metrics;

pub use correlation::{
    access_log_span, correlation_middleware, ensure_correlation_id, CorrelationId, X_CORRELATION_ID,
};
