use std::{io, sync::Once};

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::content::{
    METRIC_RENDER_FAILED_TOTAL, METRIC_RENDER_MS, METRIC_RENDER_TOTAL, METRIC_RENDER_WARNINGS_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};
use crate::infra::http::{
    METRIC_PREVIEW_CACHE_ENTRIES, METRIC_PREVIEW_CACHE_HIT_TOTAL, METRIC_PREVIEW_CACHE_MISS_TOTAL,
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so rendered JSON on stdout stays machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .with_writer(io::stderr)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(io::stderr)
            .compact()
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_RENDER_TOTAL,
            Unit::Count,
            "Total number of documents that reached the render pipeline."
        );
        describe_counter!(
            METRIC_RENDER_FAILED_TOTAL,
            Unit::Count,
            "Total number of documents that failed to compile."
        );
        describe_counter!(
            METRIC_RENDER_WARNINGS_TOTAL,
            Unit::Count,
            "Total number of degraded constructs across rendered documents."
        );
        describe_histogram!(
            METRIC_RENDER_MS,
            Unit::Milliseconds,
            "Render plus metadata latency per document in milliseconds."
        );
        describe_counter!(
            METRIC_PREVIEW_CACHE_HIT_TOTAL,
            Unit::Count,
            "Total number of preview artifact cache hits."
        );
        describe_counter!(
            METRIC_PREVIEW_CACHE_MISS_TOTAL,
            Unit::Count,
            "Total number of preview artifact cache misses."
        );
        describe_gauge!(
            METRIC_PREVIEW_CACHE_ENTRIES,
            Unit::Count,
            "Current number of cached preview artifacts."
        );
    });
}
