use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_EXPIRED_TOTAL, METRIC_HIT_TOTAL, METRIC_MISS_TOTAL, METRIC_SKIPPED_ERRORS_TOTAL,
    METRIC_WRITE_ERROR_TOTAL, METRIC_WRITE_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
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

/// Register descriptions for the cache counters with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_HIT_TOTAL,
            Unit::Count,
            "Total number of field and query cache hits."
        );
        describe_counter!(
            METRIC_MISS_TOTAL,
            Unit::Count,
            "Total number of matched operations not found in the cache."
        );
        describe_counter!(
            METRIC_EXPIRED_TOTAL,
            Unit::Count,
            "Total number of entries discarded on read because they outlived their expiration."
        );
        describe_counter!(
            METRIC_WRITE_TOTAL,
            Unit::Count,
            "Total number of entries written to the backend."
        );
        describe_counter!(
            METRIC_WRITE_ERROR_TOTAL,
            Unit::Count,
            "Total number of backend writes that failed."
        );
        describe_counter!(
            METRIC_SKIPPED_ERRORS_TOTAL,
            Unit::Count,
            "Total number of responses not cached because they carried errors."
        );
    });
}
