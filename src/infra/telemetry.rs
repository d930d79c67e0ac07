use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metric_names;
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
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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
            metric_names::METRIC_HIT,
            Unit::Count,
            "Total number of responses served from the output cache."
        );
        describe_counter!(
            metric_names::METRIC_MISS,
            Unit::Count,
            "Total number of cacheable reads that ran the handler."
        );
        describe_counter!(
            metric_names::METRIC_NOT_MODIFIED,
            Unit::Count,
            "Total number of 304 Not Modified responses."
        );
        describe_counter!(
            metric_names::METRIC_STORE_ERROR,
            Unit::Count,
            "Total number of cache store operations that failed open."
        );
        describe_counter!(
            metric_names::METRIC_INVALIDATION_FAILURE,
            Unit::Count,
            "Total number of tag purges that failed after a write."
        );
        describe_counter!(
            metric_names::METRIC_PURGED,
            Unit::Count,
            "Total number of cache entries purged by write invalidation."
        );
    });
}
