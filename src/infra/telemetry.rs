use std::{io, sync::Once};

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

pub const JOBS_TOTAL: &str = "httypist_jobs_total";
pub const JOB_DURATION_MS: &str = "httypist_job_duration_ms";
pub const POST_COMMAND_FAILURES_TOTAL: &str = "httypist_post_command_failures_total";
pub const CALLBACK_FAILURES_TOTAL: &str = "httypist_callback_failures_total";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Events go to stderr; stdout is reserved for command output.
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
            JOBS_TOTAL,
            Unit::Count,
            "Total number of pipeline jobs, labelled by outcome."
        );
        describe_histogram!(
            JOB_DURATION_MS,
            Unit::Milliseconds,
            "Wall-clock duration of a pipeline job in milliseconds."
        );
        describe_counter!(
            POST_COMMAND_FAILURES_TOTAL,
            Unit::Count,
            "Total number of post-processing commands that failed or timed out."
        );
        describe_counter!(
            CALLBACK_FAILURES_TOTAL,
            Unit::Count,
            "Total number of callbacks that could not be delivered successfully."
        );
    });
}
