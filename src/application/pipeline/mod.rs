//! The template processing pipeline.
//!
//! One call runs one job through five stages in order: stage the static
//! files, render templates, post-process, package, dispatch callbacks. Only
//! staging, rendering and packaging can fail a job; everything after
//! rendering reports problems as [`JobWarning`]s.

mod callbacks;
mod log;
mod package;
mod partition;
mod post;
mod render;
mod result;
mod staging;

use std::{
    io, mem,
    path::PathBuf,
    time::{Duration, Instant},
};

use metrics::{counter, histogram};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{Instrument, Span, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    application::{
        error::PipelineError,
        render::{TemplateEngine, TeraEngine},
    },
    config::PipelineSettings,
    domain::template::TemplateDescriptor,
    infra::{
        archive::ArchiveCompression,
        http::CallbackClient,
        process::CommandRunner,
        telemetry::{JOB_DURATION_MS, JOBS_TOTAL},
    },
};

pub use callbacks::{
    COMPLETE_PART, CallbackConfigError, DispatchSummary, PROCESSED_HEADER, RESULT_PART,
    dispatch_callbacks, prepare_callback,
};
pub use log::{JobLog, JobWarning, Stage, WarningKind};
pub use package::{RESULT_ARCHIVE, ResultBundle, TEMP_ARCHIVE, package_results};
pub use partition::{PartitionError, PartitionedTemplate, TemplateFile, partition_template_dir};
pub use post::{PostProcessSummary, run_post_processing};
pub use render::{RenderedFile, render_templates};
pub use result::JobResult;
pub use staging::StagingArea;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-job knobs. Usually built from [`PipelineSettings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Parent of the staging and result directories.
    pub work_dir: PathBuf,
    pub command_timeout: Duration,
    pub callback_timeout: Duration,
    pub compression: ArchiveCompression,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            compression: ArchiveCompression::default(),
        }
    }
}

impl From<&PipelineSettings> for PipelineOptions {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            work_dir: settings.work_dir.clone(),
            command_timeout: settings.command_timeout,
            callback_timeout: settings.callback_timeout,
            compression: settings.compression,
        }
    }
}

/// Run one job with the bundled Tera engine.
pub async fn process_template(
    template: &TemplateDescriptor,
    data: &Value,
    options: &PipelineOptions,
) -> Result<JobResult, PipelineError> {
    process_template_with(&TeraEngine, template, data, options).await
}

/// Run one job with a caller-supplied engine.
pub async fn process_template_with(
    engine: &dyn TemplateEngine,
    template: &TemplateDescriptor,
    data: &Value,
    options: &PipelineOptions,
) -> Result<JobResult, PipelineError> {
    let job_id = Uuid::new_v4();
    let span = info_span!("template_job", %job_id, template = %template.name);
    let started_at = Instant::now();

    let outcome = TemplateJob::new(job_id, engine, template, data, options)
        .run()
        .instrument(span)
        .await;

    let elapsed_ms = started_at.elapsed().as_millis() as u64;
    histogram!(JOB_DURATION_MS).record(elapsed_ms as f64);
    match &outcome {
        Ok(result) => {
            counter!(JOBS_TOTAL, "outcome" => "succeeded").increment(1);
            info!(
                target = "application::pipeline",
                %job_id,
                template = %template.name,
                warnings = result.warnings.len(),
                elapsed_ms,
                "template job finished"
            );
        }
        Err(err) => {
            counter!(JOBS_TOTAL, "outcome" => "failed").increment(1);
            error!(
                target = "application::pipeline",
                %job_id,
                template = %template.name,
                kind = err.kind(),
                error = %err,
                elapsed_ms,
                "template job failed"
            );
        }
    }
    outcome
}

/// State of a single job run. Consumed by [`TemplateJob::run`].
struct TemplateJob<'a> {
    job_id: Uuid,
    engine: &'a dyn TemplateEngine,
    template: &'a TemplateDescriptor,
    data: &'a Value,
    options: &'a PipelineOptions,
    log: JobLog,
}

impl<'a> TemplateJob<'a> {
    fn new(
        job_id: Uuid,
        engine: &'a dyn TemplateEngine,
        template: &'a TemplateDescriptor,
        data: &'a Value,
        options: &'a PipelineOptions,
    ) -> Self {
        Self {
            job_id,
            engine,
            template,
            data,
            options,
            log: JobLog::new(job_id),
        }
    }

    async fn run(mut self) -> Result<JobResult, PipelineError> {
        let started_at = Instant::now();
        let started_wall = OffsetDateTime::now_utc();

        self.log.enter(Stage::Staging);
        let partitioned =
            partition_template_dir(&self.template.path).map_err(|err| match err {
                PartitionError::Io { path, source } => PipelineError::staging(path, source),
                PartitionError::Filename(err) => PipelineError::InvalidTemplateFilename(err),
            })?;
        let staging = StagingArea::create(&self.options.work_dir, &self.template.name)
            .map_err(|err| PipelineError::staging(&self.options.work_dir, err))?;
        self.log.info(format!(
            "staging {} in {}",
            self.template.name,
            staging.path().display()
        ));

        let bundle = match self.run_stages(&partitioned, &staging).await {
            Ok(bundle) => bundle,
            Err(err) => {
                let path = staging.path().to_path_buf();
                if let Err(cleanup) = staging.remove() {
                    warn!(
                        target = "application::pipeline",
                        job_id = %self.job_id,
                        path = %path.display(),
                        error = %cleanup,
                        "failed to remove staging directory"
                    );
                }
                return Err(err);
            }
        };

        let (log, warnings) = self.log.into_parts();
        Ok(JobResult {
            job_id: self.job_id,
            template: self.template.clone(),
            data: self.data.clone(),
            staging_folder: staging.into_path(),
            result_folder: bundle.root,
            started_at: started_wall,
            elapsed_ms: started_at.elapsed().as_millis() as u64,
            result_files: bundle.result_files,
            warnings,
            log,
        })
    }

    async fn run_stages(
        &mut self,
        partitioned: &PartitionedTemplate,
        staging: &StagingArea,
    ) -> Result<ResultBundle, PipelineError> {
        let template = self.template;
        let config = &template.config;

        staging.stage_static(partitioned, &mut self.log)?;

        self.log.enter(Stage::Render);
        let rendered = render_templates(
            self.engine,
            self.template,
            partitioned,
            staging,
            self.data,
            &mut self.log,
        )?;

        self.log.enter(Stage::PostProcess);
        let runner = CommandRunner::new(self.options.command_timeout);
        run_post_processing(config, &rendered, staging, &runner, &mut self.log).await;

        self.log.enter(Stage::Package);
        let bundle = self.package(staging).await?;

        self.log.enter(Stage::Callbacks);
        match CallbackClient::new(self.options.callback_timeout) {
            Ok(client) => {
                dispatch_callbacks(
                    config,
                    self.engine,
                    &client,
                    self.data,
                    staging,
                    &bundle,
                    &mut self.log,
                )
                .await;
            }
            Err(err) => self.log.warn(
                WarningKind::CallbackTransportError,
                "client",
                format!("could not build HTTP client: {err}"),
            ),
        }

        Ok(bundle)
    }

    /// Archive writing is blocking file I/O, so it runs off the async workers.
    async fn package(&mut self, staging: &StagingArea) -> Result<ResultBundle, PipelineError> {
        let config = self.template.config.clone();
        let staging = staging.clone();
        let work_dir = self.options.work_dir.clone();
        let name = self.template.name.clone();
        let compression = self.options.compression;
        let mut log = mem::replace(&mut self.log, JobLog::new(self.job_id));
        let span = Span::current();

        let (log, packaged) = tokio::task::spawn_blocking(move || {
            let packaged = span.in_scope(|| {
                package_results(&config, &staging, &work_dir, &name, compression, &mut log)
            });
            (log, packaged)
        })
        .await
        .map_err(|err| PipelineError::packaging(io::Error::other(err)))?;
        self.log = log;
        packaged
    }
}
