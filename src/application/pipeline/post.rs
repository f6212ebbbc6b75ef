//! Post-processing: external commands keyed by the rendered file type.
//!
//! Nothing in here is fatal. Failures become warnings and the job moves on to
//! packaging.

use metrics::counter;

use crate::{
    domain::template::TemplateConfig,
    infra::{
        process::{CommandError, CommandRunner},
        telemetry::POST_COMMAND_FAILURES_TOTAL,
    },
};

use super::{
    log::{JobLog, WarningKind},
    render::RenderedFile,
    staging::StagingArea,
};

/// Counts reported back to the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostProcessSummary {
    pub commands_run: usize,
    pub failures: usize,
}

/// Run the `post[type_key]` command group of each rendered file inside the staging root.
///
/// Commands of one group run in declaration order and the group stops at its
/// first failure. The last captured output of every group is appended to the log.
pub async fn run_post_processing(
    config: &TemplateConfig,
    rendered: &[RenderedFile],
    staging: &StagingArea,
    runner: &CommandRunner,
    log: &mut JobLog,
) -> PostProcessSummary {
    let mut summary = PostProcessSummary::default();

    for file in rendered {
        let Some(commands) = config.post_commands(&file.type_key) else {
            log.info(format!(
                "no post-processing for {} (type `{}`)",
                file.output_name, file.type_key
            ));
            continue;
        };

        let mut last_output: Option<(&str, String)> = None;
        for (name, argv) in commands.iter() {
            let subject = format!("{}/{name}", file.type_key);
            log.info(format!(
                "running `{name}` for {}: {}",
                file.output_name,
                argv.join(" ")
            ));
            summary.commands_run += 1;

            let failure = match runner.run(argv, staging.path()).await {
                Ok(output) => {
                    let failure = (!output.success).then(|| match output.code {
                        Some(code) => (
                            WarningKind::PostProcessFailure,
                            format!("command exited with status {code}"),
                        ),
                        None => (
                            WarningKind::PostProcessFailure,
                            "command was terminated by a signal".to_string(),
                        ),
                    });
                    last_output = Some((name, output.combined));
                    failure
                }
                Err(err @ CommandError::Timeout { .. }) => {
                    Some((WarningKind::PostProcessTimeout, err.to_string()))
                }
                Err(err) => Some((WarningKind::PostProcessFailure, err.to_string())),
            };

            if let Some((kind, message)) = failure {
                summary.failures += 1;
                counter!(POST_COMMAND_FAILURES_TOTAL, "kind" => kind.as_str()).increment(1);
                log.warn(kind, subject, message);
                break;
            }
        }

        if let Some((name, output)) = last_output {
            log.output(
                format!("output of `{name}` for {}", file.output_name),
                &output,
            );
        }
    }

    summary
}
