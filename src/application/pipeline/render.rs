//! Render stage: every template file is rendered into the staging area.

use std::path::PathBuf;

use serde_json::Value;

use crate::{
    application::{error::PipelineError, render::TemplateEngine},
    domain::template::TemplateDescriptor,
};

use super::{
    log::{JobLog, WarningKind},
    partition::PartitionedTemplate,
    staging::StagingArea,
};

/// A file produced by rendering, addressed relative to the staging root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub output_name: String,
    pub type_key: String,
    pub path: PathBuf,
}

/// Render every template file into the staging area. The first failure aborts.
pub fn render_templates(
    engine: &dyn TemplateEngine,
    template: &TemplateDescriptor,
    partitioned: &PartitionedTemplate,
    staging: &StagingArea,
    data: &Value,
    log: &mut JobLog,
) -> Result<Vec<RenderedFile>, PipelineError> {
    let mut rendered = Vec::with_capacity(partitioned.template_files.len());

    for file in &partitioned.template_files {
        let type_key = file.name.type_key.as_str();
        let options = template.config.render_options(type_key);
        for key in options.unrecognized.keys() {
            log.warn(
                WarningKind::IgnoredRenderOption,
                file.file_name.as_str(),
                format!("render option `{key}` for type `{type_key}` is not supported and was ignored"),
            );
        }

        let text = engine
            .render_file(&template.path, &file.file_name, data, &options)
            .map_err(|err| PipelineError::render(file.file_name.as_str(), err))?;
        let path = staging.write_rendered(&file.name.output_name, &text)?;
        log.info(format!(
            "rendered {} -> {} ({} bytes)",
            file.file_name,
            file.name.output_name,
            text.len()
        ));

        rendered.push(RenderedFile {
            output_name: file.name.output_name.clone(),
            type_key: type_key.to_string(),
            path,
        });
    }

    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        application::{pipeline::partition::partition_template_dir, render::TeraEngine},
        domain::template::TemplateConfig,
    };
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn descriptor(dir: &TempDir, config: &str) -> TemplateDescriptor {
        TemplateDescriptor::new(
            "demo",
            dir.path(),
            TemplateConfig::from_yaml_str(config).expect("valid config"),
        )
    }

    #[test]
    fn renders_into_staging_and_overrides_static_copy() {
        let template = TempDir::new().expect("template dir");
        fs::write(template.path().join("hello.txt.jinja"), "Hello {{ name }}!").expect("write");
        fs::write(template.path().join("hello.txt"), "static").expect("write");
        let descriptor = descriptor(&template, "");

        let work = TempDir::new().expect("work dir");
        let staging = StagingArea::create(work.path(), "demo").expect("staging");
        let partitioned = partition_template_dir(template.path()).expect("partitioned");
        let mut log = JobLog::new(Uuid::new_v4());
        staging.stage_static(&partitioned, &mut log).expect("staged");

        let rendered = render_templates(
            &TeraEngine,
            &descriptor,
            &partitioned,
            &staging,
            &json!({"name": "World"}),
            &mut log,
        )
        .expect("rendered");

        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].output_name, "hello.txt");
        assert_eq!(rendered[0].type_key, "txt");
        assert_eq!(
            fs::read_to_string(staging.path().join("hello.txt")).expect("read"),
            "Hello World!"
        );
    }

    #[test]
    fn unsupported_options_are_warned_not_fatal() {
        let template = TempDir::new().expect("template dir");
        fs::write(template.path().join("a.tex.jinja"), "{{ v }}").expect("write");
        let descriptor = descriptor(
            &template,
            "filetypes:\n  tex:\n    jinja:\n      block_start_string: '<%'\n",
        );

        let work = TempDir::new().expect("work dir");
        let staging = StagingArea::create(work.path(), "demo").expect("staging");
        let partitioned = partition_template_dir(template.path()).expect("partitioned");
        let mut log = JobLog::new(Uuid::new_v4());

        render_templates(
            &TeraEngine,
            &descriptor,
            &partitioned,
            &staging,
            &json!({"v": 1}),
            &mut log,
        )
        .expect("rendered");

        assert_eq!(log.warnings().len(), 1);
        assert_eq!(log.warnings()[0].kind, WarningKind::IgnoredRenderOption);
    }

    #[test]
    fn render_errors_are_fatal() {
        let template = TempDir::new().expect("template dir");
        fs::write(template.path().join("a.txt.jinja"), "{{ missing }}").expect("write");
        let descriptor = descriptor(&template, "");

        let work = TempDir::new().expect("work dir");
        let staging = StagingArea::create(work.path(), "demo").expect("staging");
        let partitioned = partition_template_dir(template.path()).expect("partitioned");
        let mut log = JobLog::new(Uuid::new_v4());

        let err = render_templates(
            &TeraEngine,
            &descriptor,
            &partitioned,
            &staging,
            &json!({}),
            &mut log,
        )
        .expect_err("render fails");
        assert!(matches!(err, PipelineError::RenderFailure { ref file, .. } if file == "a.txt.jinja"));
    }
}
