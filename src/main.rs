use std::{
    fs,
    io::{self, Read},
    path::Path,
    process,
};

use httypist::{
    application::{
        catalog::TemplateCatalog,
        error::AppError,
        pipeline::{PipelineOptions, process_template},
    },
    config::{self, Command, ListArgs, RunArgs, SelectArgs, Settings},
    infra::{error::InfraError, telemetry},
};
use serde_json::{Value, json};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?error.messages(), "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?error.messages(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        Command::Run(args) => run_template(&settings, *args).await,
        Command::Select(args) => run_select(&settings, args),
        Command::List(args) => run_list(&settings, args),
    }
}

async fn run_template(settings: &Settings, args: RunArgs) -> Result<(), AppError> {
    let catalog = TemplateCatalog::load(&settings.templates.root)?;
    let template = catalog
        .get(&args.template)
        .ok_or_else(|| AppError::not_found(&args.template))?;
    let data = read_data(args.data.as_deref())?;
    let options = PipelineOptions::from(&settings.pipeline);

    let result = process_template(template, &data, &options).await?;
    info!(
        target = "httypist::run",
        job_id = %result.job_id,
        template = %template.name,
        result_folder = %result.result_folder.display(),
        warnings = result.warnings.len(),
        "job result ready"
    );
    if result.has_warnings() {
        for warning in &result.warnings {
            warn!(
                target = "httypist::run",
                job_id = %result.job_id,
                kind = warning.kind.as_str(),
                subject = %warning.subject,
                "{}",
                warning.message
            );
        }
    }

    let mut summary = serde_json::to_value(&result)
        .map_err(|err| AppError::unexpected(format!("failed to serialize job result: {err}")))?;
    if let Value::Object(fields) = &mut summary {
        fields.insert("result_zip".into(), json!(result.result_zip()));
        fields.insert("temp_zip".into(), json!(result.temp_zip()));
    }
    print_json(&summary)
}

fn run_select(settings: &Settings, args: SelectArgs) -> Result<(), AppError> {
    let catalog = TemplateCatalog::load(&settings.templates.root)?;
    let data = read_data(args.data.as_deref())?;
    for template in catalog.select(&data) {
        println!("{}", template.name);
    }
    Ok(())
}

fn run_list(settings: &Settings, _args: ListArgs) -> Result<(), AppError> {
    let catalog = TemplateCatalog::load(&settings.templates.root)?;
    for name in catalog.names() {
        println!("{name}");
    }
    Ok(())
}

/// Job data from a file, `-` for stdin, or an empty object.
fn read_data(source: Option<&Path>) -> Result<Value, AppError> {
    let text = match source {
        None => return Ok(json!({})),
        Some(path) if path == Path::new("-") => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|err| AppError::validation(format!("failed to read stdin: {err}")))?;
            buffer
        }
        Some(path) => fs::read_to_string(path).map_err(|err| {
            AppError::validation(format!("failed to read {}: {err}", path.display()))
        })?,
    };

    let data: Value = serde_json::from_str(&text)
        .map_err(|err| AppError::validation(format!("job data is not valid JSON: {err}")))?;
    if !data.is_object() {
        return Err(AppError::validation("job data must be a JSON object"));
    }
    Ok(data)
}

fn print_json(value: &Value) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to serialize job result: {err}")))?;
    println!("{rendered}");
    Ok(())
}
