//! Callback dispatch. Each configured callback is resolved and sent on its
//! own; a broken callback only produces warnings for itself.

use std::{fs, path::Path};

use metrics::counter;
use reqwest::{
    Method, Url,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use serde_json::Value;
use thiserror::Error;

use crate::{
    application::render::{RenderError, TemplateEngine},
    domain::{
        error::DomainError,
        template::{CallbackConfig, CallbackFile, TemplateConfig},
    },
    infra::{
        http::{CallbackClient, CallbackSendError, OutboundPart, OutboundRequest, PartContent},
        telemetry::CALLBACK_FAILURES_TOTAL,
    },
};

use super::{
    log::{JobLog, WarningKind},
    package::ResultBundle,
    staging::StagingArea,
};

pub const PROCESSED_HEADER: &str = "x-httypist-processed";
pub const RESULT_PART: &str = "result";
pub const COMPLETE_PART: &str = "complete";

const ZIP_MIME: &str = "application/zip";

/// Reasons a callback could not be turned into a request.
#[derive(Debug, Error)]
pub enum CallbackConfigError {
    #[error("malformed callback: {0}")]
    Malformed(#[source] DomainError),
    #[error("failed to render URL template: {0}")]
    Url(#[source] RenderError),
    #[error("rendered URL `{url}` is not an absolute http(s) URL")]
    InvalidUrl { url: String },
    #[error("invalid HTTP method `{method}`")]
    InvalidMethod { method: String },
    #[error("invalid header `{name}`")]
    InvalidHeader { name: String },
    #[error("data entry `{name}` has no `file`")]
    MissingFile { name: String },
    #[error("data entry `{name}` points outside the staging directory: `{file}`")]
    EscapingFile { name: String, file: String },
    #[error("data entry `{name}` could not read `{file}`: {source}")]
    Read {
        name: String,
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("data entry `{name}` is not valid UTF-8 text: `{file}`")]
    NotText { name: String, file: String },
}

/// Outcome counts for one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failures: usize,
}

/// Resolve one callback into a request: URL, method, headers and multipart parts.
pub fn prepare_callback(
    config: &CallbackConfig,
    engine: &dyn TemplateEngine,
    data: &Value,
    staging: &StagingArea,
    bundle: &ResultBundle,
) -> Result<OutboundRequest, CallbackConfigError> {
    let rendered = engine
        .render_str(&config.template, data)
        .map_err(CallbackConfigError::Url)?;
    let rendered = rendered.trim();
    let url = Url::parse(rendered)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .ok_or_else(|| CallbackConfigError::InvalidUrl {
            url: rendered.to_string(),
        })?;

    let method = Method::from_bytes(config.method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| CallbackConfigError::InvalidMethod {
            method: config.method.clone(),
        })?;

    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(PROCESSED_HEADER),
        HeaderValue::from_static("1"),
    );
    for (name, value) in config.headers.iter().flatten() {
        let invalid = || CallbackConfigError::InvalidHeader { name: name.clone() };
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        headers.insert(header_name, header_value);
    }

    let mut parts = Vec::new();
    for entry in config.data.iter().flatten() {
        parts.push(data_part(entry, staging)?);
    }
    if config.sends_result() {
        parts.push(archive_part(RESULT_PART, &bundle.result_zip)?);
    }
    if config.sends_temp() {
        parts.push(archive_part(COMPLETE_PART, &bundle.temp_zip)?);
    }

    Ok(OutboundRequest {
        method,
        url,
        headers,
        parts,
    })
}

/// Send every callback in declaration order. Failures are recorded as warnings.
pub async fn dispatch_callbacks(
    config: &TemplateConfig,
    engine: &dyn TemplateEngine,
    client: &CallbackClient,
    data: &Value,
    staging: &StagingArea,
    bundle: &ResultBundle,
    log: &mut JobLog,
) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    if config.callbacks.is_empty() {
        log.info("no callbacks configured");
        return summary;
    }

    for (name, entry) in config.callbacks.iter() {
        let prepared = entry
            .config()
            .map_err(CallbackConfigError::Malformed)
            .and_then(|callback| prepare_callback(callback, engine, data, staging, bundle));
        let request = match prepared {
            Ok(request) => request,
            Err(err) => {
                record_failure(log, &mut summary, WarningKind::CallbackConfigError, name, err.to_string());
                continue;
            }
        };

        log.info(format!(
            "calling `{name}`: {} {} ({} parts)",
            request.method,
            request.url,
            request.parts.len()
        ));
        match client.send(request).await {
            Ok(response) => {
                summary.sent += 1;
                log.info(format!("callback `{name}` answered {}", response.status));
                log.output(format!("response of `{name}`"), &response.body);
                if !response.status.is_success() {
                    record_failure(
                        log,
                        &mut summary,
                        WarningKind::CallbackTransportError,
                        name,
                        format!("endpoint answered {}", response.status),
                    );
                }
            }
            Err(err @ CallbackSendError::Timeout(_)) => {
                record_failure(log, &mut summary, WarningKind::CallbackTimeout, name, err.to_string());
            }
            Err(err) => {
                record_failure(
                    log,
                    &mut summary,
                    WarningKind::CallbackTransportError,
                    name,
                    err.to_string(),
                );
            }
        }
    }

    summary
}

fn record_failure(
    log: &mut JobLog,
    summary: &mut DispatchSummary,
    kind: WarningKind,
    name: &str,
    message: String,
) {
    summary.failures += 1;
    counter!(CALLBACK_FAILURES_TOTAL, "kind" => kind.as_str()).increment(1);
    log.warn(kind, name, message);
}

fn data_part(entry: &CallbackFile, staging: &StagingArea) -> Result<OutboundPart, CallbackConfigError> {
    let file = entry
        .file
        .as_deref()
        .filter(|file| !file.is_empty())
        .ok_or_else(|| CallbackConfigError::MissingFile {
            name: entry.name.clone(),
        })?;
    let path = staging
        .resolve(file)
        .ok()
        .filter(|path| path.symlink_metadata().is_err() || staging.contains(path))
        .ok_or_else(|| CallbackConfigError::EscapingFile {
            name: entry.name.clone(),
            file: file.to_string(),
        })?;
    let bytes = fs::read(&path).map_err(|source| CallbackConfigError::Read {
        name: entry.name.clone(),
        file: file.to_string(),
        source,
    })?;

    let content = if entry.binary {
        PartContent::Binary {
            bytes,
            mime: mime_guess::from_path(&path)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        }
    } else {
        let text = String::from_utf8(bytes).map_err(|_| CallbackConfigError::NotText {
            name: entry.name.clone(),
            file: file.to_string(),
        })?;
        PartContent::Text(text)
    };

    Ok(OutboundPart {
        name: entry.name.clone(),
        file_name: file_name(&path),
        content,
    })
}

fn archive_part(name: &str, path: &Path) -> Result<OutboundPart, CallbackConfigError> {
    let bytes = fs::read(path).map_err(|source| CallbackConfigError::Read {
        name: name.to_string(),
        file: path.display().to_string(),
        source,
    })?;
    Ok(OutboundPart {
        name: name.to_string(),
        file_name: file_name(path),
        content: PartContent::Binary {
            bytes,
            mime: ZIP_MIME.to_string(),
        },
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::render::TeraEngine;
    use httpmock::MockServer;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Fixture {
        _work: TempDir,
        staging: StagingArea,
        bundle: ResultBundle,
    }

    fn fixture() -> Fixture {
        let work = TempDir::new().expect("work dir");
        let staging = StagingArea::create(work.path(), "demo").expect("staging");
        fs::write(staging.path().join("demo.pdf"), b"%PDF-1.7").expect("write");
        fs::write(staging.path().join("notes.txt"), "plain notes").expect("write");
        fs::write(staging.path().join("blob.bin"), [0xff_u8, 0xfe, 0x00]).expect("write");
        let root = work.path().join("result");
        fs::create_dir_all(&root).expect("mkdir");
        fs::write(root.join("result.zip"), b"PK-result").expect("write");
        fs::write(root.join("temp.zip"), b"PK-temp").expect("write");
        let bundle = ResultBundle {
            temp_zip: root.join("temp.zip"),
            result_zip: root.join("result.zip"),
            root,
            result_files: Vec::new(),
        };
        Fixture {
            _work: work,
            staging,
            bundle,
        }
    }

    fn callback(yaml: &str) -> CallbackConfig {
        serde_yaml::from_str(yaml).expect("callback yaml")
    }

    #[test]
    fn prepares_url_method_headers_and_parts() {
        let fixture = fixture();
        let config = callback(
            r#"
template: "https://hooks.example.com/{{ id }}/done"
method: post
headers:
  Authorization: Bearer abc
data:
  - name: document
    file: demo.pdf
  - name: notes
    file: notes.txt
    binary: false
send_result: true
send_temp: true
"#,
        );

        let request = prepare_callback(
            &config,
            &TeraEngine,
            &json!({"id": 42}),
            &fixture.staging,
            &fixture.bundle,
        )
        .expect("prepared");

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url.as_str(), "https://hooks.example.com/42/done");
        assert_eq!(request.headers[PROCESSED_HEADER], "1");
        assert_eq!(request.headers["authorization"], "Bearer abc");

        let names: Vec<_> = request.parts.iter().map(|part| part.name.as_str()).collect();
        assert_eq!(names, ["document", "notes", RESULT_PART, COMPLETE_PART]);
        assert_eq!(
            request.parts[0].content,
            PartContent::Binary {
                bytes: b"%PDF-1.7".to_vec(),
                mime: "application/pdf".into(),
            }
        );
        assert_eq!(request.parts[1].content, PartContent::Text("plain notes".into()));
        assert_eq!(request.parts[2].file_name, "result.zip");
        assert_eq!(request.parts[3].file_name, "temp.zip");
    }

    #[test]
    fn configured_header_overrides_marker() {
        let fixture = fixture();
        let config = callback(
            "template: http://localhost/hook\nmethod: GET\nheaders:\n  x-httypist-processed: custom\n",
        );
        let request = prepare_callback(
            &config,
            &TeraEngine,
            &json!({}),
            &fixture.staging,
            &fixture.bundle,
        )
        .expect("prepared");
        assert_eq!(request.headers[PROCESSED_HEADER], "custom");
        assert!(request.parts.is_empty());
    }

    #[test]
    fn configuration_errors_are_reported() {
        let fixture = fixture();
        let cases = [
            ("template: not a url\nmethod: GET\n", "not an absolute"),
            ("template: ftp://example.com/x\nmethod: GET\n", "not an absolute"),
            ("template: http://localhost/\nmethod: 'BAD METHOD'\n", "invalid HTTP method"),
            (
                "template: http://localhost/\nmethod: POST\ndata:\n  - name: doc\n",
                "has no `file`",
            ),
            (
                "template: http://localhost/\nmethod: POST\ndata:\n  - name: doc\n    file: absent.pdf\n",
                "could not read",
            ),
            (
                "template: http://localhost/\nmethod: POST\ndata:\n  - name: doc\n    file: ../escape\n",
                "outside the staging directory",
            ),
            (
                "template: http://localhost/\nmethod: POST\ndata:\n  - name: doc\n    file: blob.bin\n    binary: false\n",
                "not valid UTF-8",
            ),
            ("template: \"{{ missing }}\"\nmethod: GET\n", "render URL template"),
        ];

        for (yaml, expected) in cases {
            let err = prepare_callback(
                &callback(yaml),
                &TeraEngine,
                &json!({}),
                &fixture.staging,
                &fixture.bundle,
            )
            .expect_err(yaml);
            assert!(
                err.to_string().contains(expected),
                "`{err}` should mention `{expected}`"
            );
        }
    }

    #[tokio::test]
    async fn broken_callback_does_not_stop_the_next_one() {
        let fixture = fixture();
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("POST")
                .path("/second")
                .header(PROCESSED_HEADER, "1");
            then.status(200).body("received");
        });

        let config = TemplateConfig::from_yaml_str(&format!(
            r#"
callbacks:
  first:
    template: "{url}/first"
    method: POST
    data:
      - name: doc
        file: nowhere.pdf
  second:
    template: "{url}/second"
    method: POST
    data:
      - name: doc
        file: demo.pdf
"#,
            url = server.base_url()
        ))
        .expect("config");
        let client = CallbackClient::new(Duration::from_secs(5)).expect("client");
        let mut log = JobLog::new(Uuid::new_v4());

        let summary = dispatch_callbacks(
            &config,
            &TeraEngine,
            &client,
            &json!({}),
            &fixture.staging,
            &fixture.bundle,
            &mut log,
        )
        .await;

        mock.assert();
        assert_eq!(summary, DispatchSummary { sent: 1, failures: 1 });
        assert_eq!(log.warnings().len(), 1);
        assert_eq!(log.warnings()[0].kind, WarningKind::CallbackConfigError);
        assert_eq!(log.warnings()[0].subject, "first");
        assert!(log.text().contains("received"));
    }

    #[cfg(unix)]
    #[test]
    fn data_part_refuses_links_out_of_staging() {
        use std::os::unix::fs::symlink;

        let fixture = fixture();
        let outside = TempDir::new().expect("outside dir");
        fs::write(outside.path().join("secret.txt"), "SECRET").expect("write");
        symlink(outside.path().join("secret.txt"), fixture.staging.path().join("leak.txt"))
            .expect("link");
        symlink("notes.txt", fixture.staging.path().join("alias.txt")).expect("link");

        let leak = callback(
            "template: http://localhost/\nmethod: POST\ndata:\n  - name: doc\n    file: leak.txt\n",
        );
        let err = prepare_callback(&leak, &TeraEngine, &json!({}), &fixture.staging, &fixture.bundle)
            .expect_err("link leaves staging");
        assert!(matches!(err, CallbackConfigError::EscapingFile { .. }), "{err}");

        let alias = callback(
            "template: http://localhost/\nmethod: POST\ndata:\n  - name: doc\n    file: alias.txt\n    binary: false\n",
        );
        let request =
            prepare_callback(&alias, &TeraEngine, &json!({}), &fixture.staging, &fixture.bundle)
                .expect("link inside staging is fine");
        assert_eq!(request.parts[0].content, PartContent::Text("plain notes".into()));
    }

    #[tokio::test]
    async fn malformed_entry_does_not_spoil_its_siblings() {
        let fixture = fixture();
        let server = MockServer::start();
        let good = server.mock(|when, then| {
            when.method("POST")
                .path("/good")
                .body_includes("name=\"notes\"")
                .body_includes("plain notes");
            then.status(200);
        });

        let config = TemplateConfig::from_yaml_str(&format!(
            r#"
callbacks:
  nameless:
    template: "{url}/bad"
    method: POST
    data:
      - file: demo.pdf
  good:
    template: "{url}/good"
    method: POST
    data:
      - name: notes
        file: notes.txt
        binary: false
"#,
            url = server.base_url()
        ))
        .expect("one malformed callback leaves the config usable");
        let client = CallbackClient::new(Duration::from_secs(5)).expect("client");
        let mut log = JobLog::new(Uuid::new_v4());

        let summary = dispatch_callbacks(
            &config,
            &TeraEngine,
            &client,
            &json!({}),
            &fixture.staging,
            &fixture.bundle,
            &mut log,
        )
        .await;

        good.assert();
        assert_eq!(summary, DispatchSummary { sent: 1, failures: 1 });
        assert_eq!(log.warnings()[0].kind, WarningKind::CallbackConfigError);
        assert_eq!(log.warnings()[0].subject, "nameless");
        assert!(log.warnings()[0].message.contains("malformed callback"));
    }

    #[tokio::test]
    async fn error_status_is_a_transport_warning() {
        let fixture = fixture();
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("GET").path("/hook");
            then.status(503).body("maintenance");
        });

        let config = TemplateConfig::from_yaml_str(&format!(
            "callbacks:\n  notify:\n    template: \"{}\"\n    method: get\n",
            server.url("/hook")
        ))
        .expect("config");
        let client = CallbackClient::new(Duration::from_secs(5)).expect("client");
        let mut log = JobLog::new(Uuid::new_v4());

        let summary = dispatch_callbacks(
            &config,
            &TeraEngine,
            &client,
            &json!({}),
            &fixture.staging,
            &fixture.bundle,
            &mut log,
        )
        .await;

        mock.assert();
        assert_eq!(summary, DispatchSummary { sent: 1, failures: 1 });
        assert_eq!(log.warnings()[0].kind, WarningKind::CallbackTransportError);
        assert!(log.text().contains("maintenance"));
    }
}
