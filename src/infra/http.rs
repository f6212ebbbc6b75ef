//! Outbound HTTP client used by the callback stage.

use std::time::Duration;

use reqwest::{
    Client, Method, StatusCode, Url,
    header::HeaderMap,
    multipart::{Form, Part},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallbackSendError {
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("invalid content type `{mime}` for part `{name}`: {source}")]
    InvalidPart {
        name: String,
        mime: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
}

/// Body of one multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartContent {
    Binary { bytes: Vec<u8>, mime: String },
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPart {
    pub name: String,
    pub file_name: String,
    pub content: PartContent,
}

/// A fully resolved callback request. Without parts it is sent with no body.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub parts: Vec<OutboundPart>,
}

#[derive(Debug, Clone)]
pub struct CallbackResponse {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct CallbackClient {
    client: Client,
    timeout: Duration,
}

impl CallbackClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }

    pub fn user_agent() -> &'static str {
        concat!("httypist/", env!("CARGO_PKG_VERSION"))
    }

    pub async fn send(&self, request: OutboundRequest) -> Result<CallbackResponse, CallbackSendError> {
        let OutboundRequest {
            method,
            url,
            headers,
            parts,
        } = request;

        let mut builder = self.client.request(method, url).headers(headers);
        if !parts.is_empty() {
            builder = builder.multipart(build_form(parts)?);
        }

        let response = builder.send().await.map_err(|err| self.classify(err))?;
        let status = response.status();
        let body = response.text().await.map_err(|err| self.classify(err))?;
        Ok(CallbackResponse { status, body })
    }

    fn classify(&self, err: reqwest::Error) -> CallbackSendError {
        if err.is_timeout() {
            CallbackSendError::Timeout(self.timeout)
        } else {
            CallbackSendError::Transport(err)
        }
    }
}

fn build_form(parts: Vec<OutboundPart>) -> Result<Form, CallbackSendError> {
    let mut form = Form::new();
    for OutboundPart {
        name,
        file_name,
        content,
    } in parts
    {
        let part = match content {
            PartContent::Binary { bytes, mime } => Part::bytes(bytes)
                .file_name(file_name)
                .mime_str(&mime)
                .map_err(|source| CallbackSendError::InvalidPart {
                    name: name.clone(),
                    mime: mime.clone(),
                    source,
                })?,
            PartContent::Text(text) => Part::text(text).file_name(file_name),
        };
        form = form.part(name, part);
    }
    Ok(form)
}
