//! HTTP transport seam
//!
//! The client never talks to `reqwest` directly; it hands an [`HttpRequest`]
//! to whatever [`HttpTransport`] it was built with. Tests plug in scripted
//! transports, production uses [`ReqwestTransport`].

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use url::Url;
use uuid::Uuid;

use crate::error::{ApiError, Result};

/// Outbound request, fully resolved
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request ID - UUIDv7, shows up in logs and failure events
    pub id: Uuid,
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(Vec<FormPart>),
}

impl RequestBody {
    /// Serialized form used in cache keys
    pub fn cache_fragment(&self) -> String {
        match self {
            RequestBody::Empty => String::new(),
            RequestBody::Json(value) => value.to_string(),
            RequestBody::Multipart(parts) => {
                let fields: Vec<String> = parts.iter().map(FormPart::cache_fragment).collect();
                format!("multipart[{}]", fields.join(","))
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }
}

/// One field of a multipart upload
#[derive(Debug, Clone, PartialEq)]
pub struct FormPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_name: None,
            content_type: None,
            data: value.into().into_bytes(),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            file_name: Some(file_name.into()),
            content_type: Some(content_type.into()),
            data,
        }
    }

    /// `name;file=..;type=..;<len>b#<digest>`, distinct for distinct contents
    fn cache_fragment(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.data.hash(&mut hasher);
        format!(
            "{};file={};type={};{}b#{:016x}",
            self.name,
            self.file_name.as_deref().unwrap_or(""),
            self.content_type.as_deref().unwrap_or(""),
            self.data.len(),
            hasher.finish()
        )
    }
}

/// Raw response; status classification happens in the client
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Sends one request and returns whatever the server answered.
///
/// Non-2xx statuses are NOT errors at this layer; only failures to obtain a
/// response at all are.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Default transport backed by `reqwest`
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.body(
                serde_json::to_vec(&value).map_err(|e| ApiError::Encode(e.to_string()))?,
            ),
            RequestBody::Multipart(parts) => builder.multipart(multipart_form(parts)?),
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn multipart_form(parts: Vec<FormPart>) -> Result<reqwest::multipart::Form> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        let mut field = reqwest::multipart::Part::bytes(part.data);
        if let Some(file_name) = part.file_name {
            field = field.file_name(file_name);
        }
        if let Some(content_type) = part.content_type {
            field = field
                .mime_str(&content_type)
                .map_err(|e| ApiError::Encode(e.to_string()))?;
        }
        form = form.part(part.name, field);
    }
    Ok(form)
}
