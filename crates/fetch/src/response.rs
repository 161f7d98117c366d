//! Parsed response bodies

use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ApiError, Result};
use crate::transport::HttpResponse;

/// Successful response body, parsed by its declared content type
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    Json(Value),
    Text(String),
    Binary(Vec<u8>),
}

impl ResponseData {
    /// `application/json` and `*+json` parse as JSON, `text/*` as text,
    /// anything else declared is binary. Without a `Content-Type` the body is
    /// sniffed: JSON, then UTF-8 text, then binary. An empty body is `Json(Null)`.
    pub fn from_response(response: &HttpResponse) -> Result<Self> {
        if response.body.is_empty() {
            return Ok(ResponseData::Json(Value::Null));
        }

        let content_type = response
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());

        match content_type.as_deref() {
            Some(ct) if ct == "application/json" || ct.ends_with("+json") => {
                serde_json::from_slice(&response.body)
                    .map(ResponseData::Json)
                    .map_err(|e| ApiError::Decode(e.to_string()))
            }
            Some(ct) if ct.starts_with("text/") => String::from_utf8(response.body.clone())
                .map(ResponseData::Text)
                .map_err(|e| ApiError::Decode(e.to_string())),
            Some(_) => Ok(ResponseData::Binary(response.body.clone())),
            None => Ok(sniff(&response.body)),
        }
    }

    /// Deserialize into `T`. Text bodies are parsed as JSON text.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let parsed = match self {
            ResponseData::Json(value) => serde_json::from_value(value.clone()),
            ResponseData::Text(text) => serde_json::from_str(text),
            ResponseData::Binary(bytes) => serde_json::from_slice(bytes),
        };
        parsed.map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseData::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseData::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            ResponseData::Json(value) => value.to_string().into_bytes(),
            ResponseData::Text(text) => text.into_bytes(),
            ResponseData::Binary(bytes) => bytes,
        }
    }
}

fn sniff(body: &[u8]) -> ResponseData {
    if let Ok(value) = serde_json::from_slice(body) {
        return ResponseData::Json(value);
    }
    match String::from_utf8(body.to_vec()) {
        Ok(text) => ResponseData::Text(text),
        Err(e) => ResponseData::Binary(e.into_bytes()),
    }
}
