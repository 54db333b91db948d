//! Named-entity enrichment through a CoreNLP-compatible HTTP server.
//!
//! Enrichment is optional and best effort: callers turn every error into a
//! null field.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid JSON response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected response shape: missing {0}")]
    Shape(&'static str),
}

#[async_trait]
pub trait Annotate: Send + Sync {
    async fn annotate(&self, text: &str) -> Result<Value, EnrichError>;
}

pub struct CoreNlpClient {
    client: reqwest::Client,
    base_url: String,
    properties: String,
}

impl CoreNlpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EnrichError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(CoreNlpClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            properties: json!({ "annotators": "ner", "outputFormat": "json" }).to_string(),
        })
    }
}

#[async_trait]
impl Annotate for CoreNlpClient {
    async fn annotate(&self, text: &str) -> Result<Value, EnrichError> {
        let body = self
            .client
            .post(format!("{}/", self.base_url))
            .query(&[("properties", self.properties.as_str())])
            .body(text.to_string())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let parsed: Value = serde_json::from_str(&body)?;
        entity_mentions(&parsed)
    }
}

/// Entity mentions of the first sentence.
pub fn entity_mentions(response: &Value) -> Result<Value, EnrichError> {
    response
        .get("sentences")
        .and_then(|s| s.get(0))
        .ok_or(EnrichError::Shape("sentences[0]"))?
        .get("entitymentions")
        .cloned()
        .ok_or(EnrichError::Shape("entitymentions"))
}
