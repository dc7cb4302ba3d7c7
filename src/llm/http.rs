//! OpenAI-compatible HTTP language model

use super::LanguageModel;
use crate::config::{duration_secs, LlmSettings};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::network::{HttpClient, HttpRequest};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const DEPENDENCY: &str = "LanguageModel";

/// Talks to `/chat/completions` and `/embeddings` under a configurable base URL
pub struct HttpLanguageModel {
    client: HttpClient,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpLanguageModel {
    pub fn new(client: HttpClient, settings: &LlmSettings) -> Self {
        Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            timeout: duration_secs(settings.timeout_seconds, 0.1),
        }
    }

    async fn post(&self, ctx: &RequestContext, path: &str, body: Value) -> Result<Value> {
        let request = HttpRequest::post(format!("{}{}", self.endpoint, path))
            .bearer(self.api_key.as_deref())
            .timeout(self.timeout)
            .json(body);
        let response = self.client.execute_ok(ctx, DEPENDENCY, request).await?;
        response.json(DEPENDENCY)
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn complete(&self, ctx: &RequestContext, model: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "model": model,
            "temperature": 0.0,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let response = self.post(ctx, "/chat/completions", body).await?;
        let content = parse_completion(&response)?;
        debug!(model, chars = content.len(), "completion received");
        Ok(content)
    }

    async fn embed(
        &self,
        ctx: &RequestContext,
        model: &str,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({ "model": model, "input": texts });
        let response = self.post(ctx, "/embeddings", body).await?;
        let vectors = parse_embeddings(&response)?;
        if vectors.len() != texts.len() {
            return Err(Error::malformed(
                DEPENDENCY,
                format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            ));
        }
        Ok(vectors)
    }
}

fn parse_completion(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::malformed(DEPENDENCY, "completion response is missing content"))
}

fn parse_embeddings(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::malformed(DEPENDENCY, "embedding response is missing data array"))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (fallback_index, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(fallback_index);
        let embedding = item
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::malformed(DEPENDENCY, "embedding item missing vector"))?;
        let vector = embedding
            .iter()
            .map(|value| {
                value
                    .as_f64()
                    .map(|n| n as f32)
                    .ok_or_else(|| Error::malformed(DEPENDENCY, "embedding value must be numeric"))
            })
            .collect::<Result<Vec<f32>>>()?;
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}
