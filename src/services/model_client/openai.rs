use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use super::{ModelRequest, ModelTransport, TransportError};
use crate::core::config::Settings;

/// Chat-completions transport. Requests a JSON-schema constrained reply and classifies failures.
#[derive(Debug, Clone)]
pub(crate) struct OpenAiTransport {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
}

impl OpenAiTransport {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(settings.ai().request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.ai().openai_api_key.clone(),
            base_url: settings.ai().openai_base_url.trim_end_matches('/').to_string(),
            model: settings.ai().ai_model.clone(),
            temperature: settings.ai().ai_temperature,
        })
    }

    fn payload(&self, request: &ModelRequest) -> Value {
        let mut messages = vec![
            json!({"role": "system", "content": request.system_prompt}),
            json!({"role": "user", "content": request.user_prompt}),
        ];
        if let Some(correction) = &request.correction {
            messages.push(json!({
                "role": "user",
                "content": format!(
                    "Your previous reply was rejected ({correction}). \
                     Reply again with one JSON object that satisfies the schema exactly."
                )
            }));
        }

        json!({
            "model": self.model,
            "messages": messages,
            "max_completion_tokens": request.max_output_tokens,
            "temperature": self.temperature,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "schema": request.json_schema,
                    "strict": false
                }
            }
        })
    }
}

#[async_trait]
impl ModelTransport for OpenAiTransport {
    async fn complete(&self, request: &ModelRequest) -> Result<String, TransportError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.payload(request))
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_send_error)?;

        if !status.is_success() {
            let detail = format!("HTTP {}: {}", status.as_u16(), truncate(&body, 300));
            return Err(if is_transient_status(status) {
                TransportError::Transient(detail)
            } else {
                TransportError::Fatal(detail)
            });
        }

        extract_content(&body)
    }
}

/// Rate limiting, timeouts and 5xx are worth retrying. Every other failure status is final.
pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::CONFLICT
        || status.is_server_error()
}

fn classify_send_error(err: reqwest::Error) -> TransportError {
    if err.is_builder() {
        return TransportError::Fatal(format!("invalid request: {err}"));
    }
    if err.is_timeout() {
        return TransportError::Transient(format!("request timed out: {err}"));
    }
    TransportError::Transient(format!("request failed: {err}"))
}

/// Pulls the assistant text out of a successful response body.
pub(crate) fn extract_content(body: &str) -> Result<String, TransportError> {
    let value: Value = serde_json::from_str(body).map_err(|err| {
        TransportError::Transient(format!("response body is not JSON: {err}"))
    })?;

    let message = value
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"));

    if let Some(refusal) = message.and_then(|message| message.get("refusal")).and_then(Value::as_str)
    {
        return Err(TransportError::Fatal(format!("model refused: {refusal}")));
    }

    message
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .filter(|content| !content.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| TransportError::Transient(String::from("missing response content")))
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
