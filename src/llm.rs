//! Model-service client.
//!
//! Thin wrapper over an OpenAI-compatible chat-completions endpoint with a
//! text and a vision entry point. Both may fail; every caller provides its
//! own fallback, so failures never escape an agent invocation.

use crate::models::Config;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct ModelClient {
    http: reqwest::Client,
    endpoint: Option<String>,
    api_key: String,
    api_version: String,
    text_deployment: String,
    vision_deployment: String,
}

impl ModelClient {
    pub fn from_config(http: reqwest::Client, config: &Config) -> Self {
        let endpoint = match (&config.model_endpoint, &config.model_api_key) {
            (Some(endpoint), Some(_)) => Some(endpoint.trim_end_matches('/').to_string()),
            _ => None,
        };
        Self {
            http,
            endpoint,
            api_key: config.model_api_key.clone().unwrap_or_default(),
            api_version: config.model_api_version.clone(),
            text_deployment: config.model_deployment.clone(),
            vision_deployment: config.vision_deployment.clone(),
        }
    }

    /// Client with no endpoint configured; every call returns an error and
    /// callers fall back. Used in tests and keyless deployments.
    pub fn disabled(http: reqwest::Client) -> Self {
        Self {
            http,
            endpoint: None,
            api_key: String::new(),
            api_version: String::new(),
            text_deployment: String::new(),
            vision_deployment: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Text completion over `(role, content)` messages.
    pub async fn chat_completion(
        &self,
        messages: &[(&str, String)],
        temperature: f64,
        max_tokens: u32,
        json_mode: bool,
    ) -> Result<String> {
        let body = ChatRequest {
            messages: messages
                .iter()
                .map(|(role, content)| ChatMessage {
                    role: role.to_string(),
                    content: Value::String(content.clone()),
                })
                .collect(),
            temperature,
            max_tokens,
            response_format: json_mode.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        };
        self.send(&self.text_deployment, body).await
    }

    /// Vision completion: one user message carrying a prompt plus a base64
    /// PNG image.
    pub async fn chat_completion_with_image(
        &self,
        prompt: &str,
        image_base64: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String> {
        let content = serde_json::json!([
            {"type": "text", "text": prompt},
            {"type": "image_url",
             "image_url": {"url": format!("data:image/png;base64,{image_base64}")}},
        ]);
        let body = ChatRequest {
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content,
            }],
            temperature,
            max_tokens,
            response_format: None,
        };
        self.send(&self.vision_deployment, body).await
    }

    async fn send(&self, deployment: &str, body: ChatRequest) -> Result<String> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| anyhow!("model service not configured"))?;

        let url = format!(
            "{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={}",
            self.api_version
        );

        let resp = self
            .http
            .post(&url)
            .timeout(DEFAULT_TIMEOUT)
            .header("api-key", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .context("model request")?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let snippet: String = text.chars().take(800).collect();
            return Err(anyhow!("model service {}: {}", status.as_u16(), snippet));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).context("model json parse")?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.trim().to_string())
            .unwrap_or_default();
        Ok(content)
    }
}

/// Parse a model JSON response: strips code fences and unwraps the
/// `{"transactions": [...]}` shape some responses use.
pub fn parse_model_json(raw: &str) -> Result<Value> {
    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }
    let parsed: Value = serde_json::from_str(text.trim()).context("parse model json")?;
    if let Value::Object(ref map) = parsed {
        if let Some(txns) = map.get("transactions") {
            return Ok(txns.clone());
        }
    }
    Ok(parsed)
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Value,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageOut>,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fences() {
        let raw = "```json\n[{\"a\": 1}]\n```";
        let v = parse_model_json(raw).unwrap();
        assert!(v.is_array());
        assert_eq!(v[0]["a"], 1);
    }

    #[test]
    fn unwraps_transactions_object() {
        let raw = r#"{"transactions": [{"balance": 10.0}]}"#;
        let v = parse_model_json(raw).unwrap();
        assert!(v.is_array());
        assert_eq!(v[0]["balance"], 10.0);
    }

    #[test]
    fn plain_object_passes_through() {
        let v = parse_model_json(r#"{"bank": "OCBC"}"#).unwrap();
        assert_eq!(v["bank"], "OCBC");
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_model_json("not json at all").is_err());
    }

    #[tokio::test]
    async fn disabled_client_fails_fast() {
        let client = ModelClient::disabled(reqwest::Client::new());
        assert!(!client.is_enabled());
        let err = client
            .chat_completion(&[("user", "hello".to_string())], 0.0, 10, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
