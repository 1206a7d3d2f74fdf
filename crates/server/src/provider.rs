//! HTTP completion client for OpenAI-compatible chat endpoints.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use herald_agent::llm::{CompletionClient, CompletionRequest};
use herald_core::config::LlmConfig;
use herald_core::PipelineError;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

pub struct HttpCompletionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpCompletionClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| PipelineError::Provider(format!("http client: {err}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, PipelineError> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![
                ChatMessage { role: "system", content: &request.system },
                ChatMessage { role: "user", content: &request.user },
            ],
        };

        let mut http_request =
            self.http.post(format!("{}/chat/completions", self.base_url)).json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key.expose_secret());
        }

        let response = http_request
            .send()
            .await
            .map_err(|err| PipelineError::Provider(format!("request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Provider(format!("provider returned {status}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::Provider(format!("bad response body: {err}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| PipelineError::Provider("response had no choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::ChatResponse;

    #[test]
    fn response_content_deserializes() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"{\"intent\":\"TALK\",\"response\":\"hi\"}"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.choices[0].message.content.contains("TALK"));
    }

    #[test]
    fn empty_choices_deserialize_to_an_empty_list() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(parsed.choices.is_empty());
    }
}
