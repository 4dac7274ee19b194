//! OpenAI-compatible chat completion client for the policy model server.
//!
//! Provides typed request/response structures, a single-request
//! [`InferenceClient::chat`] and an order-preserving, bounded-concurrency
//! [`InferenceClient::generate_batch`].

use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::message::Message;
use crate::config::InferenceConfig;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Sampling parameters. `None` fields are left to the server's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_special_tokens: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(flatten)]
    params: &'a SamplingParams,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

/// Text of the first choice plus the server-separated reasoning, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub reasoning: String,
}

impl ChatResponse {
    fn into_completion(self) -> Completion {
        self.choices
            .into_iter()
            .next()
            .map(|c| Completion {
                text: c.message.content.unwrap_or_default(),
                reasoning: c.message.reasoning_content.unwrap_or_default(),
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for a served policy model.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    api_base: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
}

impl InferenceClient {
    /// Create a client for `model` served at `base_url` (e.g. `http://localhost:8000/v1`).
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            api_base: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            http,
        })
    }

    pub fn from_config(config: &InferenceConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            &config.api_key,
            &config.model,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one chat completion request.
    ///
    /// Calls `POST {base_url}/chat/completions`. A non-success status is an
    /// error carrying the response body. An empty choice list yields an empty
    /// completion.
    pub async fn chat(&self, messages: &[Message], params: &SamplingParams) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.api_base);
        debug!(model = %self.model, messages = messages.len(), "sending chat completion request");

        let body = ChatRequest {
            model: &self.model,
            messages,
            params,
        };
        let mut request = self.http.post(&url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let resp = request
            .send()
            .await
            .context("failed to send chat completion request")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("chat completion API returned {status}: {text}");
        }

        let chat_response: ChatResponse = resp
            .json()
            .await
            .context("failed to parse chat completion response")?;

        if let Some(usage) = &chat_response.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion succeeded"
            );
        }
        Ok(chat_response.into_completion())
    }

    /// Run many chat requests with at most `max_concurrency` in flight.
    ///
    /// Results come back in input order. A failed request is logged and
    /// yields an empty completion instead of aborting the batch.
    pub async fn generate_batch(
        &self,
        inputs: &[Vec<Message>],
        params: &SamplingParams,
        max_concurrency: usize,
    ) -> Vec<Completion> {
        info!(
            requests = inputs.len(),
            max_concurrency, "starting batch generation"
        );
        stream::iter(inputs.iter().enumerate())
            .map(|(index, messages)| async move {
                match self.chat(messages, params).await {
                    Ok(completion) => completion,
                    Err(e) => {
                        warn!(index, error = %e, "chat request failed, using empty completion");
                        Completion::default()
                    }
                }
            })
            .buffered(max_concurrency.max(1))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_omits_unset_params() {
        let params = SamplingParams {
            temperature: Some(0.7),
            top_k: Some(50),
            ..SamplingParams::default()
        };
        let messages = vec![Message::user("hi")];
        let body = serde_json::to_value(ChatRequest {
            model: "m",
            messages: &messages,
            params: &params,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "model": "m",
                "messages": [{"role": "user", "content": "hi"}],
                "temperature": 0.7,
                "top_k": 50
            })
        );
    }

    #[test]
    fn reasoning_content_is_separated() {
        let resp: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "Action: Wait", "reasoning_content": "hmm"}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        }))
        .unwrap();
        assert_eq!(
            resp.into_completion(),
            Completion {
                text: "Action: Wait".into(),
                reasoning: "hmm".into()
            }
        );
    }

    #[test]
    fn empty_choices_give_empty_completion() {
        let resp: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert_eq!(resp.into_completion(), Completion::default());
    }

    #[tokio::test]
    async fn unreachable_server_yields_empty_completions_in_order() {
        let client = InferenceClient::new(
            "http://127.0.0.1:9/v1",
            "",
            "m",
            Duration::from_millis(500),
        )
        .unwrap();
        let inputs = vec![vec![Message::user("a")], vec![Message::user("b")]];
        let out = client
            .generate_batch(&inputs, &SamplingParams::default(), 4)
            .await;
        assert_eq!(out, vec![Completion::default(); 2]);
    }
}
