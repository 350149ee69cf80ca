//! Direct OpenAI client for transcript structuring.
//!
//! Connects to OpenAI's Chat Completions API with the caller's own API key
//! and returns the raw text of the model reply. Parsing and retry policy
//! live in the structuring facade.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;
use zeroize::Zeroize;

use super::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use crate::error::UpdateError;

/// OpenAI API endpoint
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Model used for structuring calls
const STRUCTURE_MODEL: &str = "gpt-4.1-mini";

/// Client for direct OpenAI Chat Completions API calls.
pub(crate) struct OpenAIClient {
    api_key: String,
    client: reqwest::Client,
}

/// Request body for OpenAI Chat Completions API.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

/// Message in the OpenAI request.
#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Response from OpenAI Chat Completions API.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

/// Choice in the response.
#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

/// Response message content.
#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OpenAIClient {
    /// Create a new OpenAI client with the given API key.
    pub(crate) fn new(api_key: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client for OpenAIClient")?;

        Ok(Self {
            api_key: api_key.to_string(),
            client,
        })
    }

    /// Run one structuring call and return the raw model reply.
    #[instrument(skip(self, system, user), fields(user_len = user.len()))]
    pub(crate) async fn complete(&self, system: &str, user: &str) -> Result<String, UpdateError> {
        let request_body = ChatCompletionRequest {
            model: STRUCTURE_MODEL.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
        };

        let result = self
            .client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await;

        match result {
            Ok(response) => {
                if response.status().is_success() {
                    let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
                        UpdateError::StructureParse(format!(
                            "Failed to decode OpenAI response: {e}"
                        ))
                    })?;
                    Self::extract_text(&parsed)
                } else {
                    let status = response.status().as_u16();
                    let message = response.text().await.unwrap_or_default();
                    Err(UpdateError::from_status(status, message))
                }
            }
            Err(e) => Err(UpdateError::from_transport(&e)),
        }
    }

    /// Extract text from the OpenAI response structure.
    fn extract_text(response: &ChatCompletionResponse) -> Result<String, UpdateError> {
        response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                UpdateError::StructureParse("No text content in OpenAI response".into())
            })
    }
}

impl Drop for OpenAIClient {
    fn drop(&mut self) {
        // Clear API key from memory
        self.api_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_request_serialization() {
        let request = ChatCompletionRequest {
            model: STRUCTURE_MODEL.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "System instruction".to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: "Transcript text".to_string(),
                },
            ],
        };

        let json = serde_json::to_string(&request).expect("Failed to serialize");
        assert!(json.contains("gpt-4.1-mini"));
        assert!(json.contains("system"));
        assert!(json.contains("Transcript text"));
    }

    #[test]
    fn test_openai_response_deserialization() {
        let json = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1677652288,
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "{\"root\": {}}"
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 9,
                "completion_tokens": 12,
                "total_tokens": 21
            }
        }"#;

        let response: ChatCompletionResponse =
            serde_json::from_str(json).expect("Failed to deserialize");
        let text = OpenAIClient::extract_text(&response).expect("Failed to extract text");
        assert_eq!(text, "{\"root\": {}}");
    }

    #[test]
    fn test_extract_text_rejects_empty_choices() {
        let response: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices": []}"#).expect("Failed to deserialize");
        let error = OpenAIClient::extract_text(&response).expect_err("Expected parse failure");
        assert!(error.is_parse());
    }
}
