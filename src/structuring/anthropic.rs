//! Direct Anthropic client for transcript structuring.
//!
//! Connects to the Anthropic Messages API with the caller's own API key and
//! returns the raw text of the model reply. Parsing and retry policy live in
//! the structuring facade.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;
use zeroize::Zeroize;

use super::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use crate::error::UpdateError;

/// Anthropic Messages API endpoint
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// API version header required by the Messages API
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Model used for structuring calls
const STRUCTURE_MODEL: &str = "claude-haiku-4-5-20251001";

/// Upper bound for a structured response
const MAX_RESPONSE_TOKENS: u32 = 8192;

/// Client for direct Anthropic Messages API calls.
pub(crate) struct AnthropicClient {
    api_key: String,
    client: reqwest::Client,
}

/// Request body for the Messages API.
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

/// Message in the Anthropic request.
#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// Response from the Messages API.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

/// Content block in the response.
#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

impl AnthropicClient {
    /// Create a new Anthropic client with the given API key.
    pub(crate) fn new(api_key: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client for AnthropicClient")?;

        Ok(Self {
            api_key: api_key.to_string(),
            client,
        })
    }

    /// Run one structuring call and return the raw model reply.
    #[instrument(skip(self, system, user), fields(user_len = user.len()))]
    pub(crate) async fn complete(&self, system: &str, user: &str) -> Result<String, UpdateError> {
        let request_body = MessagesRequest {
            model: STRUCTURE_MODEL.to_string(),
            max_tokens: MAX_RESPONSE_TOKENS,
            system: system.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: user.to_string(),
            }],
        };

        let result = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await;

        match result {
            Ok(response) => {
                if response.status().is_success() {
                    let parsed: MessagesResponse = response.json().await.map_err(|e| {
                        UpdateError::StructureParse(format!(
                            "Failed to decode Anthropic response: {e}"
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

    /// Extract the first text block from the response.
    fn extract_text(response: &MessagesResponse) -> Result<String, UpdateError> {
        response
            .content
            .iter()
            .find(|block| block.block_type == "text")
            .map(|block| block.text.clone())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                UpdateError::StructureParse("No text content in Anthropic response".into())
            })
    }
}

impl Drop for AnthropicClient {
    fn drop(&mut self) {
        // Clear API key from memory
        self.api_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anthropic_request_serialization() {
        let request = MessagesRequest {
            model: STRUCTURE_MODEL.to_string(),
            max_tokens: MAX_RESPONSE_TOKENS,
            system: "System instruction".to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: "Transcript text".to_string(),
            }],
        };

        let json = serde_json::to_string(&request).expect("Failed to serialize");
        assert!(json.contains("claude-haiku-4-5-20251001"));
        assert!(json.contains("\"system\":\"System instruction\""));
        assert!(json.contains("Transcript text"));
    }

    #[test]
    fn test_anthropic_response_deserialization() {
        let json = r#"{
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "text", "text": "{\"root\": {}}"}
            ],
            "model": "claude-haiku-4-5-20251001",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 100, "output_tokens": 50}
        }"#;

        let response: MessagesResponse = serde_json::from_str(json).expect("Failed to deserialize");
        let text = AnthropicClient::extract_text(&response).expect("Failed to extract text");
        assert_eq!(text, "{\"root\": {}}");
    }

    #[test]
    fn test_extract_text_skips_non_text_blocks() {
        let json = r#"{
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "the map"}
            ]
        }"#;
        let response: MessagesResponse = serde_json::from_str(json).expect("Failed to deserialize");
        let text = AnthropicClient::extract_text(&response).expect("Failed to extract text");
        assert_eq!(text, "the map");
    }

    #[test]
    fn test_extract_text_rejects_empty_content() {
        let response: MessagesResponse =
            serde_json::from_str(r#"{"content": []}"#).expect("Failed to deserialize");
        let error = AnthropicClient::extract_text(&response).expect_err("Expected parse failure");
        assert!(error.is_parse());
    }
}
