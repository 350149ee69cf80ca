//! Structuring client for the reasoning service
//!
//! Stateless adapter between the scheduler and the selected LLM provider:
//! it turns (current structure, new text, interpretation level) into one
//! request, validates the reply into a canonical tree, and on a parse
//! failure - only a parse failure - retries once with an instruction to
//! return a drastically simplified map. If the retry also fails, the
//! original error is surfaced.

mod anthropic;
mod openai;
pub(crate) mod parse;
pub(crate) mod prompts;

pub(crate) use anthropic::AnthropicClient;
pub(crate) use openai::OpenAIClient;

use tracing::{instrument, warn};

use crate::error::UpdateError;
use crate::settings::{InterpretationLevel, LlmProvider};
use crate::structure::TreeStructure;

/// Deadline for one structuring or extraction call.
pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Connection timeout shared by the service clients.
pub(crate) const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Provider-selected transport for structuring calls.
pub(crate) enum ProviderClient {
    Anthropic(AnthropicClient),
    OpenAI(OpenAIClient),
}

impl ProviderClient {
    pub(crate) fn new(provider: LlmProvider, api_key: &str) -> anyhow::Result<Self> {
        match provider {
            LlmProvider::Anthropic => Ok(ProviderClient::Anthropic(AnthropicClient::new(api_key)?)),
            LlmProvider::OpenAI => Ok(ProviderClient::OpenAI(OpenAIClient::new(api_key)?)),
        }
    }

    pub(crate) fn provider(&self) -> LlmProvider {
        match self {
            ProviderClient::Anthropic(_) => LlmProvider::Anthropic,
            ProviderClient::OpenAI(_) => LlmProvider::OpenAI,
        }
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, UpdateError> {
        match self {
            ProviderClient::Anthropic(client) => client.complete(system, user).await,
            ProviderClient::OpenAI(client) => client.complete(system, user).await,
        }
    }
}

/// High-level structuring operations used by the scheduler.
pub(crate) struct StructuringClient {
    provider: ProviderClient,
}

impl StructuringClient {
    pub(crate) fn new(provider: ProviderClient) -> Self {
        StructuringClient { provider }
    }

    pub(crate) fn provider(&self) -> LlmProvider {
        self.provider.provider()
    }

    /// Extend the current tree with newly transcribed text.
    #[instrument(skip(self, current, new_text), fields(new_chars = new_text.len()))]
    pub(crate) async fn incremental_update(
        &self,
        current: &TreeStructure,
        new_text: &str,
        level: InterpretationLevel,
    ) -> Result<TreeStructure, UpdateError> {
        let payload = prompts::incremental_payload(current, new_text);
        self.structured_call(&payload, level).await
    }

    /// Rebuild the whole tree from the transcript tail.
    #[instrument(skip(self, transcript), fields(transcript_chars = transcript.len()))]
    pub(crate) async fn full_regeneration(
        &self,
        transcript: &str,
        level: InterpretationLevel,
    ) -> Result<TreeStructure, UpdateError> {
        let payload = prompts::regeneration_payload(transcript);
        self.structured_call(&payload, level).await
    }

    async fn structured_call(
        &self,
        payload: &str,
        level: InterpretationLevel,
    ) -> Result<TreeStructure, UpdateError> {
        let raw = self
            .provider
            .complete(&prompts::system_instruction(level), payload)
            .await?;

        match parse::parse_structure_response(&raw) {
            Ok(tree) => Ok(tree),
            Err(original) if original.is_parse() => {
                warn!(
                    error = %original,
                    provider = %self.provider.provider(),
                    "Structure response unparseable, retrying once with simplified instruction"
                );
                let amended = prompts::simplified_instruction(level);
                match self.provider.complete(&amended, payload).await {
                    Ok(retry_raw) => parse::parse_structure_response(&retry_raw)
                        .map_err(|_| original),
                    Err(_) => Err(original),
                }
            }
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_client_builds_for_both_providers() {
        let anthropic = ProviderClient::new(LlmProvider::Anthropic, "sk-ant-test")
            .expect("Failed to build Anthropic client");
        assert_eq!(anthropic.provider(), LlmProvider::Anthropic);

        let openai = ProviderClient::new(LlmProvider::OpenAI, "sk-test")
            .expect("Failed to build OpenAI client");
        assert_eq!(openai.provider(), LlmProvider::OpenAI);
    }
}
