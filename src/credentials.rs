//! Provider credential resolution
//!
//! API keys come from the environment (optionally loaded from a `.env` file
//! by the runner) so the engine behaves identically on every platform. Keys
//! live only as long as the clients holding them and are zeroized on drop.

use crate::error::CredentialsError;
use crate::settings::LlmProvider;
use zeroize::Zeroize;

/// Environment variable holding the Anthropic API key
const ANTHROPIC_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Environment variable holding the OpenAI API key
const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";

/// Credentials for the selected reasoning provider
#[derive(Debug)]
pub(crate) struct ProviderCredentials {
    /// Key for the selected provider
    pub api_key: String,
    /// OpenAI key forwarded to the extraction service for embeddings when
    /// the main provider cannot supply them
    pub embedder_api_key: Option<String>,
}

impl Drop for ProviderCredentials {
    fn drop(&mut self) {
        self.api_key.zeroize();
        if let Some(key) = &mut self.embedder_api_key {
            key.zeroize();
        }
    }
}

/// Environment variable name for a provider's API key
fn key_var(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Anthropic => ANTHROPIC_KEY_VAR,
        LlmProvider::OpenAI => OPENAI_KEY_VAR,
    }
}

/// Validate a raw key value read from the environment
fn validated(value: Option<String>, var: &str) -> Result<String, CredentialsError> {
    let value = value.ok_or_else(|| CredentialsError::MissingKey(var.to_string()))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CredentialsError::MissingKey(var.to_string()));
    }
    if trimmed.contains(char::is_whitespace) {
        return Err(CredentialsError::InvalidData(format!(
            "{var} contains embedded whitespace"
        )));
    }
    Ok(trimmed.to_string())
}

/// Resolve credentials for the given provider from the environment
///
/// When the provider is Anthropic, the OpenAI key is also picked up if
/// present because the extraction service uses it for embeddings.
pub(crate) fn resolve(provider: LlmProvider) -> Result<ProviderCredentials, CredentialsError> {
    let var = key_var(provider);
    let api_key = validated(std::env::var(var).ok(), var)?;

    let embedder_api_key = match provider {
        // The provider key doubles as the embedder key
        LlmProvider::OpenAI => None,
        LlmProvider::Anthropic => std::env::var(OPENAI_KEY_VAR)
            .ok()
            .and_then(|raw| validated(Some(raw), OPENAI_KEY_VAR).ok()),
    };

    Ok(ProviderCredentials {
        api_key,
        embedder_api_key,
    })
}

/// Check whether a usable key is configured for the given provider
pub(crate) fn has_credentials(provider: LlmProvider) -> bool {
    resolve(provider).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_var_mapping() {
        assert_eq!(key_var(LlmProvider::Anthropic), "ANTHROPIC_API_KEY");
        assert_eq!(key_var(LlmProvider::OpenAI), "OPENAI_API_KEY");
    }

    #[test]
    fn test_validated_accepts_trimmed_key() {
        let key = validated(Some("  sk-test-123  ".to_string()), "TEST_VAR")
            .expect("Failed to validate key");
        assert_eq!(key, "sk-test-123");
    }

    #[test]
    fn test_validated_rejects_missing_key() {
        let result = validated(None, "TEST_VAR");
        assert!(matches!(result, Err(CredentialsError::MissingKey(_))));
    }

    #[test]
    fn test_validated_rejects_empty_key() {
        let result = validated(Some("   ".to_string()), "TEST_VAR");
        assert!(matches!(result, Err(CredentialsError::MissingKey(_))));
    }

    #[test]
    fn test_validated_rejects_embedded_whitespace() {
        let result = validated(Some("sk-test 123".to_string()), "TEST_VAR");
        assert!(matches!(result, Err(CredentialsError::InvalidData(_))));
    }
}
