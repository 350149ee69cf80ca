//! User settings storage
//!
//! Handles saving and loading engine settings to a JSON file
//! in the application support directory. The scheduler never reads this
//! file directly; the runner resolves settings once and passes them in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::{error, info};

/// Reasoning provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum LlmProvider {
    #[default]
    Anthropic,
    OpenAI,
}

impl LlmProvider {
    /// Name used in request payloads to the extraction service.
    pub(crate) fn wire_name(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::OpenAI => "openai",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProvider::Anthropic => write!(f, "Anthropic"),
            LlmProvider::OpenAI => write!(f, "OpenAI"),
        }
    }
}

/// How aggressively the structuring service reinterprets what was said
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum InterpretationLevel {
    /// Reproduce statements close to verbatim, minimal grouping
    Literal,
    /// Group by theme, allow re-labeling for clarity
    #[default]
    Thematic,
    /// Surface tensions, assumptions and contradictions
    Critical,
}

impl fmt::Display for InterpretationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpretationLevel::Literal => write!(f, "Literal"),
            InterpretationLevel::Thematic => write!(f, "Thematic"),
            InterpretationLevel::Critical => write!(f, "Critical"),
        }
    }
}

/// Engine settings
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Settings {
    /// Reasoning provider selection (Anthropic or OpenAI)
    pub llm_provider: Option<LlmProvider>,
    /// Interpretation level for structuring calls
    /// Defaults to Thematic if not set
    pub interpretation_level: Option<InterpretationLevel>,
    /// Base URL of the remote graph extraction service (None = tree mode only)
    pub extraction_url: Option<String>,
    /// Custom session storage location (None = use default)
    pub session_location: Option<PathBuf>,
}

/// Get the settings file path
fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("Mindmesh").join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or can't be read
pub(crate) fn load_settings() -> Settings {
    let Some(path) = settings_path() else {
        return Settings::default();
    };

    if !path.exists() {
        return Settings::default();
    }

    match fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                error!("Failed to parse settings: {}", e);
                Settings::default()
            }
        },
        Err(e) => {
            error!("Failed to read settings file: {}", e);
            Settings::default()
        }
    }
}

/// Save settings to disk
pub(crate) fn save_settings(settings: &Settings) -> Result<(), SettingsError> {
    let path = settings_path().ok_or(SettingsError::NoConfigDir)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            info!("Created settings directory: {:?}", parent);
        }
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(&path, json)?;
    info!("Saved settings to: {:?}", path);

    Ok(())
}

/// Get the selected reasoning provider
/// Returns Anthropic (default) if not set
pub(crate) fn get_llm_provider() -> LlmProvider {
    load_settings().llm_provider.unwrap_or_default()
}

/// Set the reasoning provider
pub(crate) fn set_llm_provider(provider: LlmProvider) -> Result<(), SettingsError> {
    let mut settings = load_settings();
    settings.llm_provider = Some(provider);
    save_settings(&settings)
}

/// Get the interpretation level for structuring calls
/// Returns Thematic if not set
pub(crate) fn get_interpretation_level() -> InterpretationLevel {
    load_settings().interpretation_level.unwrap_or_default()
}

/// Set the interpretation level
pub(crate) fn set_interpretation_level(level: InterpretationLevel) -> Result<(), SettingsError> {
    let mut settings = load_settings();
    settings.interpretation_level = Some(level);
    save_settings(&settings)
}

/// Get the extraction service base URL, if configured
pub(crate) fn get_extraction_url() -> Option<String> {
    load_settings().extraction_url.filter(|u| !u.is_empty())
}

/// Set the extraction service base URL
pub(crate) fn set_extraction_url(url: Option<String>) -> Result<(), SettingsError> {
    let mut settings = load_settings();
    settings.extraction_url = url;
    save_settings(&settings)
}

/// Get the custom session storage location, if set
pub(crate) fn get_session_location() -> Option<PathBuf> {
    load_settings().session_location
}

/// Set a custom session storage location
pub(crate) fn set_session_location(path: Option<PathBuf>) -> Result<(), SettingsError> {
    let mut settings = load_settings();
    settings.session_location = path;
    save_settings(&settings)
}

/// Get the default session storage location
pub(crate) fn default_session_location() -> Option<PathBuf> {
    dirs::document_dir().map(|d| d.join("Mindmesh").join("sessions"))
}

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub(crate) enum SettingsError {
    #[error("Could not find config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.llm_provider.is_none());
        assert!(settings.interpretation_level.is_none());
        assert!(settings.extraction_url.is_none());
        assert!(settings.session_location.is_none());
    }

    #[test]
    fn test_llm_provider_default() {
        assert_eq!(LlmProvider::default(), LlmProvider::Anthropic);
    }

    #[test]
    fn test_llm_provider_display() {
        assert_eq!(format!("{}", LlmProvider::Anthropic), "Anthropic");
        assert_eq!(format!("{}", LlmProvider::OpenAI), "OpenAI");
    }

    #[test]
    fn test_llm_provider_wire_name_matches_serde() {
        let json = serde_json::to_string(&LlmProvider::Anthropic).expect("Failed to serialize");
        assert_eq!(json, format!("\"{}\"", LlmProvider::Anthropic.wire_name()));
        let json = serde_json::to_string(&LlmProvider::OpenAI).expect("Failed to serialize");
        assert_eq!(json, format!("\"{}\"", LlmProvider::OpenAI.wire_name()));
    }

    #[test]
    fn test_interpretation_level_default() {
        assert_eq!(
            InterpretationLevel::default(),
            InterpretationLevel::Thematic
        );
    }

    #[test]
    fn test_interpretation_level_roundtrip() {
        for level in [
            InterpretationLevel::Literal,
            InterpretationLevel::Thematic,
            InterpretationLevel::Critical,
        ] {
            let json = serde_json::to_string(&level).expect("Failed to serialize");
            let back: InterpretationLevel =
                serde_json::from_str(&json).expect("Failed to deserialize");
            assert_eq!(back, level);
        }
    }

    #[test]
    fn test_settings_path() {
        let path = settings_path();
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.ends_with("Mindmesh/settings.json"));
    }

    #[test]
    fn test_default_session_location() {
        let path = default_session_location();
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.ends_with("Mindmesh/sessions"));
    }
}
