use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::constants::{defaults, endpoints, models};
use crate::error::AntharaError;
use crate::llm::{GeminiClient, LlmClient};
use crate::speech::{CommandSpeech, SilentSpeech, SpeechSynthesizer};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub speech: SpeechSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_key_env: String,
    pub base_url: String,
    pub text_model: String,
    pub classifier_model: String,
    pub image_model: String,
    pub edit_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub web_grounding: bool,
    pub max_history: usize,
    pub classify_intent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    pub enabled: bool,
    pub command: String,
    pub args: Vec<String>,
    pub voice: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key_env: endpoints::API_KEY_ENV.to_string(),
            base_url: endpoints::GEMINI_BASE_URL.to_string(),
            text_model: models::TEXT_MODEL.to_string(),
            classifier_model: models::CLASSIFIER_MODEL.to_string(),
            image_model: models::IMAGE_MODEL.to_string(),
            edit_model: models::EDIT_MODEL.to_string(),
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            web_grounding: defaults::WEB_GROUNDING,
            max_history: defaults::MAX_HISTORY,
            classify_intent: defaults::CLASSIFY_INTENT,
        }
    }
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            command: defaults::SPEECH_COMMAND.to_string(),
            args: Vec::new(),
            voice: None,
        }
    }
}

impl Settings {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("anthara")
            .join("config.toml")
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`. A missing or unparseable file yields defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Could not read config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<(), AntharaError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), AntharaError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AntharaError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve the API key: the configured variable first, then the
    /// well-known fallbacks. Blank values count as unset.
    pub fn api_key(&self) -> Option<String> {
        std::iter::once(self.provider.api_key_env.as_str())
            .chain(endpoints::API_KEY_FALLBACK_ENVS.iter().copied())
            .filter(|name| !name.is_empty())
            .find_map(|name| {
                std::env::var(name)
                    .ok()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
    }

    /// Build the provider client. Fails when no credential is configured.
    pub fn build_client(&self) -> Result<Arc<dyn LlmClient>, AntharaError> {
        let api_key = self.api_key().ok_or_else(|| {
            AntharaError::Config(format!(
                "{} environment variable not set. Please set it to use Anthara.",
                self.provider.api_key_env
            ))
        })?;

        let client = GeminiClient::new(api_key)
            .with_base_url(self.provider.base_url.clone())
            .with_text_model(self.provider.text_model.clone())
            .with_classifier_model(self.provider.classifier_model.clone())
            .with_image_model(self.provider.image_model.clone())
            .with_edit_model(self.provider.edit_model.clone());

        Ok(Arc::new(client))
    }

    pub fn build_speech(&self) -> Arc<dyn SpeechSynthesizer> {
        if self.speech.enabled {
            Arc::new(CommandSpeech::from_settings(&self.speech))
        } else {
            Arc::new(SilentSpeech)
        }
    }
}
