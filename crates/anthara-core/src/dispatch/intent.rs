use crate::error::AntharaError;
use crate::llm::LlmClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Closed set of request modes the classifier may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentMode {
    Search,
    Conversation,
    Explanation,
    ImageGeneration,
    ImageEdit,
}

impl IntentMode {
    pub const ALL: [IntentMode; 5] = [
        Self::Search,
        Self::Conversation,
        Self::Explanation,
        Self::ImageGeneration,
        Self::ImageEdit,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Conversation => "conversation",
            Self::Explanation => "explanation",
            Self::ImageGeneration => "image_generation",
            Self::ImageEdit => "image_edit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub mode: IntentMode,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_hint: Option<String>,
}

impl Intent {
    /// What a turn falls back to when classification is unavailable.
    pub fn fallback(input: impl Into<String>) -> Self {
        Self {
            mode: IntentMode::Search,
            prompt: input.into(),
            language_hint: None,
            domain_hint: None,
        }
    }
}

/// Wire shape of the classifier's structured output.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIntent {
    mode: IntentMode,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default, alias = "language")]
    language_hint: Option<String>,
    #[serde(default, alias = "domain")]
    domain_hint: Option<String>,
}

const CLASSIFIER_INSTRUCTION: &str = "\
You route requests for an answer engine. Read the user's message and reply with JSON only.
Choose `mode` from exactly one of these labels:
- search: factual questions, news, anything that benefits from fresh web results
- conversation: greetings, small talk, opinions, follow-ups that need no lookup
- explanation: requests to explain, teach, compare or break down a concept
- image_generation: requests to draw, create, render or generate a picture
- image_edit: requests to change, modify or restyle an attached image
Set `prompt` to the request rewritten as a clear, self-contained instruction.
Set `languageHint` to the ISO 639-1 code of the user's language when it is not English.
Set `domainHint` to a one or two word topic area when one is obvious.";

/// Best-effort intent classification backed by the provider.
///
/// Never fails: any transport error or malformed output degrades to
/// [`Intent::fallback`] and is only logged.
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    enabled: bool,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, enabled: true }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub async fn classify(&self, input: &str) -> Intent {
        if !self.enabled || input.trim().is_empty() {
            return Intent::fallback(input);
        }

        let raw = match self.llm.classify(CLASSIFIER_INSTRUCTION, input, &response_schema()).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Intent classification failed, defaulting to search: {}", e);
                return Intent::fallback(input);
            }
        };

        match parse_intent(&raw, input) {
            Ok(intent) => {
                tracing::debug!("Classified input as {}", intent.mode.label());
                intent
            }
            Err(e) => {
                tracing::warn!("{}; defaulting to search", e);
                Intent::fallback(input)
            }
        }
    }
}

/// JSON schema sent with the classification request.
pub fn response_schema() -> Value {
    let labels: Vec<&str> = IntentMode::ALL.iter().map(IntentMode::label).collect();
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "mode": { "type": "STRING", "enum": labels },
            "prompt": { "type": "STRING" },
            "languageHint": { "type": "STRING" },
            "domainHint": { "type": "STRING" },
        },
        "required": ["mode"],
    })
}

/// Parse classifier output, tolerating a surrounding markdown code fence.
pub(crate) fn parse_intent(raw: &str, input: &str) -> Result<Intent, AntharaError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let parsed: RawIntent = serde_json::from_str(body)
        .map_err(|e| AntharaError::Malformed(format!("classifier output {raw:?}: {e}")))?;
    let prompt = parsed
        .prompt
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| input.to_string());
    let non_empty = |hint: Option<String>| hint.map(|h| h.trim().to_string()).filter(|h| !h.is_empty());

    Ok(Intent {
        mode: parsed.mode,
        prompt,
        language_hint: non_empty(parsed.language_hint),
        domain_hint: non_empty(parsed.domain_hint),
    })
}
