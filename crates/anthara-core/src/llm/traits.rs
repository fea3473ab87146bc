use crate::conversation::{Citation, MediaPayload, Message, Role, Segment};
use crate::error::AntharaError;
use futures::channel::mpsc;
use serde_json::Value;

/// One role-tagged turn of conversation history sent to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryTurn {
    pub role: Role,
    pub segments: Vec<Segment>,
}

impl From<&Message> for HistoryTurn {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            segments: message.content.clone(),
        }
    }
}

/// A streaming text-generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub history: Vec<HistoryTurn>,
    pub system_instruction: String,
    pub web_grounding: bool,
}

/// Events emitted while a text answer streams in.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// One fragment: appended text plus any sources attached to it.
    Delta { text: String, sources: Vec<Citation> },
    Done,
    Error(String),
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Delta {
            text: text.into(),
            sources: Vec::new(),
        }
    }
}

/// The provider seam. One method per external endpoint so each can be
/// replaced by a test double.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Start a grounded text answer and get its fragment stream.
    async fn stream_answer(
        &self,
        request: &GenerateRequest,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>, AntharaError>;

    /// Structured-output call constrained by `schema`; returns the raw JSON
    /// text the model produced.
    async fn classify(
        &self,
        instruction: &str,
        input: &str,
        schema: &Value,
    ) -> Result<String, AntharaError>;

    /// Single-shot image generation.
    async fn generate_image(&self, prompt: &str) -> Result<MediaPayload, AntharaError>;

    /// Edit `image` following `instruction`; returns mixed text/image output.
    async fn edit_image(
        &self,
        image: &MediaPayload,
        instruction: &str,
    ) -> Result<Vec<Segment>, AntharaError>;
}
