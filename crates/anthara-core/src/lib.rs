pub mod constants;
pub mod error;
pub mod config;
pub mod conversation;
pub mod llm;
pub mod response;
pub mod dispatch;
pub mod speech;

// Re-export key types
pub use error::AntharaError;
pub use config::Settings;
pub use conversation::{Citation, ConversationStore, MediaPayload, Message, MessageId, Role, Segment};
pub use dispatch::{ChatController, ChatEvent, Intent, IntentMode, TurnOutcome, TurnPhase, UserInput};
pub use llm::{GeminiClient, GenerateRequest, HistoryTurn, LlmClient, StreamEvent};
pub use response::{StreamAggregator, StreamState};
pub use speech::{CommandSpeech, SilentSpeech, SpeechSynthesizer};
