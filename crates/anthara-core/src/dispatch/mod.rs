mod controller;
pub mod instructions;
pub mod intent;

pub use controller::{ChatController, ChatEvent, TurnOutcome, TurnPhase, UserInput};
pub use instructions::{AnswerStyle, InstructionBuilder};
pub use intent::{Intent, IntentClassifier, IntentMode};
