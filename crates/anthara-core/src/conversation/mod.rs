mod message;
mod store;

pub use message::{Citation, MediaPayload, Message, MessageFlags, MessageId, Role, Segment};
pub use store::ConversationStore;
