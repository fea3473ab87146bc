use crate::constants::defaults;
use crate::conversation::message::{Citation, Message, MessageId, Role, Segment};
use crate::dispatch::Intent;
use crate::llm::HistoryTurn;
use std::collections::VecDeque;

/// Ordered, append-only message log for one session.
///
/// Only an assistant message that is still `streaming` accepts content
/// mutations; once finished it is frozen apart from UI flags.
pub struct ConversationStore {
    messages: VecDeque<Message>,
    max_messages: usize,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            max_messages: defaults::MAX_HISTORY,
        }
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max.max(2);
        self
    }

    pub fn push(&mut self, message: Message) -> MessageId {
        let id = message.id;
        self.messages.push_back(message);
        self.trim_if_needed();
        id
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.back()
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Replace the in-flight text and sources with a newer snapshot.
    ///
    /// Snapshots that would shrink the text or the source list are ignored,
    /// so published state only ever grows. Returns whether it was applied.
    pub fn publish_stream(&mut self, id: MessageId, text: &str, sources: &[Citation]) -> bool {
        let Some(message) = self.in_flight_mut(id) else {
            return false;
        };
        let current_len = message
            .content
            .iter()
            .filter_map(Segment::as_text)
            .map(str::len)
            .sum::<usize>();
        if text.len() < current_len || sources.len() < message.sources.len() {
            return false;
        }
        message.content = vec![Segment::text(text)];
        message.sources = sources.to_vec();
        true
    }

    /// Swap the whole content of an in-flight message, used by image turns.
    pub fn replace_content(&mut self, id: MessageId, content: Vec<Segment>) -> bool {
        match self.in_flight_mut(id) {
            Some(message) => {
                message.content = content;
                true
            }
            None => false,
        }
    }

    pub fn set_intent(&mut self, id: MessageId, intent: Intent) -> bool {
        match self.in_flight_mut(id) {
            Some(message) => {
                message.intent = Some(intent);
                true
            }
            None => false,
        }
    }

    /// Seal a streamed answer with its post-processed content.
    pub fn finalize(
        &mut self,
        id: MessageId,
        content: String,
        sources: Vec<Citation>,
        related_queries: Vec<String>,
    ) -> bool {
        let Some(message) = self.in_flight_mut(id) else {
            return false;
        };
        message.content = vec![Segment::Text(content)];
        message.sources = sources;
        message.flags.awaiting_follow_up = !related_queries.is_empty();
        message.related_queries = related_queries;
        message.streaming = false;
        true
    }

    /// Seal a message as failed. Partial text already published is kept and
    /// the notice is appended after it; an empty message gets only the notice.
    pub fn fail(&mut self, id: MessageId, notice: impl Into<String>) -> bool {
        let Some(message) = self.in_flight_mut(id) else {
            return false;
        };
        let notice = Segment::Text(notice.into());
        if message.is_empty() {
            message.content = vec![notice];
        } else {
            message.content.push(notice);
        }
        message.streaming = false;
        true
    }

    /// Seal a message without touching its content.
    pub fn finish(&mut self, id: MessageId) -> bool {
        match self.in_flight_mut(id) {
            Some(message) => {
                message.streaming = false;
                true
            }
            None => false,
        }
    }

    pub fn set_elaboration_offered(&mut self, id: MessageId, offered: bool) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.flags.elaboration_offered = offered;
                true
            }
            None => false,
        }
    }

    /// Provider history for every settled message, oldest first.
    pub fn to_history(&self) -> Vec<HistoryTurn> {
        self.messages
            .iter()
            .filter(|m| !m.streaming && !m.is_empty())
            .map(HistoryTurn::from)
            .collect()
    }

    /// Provider history up to and including `id`, or `None` if unknown.
    pub fn history_until(&self, id: MessageId) -> Option<Vec<HistoryTurn>> {
        let end = self.messages.iter().position(|m| m.id == id)?;
        Some(
            self.messages
                .iter()
                .take(end + 1)
                .filter(|m| !m.streaming && !m.is_empty())
                .map(HistoryTurn::from)
                .collect(),
        )
    }

    fn in_flight_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.id == id)
            .filter(|m| m.streaming)
    }

    fn trim_if_needed(&mut self) {
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}
