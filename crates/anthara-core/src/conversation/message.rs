use crate::dispatch::Intent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// An encoded media blob, base64 text plus its mime type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaPayload {
    pub mime_type: String,
    pub data: String,
}

impl MediaPayload {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Text(String),
    Media(MediaPayload),
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Media(_) => None,
        }
    }

    pub fn as_media(&self) -> Option<&MediaPayload> {
        match self {
            Self::Text(_) => None,
            Self::Media(media) => Some(media),
        }
    }
}

/// A web source backing part of an answer. Unique by `uri` within a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub uri: String,
    pub title: String,
}

impl Citation {
    /// An empty title falls back to the URI so every source has a label.
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        let uri = uri.into();
        let title = title.into();
        let title = if title.trim().is_empty() {
            uri.clone()
        } else {
            title
        };
        Self { uri, title }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageFlags {
    pub deep_research_requested: bool,
    /// Set on answers that finished with follow-up suggestions.
    pub awaiting_follow_up: bool,
    /// For assistant messages, the user turn they answer.
    pub parent_message_id: Option<MessageId>,
    /// UI-only: whether an "elaborate" action is still offered.
    pub elaboration_offered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: Vec<Segment>,
    pub sources: Vec<Citation>,
    pub flags: MessageFlags,
    pub related_queries: Vec<String>,
    pub intent: Option<Intent>,
    pub streaming: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A submitted user turn. An attached image precedes the text.
    pub fn user(text: impl Into<String>, image: Option<MediaPayload>, deep_research: bool) -> Self {
        let text = text.into();
        let mut content = Vec::new();
        if let Some(image) = image {
            content.push(Segment::Media(image));
        }
        if !text.trim().is_empty() {
            content.push(Segment::Text(text));
        }
        Self {
            id: MessageId::new(),
            role: Role::User,
            content,
            sources: Vec::new(),
            flags: MessageFlags {
                deep_research_requested: deep_research,
                ..MessageFlags::default()
            },
            related_queries: Vec::new(),
            intent: None,
            streaming: false,
            created_at: Utc::now(),
        }
    }

    /// An empty assistant entry that will receive the response for `parent`.
    pub fn assistant_placeholder(parent: MessageId) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: Vec::new(),
            sources: Vec::new(),
            flags: MessageFlags {
                parent_message_id: Some(parent),
                ..MessageFlags::default()
            },
            related_queries: Vec::new(),
            intent: None,
            streaming: true,
            created_at: Utc::now(),
        }
    }

    /// All text segments joined by blank lines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(Segment::as_text)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn media(&self) -> impl Iterator<Item = &MediaPayload> {
        self.content.iter().filter_map(Segment::as_media)
    }

    pub fn image(&self) -> Option<&MediaPayload> {
        self.media().next()
    }

    pub fn is_empty(&self) -> bool {
        self.content.iter().all(|segment| match segment {
            Segment::Text(text) => text.is_empty(),
            Segment::Media(_) => false,
        })
    }
}
