use crate::conversation::Citation;
use crate::error::AntharaError;
use crate::llm::StreamEvent;
use futures::{Stream, StreamExt};
use std::collections::HashSet;

/// Running state of one streamed answer. Lives only while the stream does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamState {
    pub accumulated_text: String,
    pub seen_uris: HashSet<String>,
    pub sources: Vec<Citation>,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment in: append its text, admit unseen sources.
    pub fn apply(&mut self, text_delta: &str, new_sources: Vec<Citation>) {
        self.accumulated_text.push_str(text_delta);
        for citation in new_sources {
            if citation.uri.is_empty() {
                continue;
            }
            // First-seen URI keeps its position and title
            if self.seen_uris.insert(citation.uri.clone()) {
                self.sources.push(citation);
            }
        }
    }
}

/// Folds a provider fragment stream into text plus deduplicated sources.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    state: StreamState,
    fragments: usize,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// Consume `stream` in delivery order, calling `on_update` after every
    /// fragment and before the next one is awaited.
    ///
    /// A closed stream counts as a natural end. An `Error` event stops
    /// consumption with `AntharaError::Stream`; everything folded before it
    /// stays in [`state`](Self::state).
    pub async fn run<S, F>(&mut self, mut stream: S, mut on_update: F) -> Result<(), AntharaError>
    where
        S: Stream<Item = StreamEvent> + Unpin,
        F: FnMut(&StreamState),
    {
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Delta { text, sources } => {
                    self.state.apply(&text, sources);
                    self.fragments += 1;
                    on_update(&self.state);
                }
                StreamEvent::Done => break,
                StreamEvent::Error(err) => {
                    tracing::warn!(
                        "Stream failed after {} fragment(s): {}",
                        self.fragments,
                        err
                    );
                    return Err(AntharaError::Stream(err));
                }
            }
        }

        tracing::debug!(
            "Stream complete: {} fragment(s), {} chars, {} source(s)",
            self.fragments,
            self.state.accumulated_text.len(),
            self.state.sources.len()
        );
        Ok(())
    }

    /// Final `(text, sources)` pair.
    pub fn finish(self) -> (String, Vec<Citation>) {
        (self.state.accumulated_text, self.state.sources)
    }
}
