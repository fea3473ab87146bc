use crate::config::ChatSettings;
use crate::conversation::{ConversationStore, MediaPayload, Message, MessageId, Role, Segment};
use crate::dispatch::instructions::{AnswerStyle, InstructionBuilder};
use crate::dispatch::intent::{Intent, IntentClassifier, IntentMode};
use crate::error::{AntharaError, Result};
use crate::llm::{GenerateRequest, HistoryTurn, LlmClient};
use crate::response::{postprocess, StreamAggregator, StreamState};
use crate::speech::SpeechSynthesizer;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Where the controller is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Classifying,
    Streaming,
    ImageGenerating,
    ImageEditing,
}

/// Events published while a turn runs - the interface for front ends.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    PhaseChanged(TurnPhase),
    MessageAdded(MessageId),
    MessageUpdated(MessageId),
    TurnFinished(MessageId),
    TurnFailed { message_id: MessageId, error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Blank input; nothing happened.
    Ignored,
    Completed(MessageId),
    /// The turn ended with an error notice written into the message.
    Failed { message_id: MessageId, error: String },
}

/// One user submission.
#[derive(Debug, Clone, Default)]
pub struct UserInput {
    pub text: String,
    pub image: Option<MediaPayload>,
    pub deep_research: bool,
}

impl UserInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, image: MediaPayload) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_deep_research(mut self, deep_research: bool) -> Self {
        self.deep_research = deep_research;
        self
    }
}

struct Session {
    store: ConversationStore,
    phase: TurnPhase,
    subscribers: Vec<mpsc::UnboundedSender<ChatEvent>>,
}

impl Session {
    fn emit(&mut self, event: ChatEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_phase(&mut self, phase: TurnPhase) {
        if self.phase != phase {
            tracing::info!("Turn phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
            self.emit(ChatEvent::PhaseChanged(phase));
        }
    }
}

struct Inner {
    llm: Arc<dyn LlmClient>,
    speech: Arc<dyn SpeechSynthesizer>,
    classifier: IntentClassifier,
    web_grounding: bool,
    session: Mutex<Session>,
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the controller to `Idle` however the turn ends, including when
/// the turn future is dropped mid-stream.
struct TurnGuard {
    inner: Arc<Inner>,
    message_id: MessageId,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let mut session = self.inner.session();
        if session.store.finish(self.message_id) {
            tracing::debug!("Turn for {} abandoned before completion", self.message_id);
            session.emit(ChatEvent::MessageUpdated(self.message_id));
        }
        session.set_phase(TurnPhase::Idle);
    }
}

/// Drives turns: classify, dispatch to the right provider call, and fold
/// the result into the conversation. Clones share the same session.
///
/// Only one turn runs at a time; a submission while another turn is in
/// flight is rejected with [`AntharaError::Busy`] and leaves the store
/// untouched.
#[derive(Clone)]
pub struct ChatController {
    inner: Arc<Inner>,
}

impl ChatController {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        speech: Arc<dyn SpeechSynthesizer>,
        settings: &ChatSettings,
    ) -> Self {
        let classifier = IntentClassifier::new(llm.clone()).with_enabled(settings.classify_intent);
        Self {
            inner: Arc::new(Inner {
                llm,
                speech,
                classifier,
                web_grounding: settings.web_grounding,
                session: Mutex::new(Session {
                    store: ConversationStore::new().with_max_messages(settings.max_history),
                    phase: TurnPhase::Idle,
                    subscribers: Vec::new(),
                }),
            }),
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.session().subscribers.push(tx);
        rx
    }

    pub fn phase(&self) -> TurnPhase {
        self.inner.session().phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase() == TurnPhase::Idle
    }

    pub fn message(&self, id: MessageId) -> Option<Message> {
        self.inner.session().store.get(id).cloned()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.session().store.messages().cloned().collect()
    }

    pub fn last_assistant(&self) -> Option<Message> {
        self.inner.session().store.last_assistant().cloned()
    }

    /// Drop the whole conversation. Only allowed between turns.
    pub fn clear(&self) -> Result<()> {
        let mut session = self.inner.session();
        if session.phase != TurnPhase::Idle {
            return Err(AntharaError::Busy);
        }
        session.store.clear();
        Ok(())
    }

    /// Run one user turn to completion.
    ///
    /// Provider failures do not surface as `Err`: they end the turn with an
    /// error notice in the assistant message and a `Failed` outcome.
    pub async fn submit(&self, input: UserInput) -> Result<TurnOutcome> {
        if input.text.trim().is_empty() && input.image.is_none() {
            return Ok(TurnOutcome::Ignored);
        }

        let user = Message::user(input.text.clone(), input.image.clone(), input.deep_research);
        let user_id = user.id;
        let guard = self.begin_turn(Some(user), user_id, TurnPhase::Classifying)?;
        let assistant_id = guard.message_id;
        self.cancel_speech();

        let intent = self.inner.classifier.classify(&input.text).await;
        let phase = route(&intent, input.image.is_some());
        {
            let mut session = self.inner.session();
            session.store.set_intent(assistant_id, intent.clone());
            session.set_phase(phase);
        }

        let result = match (phase, input.image) {
            (TurnPhase::ImageGenerating, _) => self.generate_image(assistant_id, &intent.prompt).await,
            (TurnPhase::ImageEditing, Some(image)) => {
                let instruction = if input.text.trim().is_empty() {
                    intent.prompt.as_str()
                } else {
                    input.text.as_str()
                };
                self.edit_image(assistant_id, &image, instruction).await
            }
            _ => {
                let style = if input.deep_research {
                    AnswerStyle::DeepResearch
                } else {
                    AnswerStyle::Standard
                };
                let history = self.inner.session().store.to_history();
                let instruction = InstructionBuilder::new(style).with_intent(&intent).build();
                self.stream_answer(assistant_id, history, instruction, true).await
            }
        };

        let outcome = self.settle(assistant_id, result);
        drop(guard);
        Ok(outcome)
    }

    /// Re-answer the question behind a finished assistant message in more
    /// depth. Sibling of [`submit`](Self::submit); only valid when idle.
    pub async fn elaborate(&self, message_id: MessageId) -> Result<TurnOutcome> {
        let (guard, history, intent) = {
            let mut session = self.inner.session();
            if session.phase != TurnPhase::Idle {
                return Err(AntharaError::Busy);
            }
            let source = session
                .store
                .get(message_id)
                .filter(|m| m.role == Role::Assistant && !m.streaming)
                .ok_or_else(|| AntharaError::NotFound(message_id.to_string()))?;
            let intent = source.intent.clone();
            let parent = source
                .flags
                .parent_message_id
                .ok_or_else(|| AntharaError::NotFound(format!("question for {message_id}")))?;
            let history = session
                .store
                .history_until(parent)
                .ok_or_else(|| AntharaError::NotFound(parent.to_string()))?;

            session.store.set_elaboration_offered(message_id, false);
            session.emit(ChatEvent::MessageUpdated(message_id));
            let guard = self.open_turn(&mut session, None, parent, TurnPhase::Streaming);
            (guard, history, intent)
        };
        let assistant_id = guard.message_id;
        self.cancel_speech();

        let mut builder = InstructionBuilder::new(AnswerStyle::Elaboration);
        if let Some(ref intent) = intent {
            builder = builder.with_intent(intent);
            self.inner.session().store.set_intent(assistant_id, intent.clone());
        }

        let result = self
            .stream_answer(assistant_id, history, builder.build(), false)
            .await;
        let outcome = self.settle(assistant_id, result);
        drop(guard);
        Ok(outcome)
    }

    /// Read a message aloud, replacing any current playback.
    pub fn speak(&self, message_id: MessageId) -> Result<()> {
        let text = {
            let session = self.inner.session();
            let message = session
                .store
                .get(message_id)
                .ok_or_else(|| AntharaError::NotFound(message_id.to_string()))?;
            postprocess::plain_text(&message.text())
        };
        self.inner.speech.speak(&text);
        Ok(())
    }

    pub fn stop_speaking(&self) {
        self.inner.speech.cancel();
    }

    pub fn is_speaking(&self) -> bool {
        self.inner.speech.is_speaking()
    }

    fn cancel_speech(&self) {
        if self.inner.speech.is_speaking() {
            tracing::debug!("Cancelling speech for new turn");
            self.inner.speech.cancel();
        }
    }

    fn begin_turn(
        &self,
        user: Option<Message>,
        parent: MessageId,
        phase: TurnPhase,
    ) -> Result<TurnGuard> {
        let mut session = self.inner.session();
        if session.phase != TurnPhase::Idle {
            tracing::debug!("Rejecting submission while {:?}", session.phase);
            return Err(AntharaError::Busy);
        }
        Ok(self.open_turn(&mut session, user, parent, phase))
    }

    fn open_turn(
        &self,
        session: &mut Session,
        user: Option<Message>,
        parent: MessageId,
        phase: TurnPhase,
    ) -> TurnGuard {
        if let Some(user) = user {
            let id = session.store.push(user);
            session.emit(ChatEvent::MessageAdded(id));
        }
        let mut placeholder = Message::assistant_placeholder(parent);
        if let Some(question) = session.store.get(parent) {
            placeholder.flags.deep_research_requested = question.flags.deep_research_requested;
        }
        let message_id = session.store.push(placeholder);
        session.emit(ChatEvent::MessageAdded(message_id));
        session.set_phase(phase);

        TurnGuard {
            inner: self.inner.clone(),
            message_id,
        }
    }

    fn publish(&self, id: MessageId, state: &StreamState) {
        let mut session = self.inner.session();
        if session
            .store
            .publish_stream(id, &state.accumulated_text, &state.sources)
        {
            session.emit(ChatEvent::MessageUpdated(id));
        }
    }

    async fn stream_answer(
        &self,
        id: MessageId,
        history: Vec<HistoryTurn>,
        system_instruction: String,
        offer_elaboration: bool,
    ) -> Result<()> {
        let request = GenerateRequest {
            history,
            system_instruction,
            web_grounding: self.inner.web_grounding,
        };
        let rx = self.inner.llm.stream_answer(&request).await?;

        let mut aggregator = StreamAggregator::new();
        aggregator.run(rx, |state| self.publish(id, state)).await?;

        let (text, sources) = aggregator.finish();
        if text.trim().is_empty() {
            return Err(AntharaError::Provider("The model returned an empty answer".into()));
        }
        let processed = postprocess::process(&text, &sources);

        let mut session = self.inner.session();
        session.store.finalize(
            id,
            processed.cited_content,
            sources,
            processed.related_queries,
        );
        session.store.set_elaboration_offered(id, offer_elaboration);
        session.emit(ChatEvent::MessageUpdated(id));
        Ok(())
    }

    async fn generate_image(&self, id: MessageId, prompt: &str) -> Result<()> {
        tracing::info!("Generating image");
        let media = self.inner.llm.generate_image(prompt).await?;
        let caption = format!("Here is the image I created for \"{prompt}\".");

        let mut session = self.inner.session();
        session
            .store
            .replace_content(id, vec![Segment::Media(media), Segment::text(caption)]);
        session.store.finish(id);
        session.emit(ChatEvent::MessageUpdated(id));
        Ok(())
    }

    async fn edit_image(&self, id: MessageId, image: &MediaPayload, instruction: &str) -> Result<()> {
        tracing::info!("Editing image");
        let segments = self.inner.llm.edit_image(image, instruction).await?;
        if segments.is_empty() {
            return Err(AntharaError::Provider("The model returned nothing for this edit".into()));
        }

        let mut session = self.inner.session();
        session.store.replace_content(id, segments);
        session.store.finish(id);
        session.emit(ChatEvent::MessageUpdated(id));
        Ok(())
    }

    fn settle(&self, id: MessageId, result: Result<()>) -> TurnOutcome {
        let mut session = self.inner.session();
        match result {
            Ok(()) => {
                session.emit(ChatEvent::TurnFinished(id));
                TurnOutcome::Completed(id)
            }
            Err(e) => {
                tracing::warn!("Turn failed: {}", e);
                tidy_partial_answer(&mut session.store, id);
                let notice = e.user_notice();
                session.store.fail(id, notice.clone());
                session.emit(ChatEvent::MessageUpdated(id));
                session.emit(ChatEvent::TurnFailed {
                    message_id: id,
                    error: notice.clone(),
                });
                TurnOutcome::Failed {
                    message_id: id,
                    error: notice,
                }
            }
        }
    }
}

/// Give partial streamed text the same treatment as a finished answer:
/// sentinels become numbered references and any trailer is cut off.
fn tidy_partial_answer(store: &mut ConversationStore, id: MessageId) {
    let Some(message) = store.get(id).filter(|m| m.streaming && m.image().is_none()) else {
        return;
    };
    let text = message.text();
    if text.is_empty() {
        return;
    }
    let processed = postprocess::process(&text, &message.sources);
    store.replace_content(id, vec![Segment::text(processed.cited_content)]);
}

/// Pick the handling path for a classified turn.
pub(crate) fn route(intent: &Intent, has_image: bool) -> TurnPhase {
    match intent.mode {
        IntentMode::ImageGeneration => TurnPhase::ImageGenerating,
        IntentMode::ImageEdit if has_image => TurnPhase::ImageEditing,
        _ => TurnPhase::Streaming,
    }
}
