use anthara_core::config::ChatSettings;
use anthara_core::{
    AntharaError, ChatController, ChatEvent, Citation, GenerateRequest, IntentMode, LlmClient,
    MediaPayload, Segment, SilentSpeech, SpeechSynthesizer, StreamEvent, TurnOutcome, TurnPhase,
    UserInput,
};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Mock provider that replays pre-programmed answers and records requests.
#[derive(Default)]
struct MockLlm {
    classification: Mutex<Option<Result<String, String>>>,
    streams: Mutex<VecDeque<Result<Vec<StreamEvent>, String>>>,
    live: Mutex<Option<UnboundedReceiver<StreamEvent>>>,
    image: Mutex<Option<Result<MediaPayload, String>>>,
    edit: Mutex<Option<Vec<Segment>>>,
    requests: Mutex<Vec<GenerateRequest>>,
    edit_instructions: Mutex<Vec<String>>,
    image_calls: AtomicUsize,
}

impl MockLlm {
    fn classifying(raw: &str) -> Self {
        let mock = Self::default();
        *mock.classification.lock().unwrap() = Some(Ok(raw.to_string()));
        mock
    }

    fn then_stream(self, events: Vec<StreamEvent>) -> Self {
        self.streams.lock().unwrap().push_back(Ok(events));
        self
    }

    fn then_stream_error(self, message: &str) -> Self {
        self.streams.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    /// Next stream call is fed by the returned sender.
    fn with_live_stream(self) -> (Self, UnboundedSender<StreamEvent>) {
        let (tx, rx) = unbounded();
        *self.live.lock().unwrap() = Some(rx);
        (self, tx)
    }

    fn recorded(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LlmClient for MockLlm {
    async fn stream_answer(
        &self,
        request: &GenerateRequest,
    ) -> Result<UnboundedReceiver<StreamEvent>, AntharaError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(rx) = self.live.lock().unwrap().take() {
            return Ok(rx);
        }

        let scripted = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(vec![StreamEvent::Done]));
        let events = scripted.map_err(AntharaError::Provider)?;

        let (tx, rx) = unbounded();
        for event in events {
            tx.unbounded_send(event).unwrap();
        }
        Ok(rx)
    }

    async fn classify(
        &self,
        _instruction: &str,
        _input: &str,
        _schema: &Value,
    ) -> Result<String, AntharaError> {
        match self.classification.lock().unwrap().clone() {
            Some(Ok(raw)) => Ok(raw),
            Some(Err(e)) => Err(AntharaError::Provider(e)),
            None => Ok(r#"{"mode":"search"}"#.to_string()),
        }
    }

    async fn generate_image(&self, _prompt: &str) -> Result<MediaPayload, AntharaError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        match self.image.lock().unwrap().clone() {
            Some(Ok(media)) => Ok(media),
            Some(Err(e)) => Err(AntharaError::Provider(e)),
            None => Err(AntharaError::Provider("no image scripted".into())),
        }
    }

    async fn edit_image(
        &self,
        _image: &MediaPayload,
        instruction: &str,
    ) -> Result<Vec<Segment>, AntharaError> {
        self.edit_instructions.lock().unwrap().push(instruction.to_string());
        Ok(self.edit.lock().unwrap().clone().unwrap_or_default())
    }
}

/// Speech double that reports playing until cancelled.
#[derive(Default)]
struct MockSpeech {
    speaking: AtomicBool,
    cancels: AtomicUsize,
    spoken: Mutex<Vec<String>>,
}

impl SpeechSynthesizer for MockSpeech {
    fn speak(&self, text: &str) {
        self.spoken.lock().unwrap().push(text.to_string());
        self.speaking.store(true, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.speaking.store(false, Ordering::SeqCst);
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}

fn controller_with(mock: Arc<MockLlm>) -> ChatController {
    ChatController::new(mock, Arc::new(SilentSpeech), &ChatSettings::default())
}

fn delta(text: &str, sources: &[(&str, &str)]) -> StreamEvent {
    StreamEvent::Delta {
        text: text.to_string(),
        sources: sources.iter().map(|(u, t)| Citation::new(*u, *t)).collect(),
    }
}

async fn wait_for_phase(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<ChatEvent>,
    phase: TurnPhase,
) {
    while let Some(event) = events.recv().await {
        if event == ChatEvent::PhaseChanged(phase) {
            return;
        }
    }
    panic!("event channel closed before reaching {phase:?}");
}

async fn wait_for_update(events: &mut tokio::sync::mpsc::UnboundedReceiver<ChatEvent>) {
    while let Some(event) = events.recv().await {
        if matches!(event, ChatEvent::MessageUpdated(_)) {
            return;
        }
    }
    panic!("event channel closed before an update");
}

#[tokio::test]
async fn test_search_turn_streams_and_post_processes() {
    let mock = Arc::new(MockLlm::classifying(r#"{"mode":"search","prompt":"capital of France"}"#).then_stream(vec![
        delta("Paris is", &[("https://a.example/1", "Atlas")]),
        delta(" the capital of France ~~source~~.", &[("https://a.example/1", "Dup"), ("https://b.example", "B")]),
        delta("\n[RELATED_QUESTIONS]\n- How big is Paris?\n[/RELATED_QUESTIONS]", &[]),
        StreamEvent::Done,
    ]));
    let controller = controller_with(mock.clone());

    let outcome = controller.submit(UserInput::new("what's the capital of france")).await.unwrap();
    let TurnOutcome::Completed(id) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };

    let message = controller.message(id).unwrap();
    assert_eq!(
        message.content,
        vec![Segment::text("Paris is the capital of France [1](https://a.example/1).")]
    );
    assert_eq!(message.sources.len(), 2);
    assert_eq!(message.sources[0].title, "Atlas");
    assert_eq!(message.related_queries, vec!["How big is Paris?"]);
    assert!(message.flags.awaiting_follow_up);
    assert!(message.flags.elaboration_offered);
    assert!(!message.streaming);
    assert_eq!(message.intent.as_ref().unwrap().mode, IntentMode::Search);

    let requests = mock.recorded();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].history.len(), 1);
    assert!(requests[0].web_grounding);
    assert!(controller.is_idle());
}

#[tokio::test]
async fn test_publishes_partial_text_during_stream() {
    let (mock, tx) = MockLlm::classifying(r#"{"mode":"conversation"}"#).with_live_stream();
    let controller = controller_with(Arc::new(mock));
    let mut events = controller.subscribe();

    let turn = tokio::spawn({
        let controller = controller.clone();
        async move { controller.submit(UserInput::new("hi there")).await }
    });

    wait_for_phase(&mut events, TurnPhase::Streaming).await;
    tx.unbounded_send(StreamEvent::text("Hello")).unwrap();
    wait_for_update(&mut events).await;

    let partial = controller.last_assistant().unwrap();
    assert_eq!(partial.text(), "Hello");
    assert!(partial.streaming);

    tx.unbounded_send(StreamEvent::text(", friend")).unwrap();
    tx.unbounded_send(StreamEvent::Done).unwrap();
    let outcome = turn.await.unwrap().unwrap();
    assert!(matches!(outcome, TurnOutcome::Completed(_)));
    assert_eq!(controller.last_assistant().unwrap().text(), "Hello, friend");
}

#[tokio::test]
async fn test_second_submission_rejected_while_streaming() {
    let (mock, tx) = MockLlm::classifying(r#"{"mode":"search"}"#).with_live_stream();
    let mock = Arc::new(mock.then_stream(vec![delta("Second answer", &[]), StreamEvent::Done]));
    let controller = controller_with(mock.clone());
    let mut events = controller.subscribe();

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.submit(UserInput::new("first question")).await }
    });
    wait_for_phase(&mut events, TurnPhase::Streaming).await;

    let ids_before: Vec<_> = controller.messages().iter().map(|m| m.id).collect();
    let second = controller.submit(UserInput::new("second question")).await;
    assert!(matches!(second, Err(AntharaError::Busy)));
    let ids_after: Vec<_> = controller.messages().iter().map(|m| m.id).collect();
    assert_eq!(ids_before, ids_after);
    assert!(matches!(controller.clear(), Err(AntharaError::Busy)));

    tx.unbounded_send(StreamEvent::text("First answer")).unwrap();
    tx.unbounded_send(StreamEvent::Done).unwrap();
    first.await.unwrap().unwrap();
    assert!(controller.is_idle());

    // Accepted again once idle
    let outcome = controller.submit(UserInput::new("second question")).await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Completed(_)));
    assert_eq!(controller.messages().len(), 4);
    assert_eq!(mock.recorded()[1].history.len(), 3);
}

#[tokio::test]
async fn test_error_after_partial_output_appends_notice() {
    let mock = Arc::new(MockLlm::default().then_stream(vec![
        delta("Partial answer", &[]),
        StreamEvent::Error("connection reset".into()),
    ]));
    let controller = controller_with(mock);

    let outcome = controller.submit(UserInput::new("explain tides")).await.unwrap();
    let TurnOutcome::Failed { message_id, error } = outcome else {
        panic!("expected failure");
    };
    assert!(error.contains("connection reset"));

    let message = controller.message(message_id).unwrap();
    assert_eq!(message.content[0], Segment::text("Partial answer"));
    assert_eq!(message.content.len(), 2);
    assert!(message.content[1].as_text().unwrap().contains("connection reset"));
    assert!(!message.streaming);
    assert!(controller.is_idle());
}

#[tokio::test]
async fn test_partial_answer_is_post_processed_before_notice() {
    let mock = Arc::new(MockLlm::default().then_stream(vec![
        delta("Tides follow the moon ~~source~~.", &[("https://a.example", "A")]),
        delta("\n[RELATED_QUESTIONS]\n- Why are there", &[]),
        StreamEvent::Error("connection reset".into()),
    ]));
    let controller = controller_with(mock);

    let TurnOutcome::Failed { message_id, .. } =
        controller.submit(UserInput::new("explain tides")).await.unwrap()
    else {
        panic!("expected failure");
    };

    let message = controller.message(message_id).unwrap();
    assert_eq!(
        message.content[0],
        Segment::text("Tides follow the moon [1](https://a.example).")
    );
    assert!(!message.text().contains("~~source~~"));
    assert!(!message.text().contains("RELATED_QUESTIONS"));
    assert_eq!(message.sources.len(), 1);
}

#[tokio::test]
async fn test_provider_failure_before_output_replaces_content() {
    let mock = Arc::new(MockLlm::default().then_stream_error("503 unavailable"));
    let controller = controller_with(mock);

    let outcome = controller.submit(UserInput::new("news today")).await.unwrap();
    let TurnOutcome::Failed { message_id, .. } = outcome else {
        panic!("expected failure");
    };
    let message = controller.message(message_id).unwrap();
    assert_eq!(message.content.len(), 1);
    assert!(message.text().contains("503 unavailable"));
}

#[tokio::test]
async fn test_empty_answer_is_a_failure() {
    let mock = Arc::new(MockLlm::default().then_stream(vec![StreamEvent::Done]));
    let controller = controller_with(mock);
    let outcome = controller.submit(UserInput::new("anything")).await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Failed { .. }));
}

#[tokio::test]
async fn test_malformed_classification_falls_back_to_search() {
    let mock = Arc::new(
        MockLlm::classifying("I think this is a search!")
            .then_stream(vec![delta("Answer", &[]), StreamEvent::Done]),
    );
    let controller = controller_with(mock.clone());

    let outcome = controller.submit(UserInput::new("draw me a cat")).await.unwrap();
    let TurnOutcome::Completed(id) = outcome else {
        panic!("fallback should still answer");
    };
    let intent = controller.message(id).unwrap().intent.unwrap();
    assert_eq!(intent.mode, IntentMode::Search);
    assert_eq!(intent.prompt, "draw me a cat");
    assert_eq!(mock.image_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_classifier_transport_error_falls_back() {
    let mock = MockLlm::default().then_stream(vec![delta("Answer", &[]), StreamEvent::Done]);
    *mock.classification.lock().unwrap() = Some(Err("timeout".into()));
    let controller = controller_with(Arc::new(mock));

    let outcome = controller.submit(UserInput::new("weather")).await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Completed(_)));
}

#[tokio::test]
async fn test_image_generation_turn() {
    let mock = MockLlm::classifying(r#"{"mode":"image_generation","prompt":"a red fox in snow"}"#);
    *mock.image.lock().unwrap() = Some(Ok(MediaPayload::new("image/jpeg", "/9j/4A")));
    let mock = Arc::new(mock);
    let controller = controller_with(mock.clone());
    let mut events = controller.subscribe();

    let outcome = controller.submit(UserInput::new("draw a fox")).await.unwrap();
    let TurnOutcome::Completed(id) = outcome else {
        panic!("expected completion");
    };

    let message = controller.message(id).unwrap();
    assert_eq!(message.content.len(), 2);
    assert_eq!(message.content[0], Segment::Media(MediaPayload::new("image/jpeg", "/9j/4A")));
    assert!(message.content[1].as_text().unwrap().contains("a red fox in snow"));
    assert!(mock.recorded().is_empty());

    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ChatEvent::PhaseChanged(phase) = event {
            phases.push(phase);
        }
    }
    assert_eq!(
        phases,
        vec![TurnPhase::Classifying, TurnPhase::ImageGenerating, TurnPhase::Idle]
    );
}

#[tokio::test]
async fn test_image_generation_failure_writes_notice() {
    let mock = MockLlm::classifying(r#"{"mode":"image_generation"}"#);
    *mock.image.lock().unwrap() = Some(Err("quota exceeded".into()));
    let controller = controller_with(Arc::new(mock));

    let outcome = controller.submit(UserInput::new("draw a fox")).await.unwrap();
    let TurnOutcome::Failed { message_id, .. } = outcome else {
        panic!("expected failure");
    };
    assert!(controller.message(message_id).unwrap().text().contains("quota exceeded"));
    assert!(controller.is_idle());
}

#[tokio::test]
async fn test_image_edit_replaces_content() {
    let mock = MockLlm::classifying(r#"{"mode":"image_edit","prompt":"recolor"}"#);
    *mock.edit.lock().unwrap() = Some(vec![
        Segment::text("Done, it's blue now."),
        Segment::Media(MediaPayload::new("image/png", "iVBOR")),
    ]);
    let mock = Arc::new(mock);
    let controller = controller_with(mock.clone());

    let input = UserInput::new("make the car blue")
        .with_image(MediaPayload::new("image/png", "ORIGINAL"));
    let outcome = controller.submit(input).await.unwrap();
    let TurnOutcome::Completed(id) = outcome else {
        panic!("expected completion");
    };

    let message = controller.message(id).unwrap();
    assert_eq!(message.content.len(), 2);
    assert_eq!(message.image().unwrap().data, "iVBOR");
    assert_eq!(*mock.edit_instructions.lock().unwrap(), vec!["make the car blue"]);
}

#[tokio::test]
async fn test_edit_intent_without_image_streams() {
    let mock = Arc::new(
        MockLlm::classifying(r#"{"mode":"image_edit"}"#)
            .then_stream(vec![delta("Please attach an image.", &[]), StreamEvent::Done]),
    );
    let controller = controller_with(mock.clone());

    let outcome = controller.submit(UserInput::new("make it blue")).await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Completed(_)));
    assert_eq!(mock.recorded().len(), 1);
    assert!(mock.edit_instructions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_blank_input_is_ignored() {
    let controller = controller_with(Arc::new(MockLlm::default()));
    let outcome = controller.submit(UserInput::new("   ")).await.unwrap();
    assert_eq!(outcome, TurnOutcome::Ignored);
    assert!(controller.messages().is_empty());
}

#[tokio::test]
async fn test_deep_research_uses_research_instruction() {
    let mock = Arc::new(MockLlm::default().then_stream(vec![delta("Report", &[]), StreamEvent::Done]));
    let controller = controller_with(mock.clone());

    let input = UserInput::new("history of the printing press").with_deep_research(true);
    controller.submit(input).await.unwrap();

    let request = &mock.recorded()[0];
    assert!(request.system_instruction.contains("deep research"));
    let messages = controller.messages();
    assert!(messages[0].flags.deep_research_requested);
    assert!(messages[1].flags.deep_research_requested);
}

#[tokio::test]
async fn test_web_grounding_follows_settings() {
    let mock = Arc::new(MockLlm::default().then_stream(vec![delta("Hi", &[]), StreamEvent::Done]));
    let settings = ChatSettings {
        web_grounding: false,
        classify_intent: false,
        ..ChatSettings::default()
    };
    let controller = ChatController::new(mock.clone(), Arc::new(SilentSpeech), &settings);

    controller.submit(UserInput::new("hello")).await.unwrap();
    assert!(!mock.recorded()[0].web_grounding);
}

#[tokio::test]
async fn test_elaboration_truncates_history_and_swaps_instruction() {
    let mock = Arc::new(
        MockLlm::default()
            .then_stream(vec![delta("Short answer.", &[]), StreamEvent::Done])
            .then_stream(vec![delta("Second answer.", &[]), StreamEvent::Done])
            .then_stream(vec![delta("A much longer answer.", &[]), StreamEvent::Done]),
    );
    let controller = controller_with(mock.clone());

    let TurnOutcome::Completed(first) = controller.submit(UserInput::new("why is the sky blue")).await.unwrap() else {
        panic!("expected completion");
    };
    controller.submit(UserInput::new("and sunsets?")).await.unwrap();

    let outcome = controller.elaborate(first).await.unwrap();
    let TurnOutcome::Completed(elaborated) = outcome else {
        panic!("expected completion");
    };

    let request = &mock.recorded()[2];
    assert_eq!(request.history.len(), 1);
    assert_eq!(
        request.history[0].segments,
        vec![Segment::text("why is the sky blue")]
    );
    assert!(request.system_instruction.contains("more detailed answer"));

    let source = controller.message(first).unwrap();
    assert!(!source.flags.elaboration_offered);
    let new_message = controller.message(elaborated).unwrap();
    assert_eq!(new_message.text(), "A much longer answer.");
    assert_eq!(new_message.flags.parent_message_id, source.flags.parent_message_id);
    assert!(!new_message.flags.elaboration_offered);
}

#[tokio::test]
async fn test_elaborate_rejects_unknown_and_user_messages() {
    let mock = Arc::new(MockLlm::default().then_stream(vec![delta("Answer", &[]), StreamEvent::Done]));
    let controller = controller_with(mock);
    controller.submit(UserInput::new("question")).await.unwrap();

    let user_id = controller.messages()[0].id;
    assert!(matches!(
        controller.elaborate(user_id).await,
        Err(AntharaError::NotFound(_))
    ));
    assert!(matches!(
        controller.elaborate(anthara_core::MessageId::new()).await,
        Err(AntharaError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_new_turn_cancels_active_speech() {
    let mock = Arc::new(
        MockLlm::default()
            .then_stream(vec![delta("Answer [1](https://a.example).", &[]), StreamEvent::Done])
            .then_stream(vec![delta("Next", &[]), StreamEvent::Done]),
    );
    let speech = Arc::new(MockSpeech::default());
    let controller = ChatController::new(mock, speech.clone(), &ChatSettings::default());

    let TurnOutcome::Completed(id) = controller.submit(UserInput::new("q1")).await.unwrap() else {
        panic!("expected completion");
    };
    controller.speak(id).unwrap();
    assert!(controller.is_speaking());
    assert_eq!(speech.spoken.lock().unwrap()[0], "Answer.");

    controller.submit(UserInput::new("q2")).await.unwrap();
    assert_eq!(speech.cancels.load(Ordering::SeqCst), 1);
    assert!(!controller.is_speaking());

    // Not speaking: nothing to cancel
    controller.submit(UserInput::new("q3")).await.unwrap();
    assert_eq!(speech.cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_abandoned_turn_returns_to_idle() {
    let (mock, tx) = MockLlm::default().with_live_stream();
    let controller = controller_with(Arc::new(mock));
    let mut events = controller.subscribe();

    let turn = tokio::spawn({
        let controller = controller.clone();
        async move { controller.submit(UserInput::new("long question")).await }
    });
    wait_for_phase(&mut events, TurnPhase::Streaming).await;
    tx.unbounded_send(StreamEvent::text("Some of it")).unwrap();
    wait_for_update(&mut events).await;

    turn.abort();
    assert!(turn.await.unwrap_err().is_cancelled());

    assert!(controller.is_idle());
    let message = controller.last_assistant().unwrap();
    assert!(!message.streaming);
    assert_eq!(message.text(), "Some of it");
}
