use anthara_core::response::postprocess;
use anthara_core::{
    ChatController, ChatEvent, Message, MessageId, Role, Segment, Settings, TurnOutcome,
    UserInput,
};
use anyhow::{Context, Result};
use std::future::Future;
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::commands::{handle_command, starter_prompts_text, CommandResult};
use crate::media;

fn build_controller(settings: &Settings) -> Result<ChatController> {
    let llm = settings.build_client()?;
    let speech = settings.build_speech();
    Ok(ChatController::new(llm, speech, &settings.chat))
}

// ── Single prompt ───────────────────────────────────────────────────────

pub async fn run_single_prompt(
    settings: &Settings,
    prompt: &str,
    image: Option<&Path>,
    deep: bool,
) -> Result<()> {
    let controller = build_controller(settings)?;
    let mut events = controller.subscribe();

    let mut input = UserInput::new(prompt).with_deep_research(deep);
    if let Some(path) = image {
        input = input.with_image(media::load_image(path)?);
    }

    let outcome = run_turn(&controller, &mut events, controller.submit(input)).await?;
    if let Some(TurnOutcome::Failed { error, .. }) = outcome {
        anyhow::bail!("{error}");
    }
    Ok(())
}

// ── Interactive REPL ────────────────────────────────────────────────────

struct ReplState {
    deep: bool,
    pending_image: Option<(String, anthara_core::MediaPayload)>,
}

pub async fn run_repl(settings: Settings) -> Result<()> {
    let controller = build_controller(&settings)?;
    let mut events = controller.subscribe();
    let mut state = ReplState {
        deep: false,
        pending_image: None,
    };

    println!("Anthara - ask anything. Type /help for commands, /quit to leave.");
    println!("{}", starter_prompts_text());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt(&state);
        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match handle_command(line) {
            CommandResult::NotACommand => {
                let mut input = UserInput::new(line).with_deep_research(state.deep);
                if let Some((_, image)) = state.pending_image.take() {
                    input = input.with_image(image);
                }
                run_turn(&controller, &mut events, controller.submit(input)).await?;
            }
            CommandResult::Quit => break,
            CommandResult::Message(text) => println!("{text}"),
            CommandResult::Clear => match controller.clear() {
                Ok(()) => println!("Conversation cleared.\n{}", starter_prompts_text()),
                Err(e) => eprintln!("{e}"),
            },
            CommandResult::ToggleDeep => {
                state.deep = !state.deep;
                println!(
                    "Deep research {}.",
                    if state.deep { "on" } else { "off" }
                );
            }
            CommandResult::AttachImage(path) => match media::load_image(Path::new(&path)) {
                Ok(image) => {
                    println!("Attached {path} ({}). It goes with your next message.", image.mime_type);
                    state.pending_image = Some((path, image));
                }
                Err(e) => eprintln!("{e:#}"),
            },
            CommandResult::Elaborate => match controller.last_assistant() {
                Some(last) => {
                    run_turn(&controller, &mut events, controller.elaborate(last.id)).await?;
                }
                None => println!("Nothing to elaborate on yet."),
            },
            CommandResult::AskRelated(n) => {
                let question = controller
                    .last_assistant()
                    .and_then(|m| m.related_queries.get(n - 1).cloned());
                match question {
                    Some(question) => {
                        println!("> {question}");
                        let input = UserInput::new(question).with_deep_research(state.deep);
                        run_turn(&controller, &mut events, controller.submit(input)).await?;
                    }
                    None => println!("No related question #{n}."),
                }
            }
            CommandResult::AskStarter(question) => {
                println!("> {question}");
                let input = UserInput::new(question).with_deep_research(state.deep);
                run_turn(&controller, &mut events, controller.submit(input)).await?;
            }
            CommandResult::Speak => match controller.last_assistant() {
                Some(last) => {
                    if let Err(e) = controller.speak(last.id) {
                        eprintln!("{e}");
                    } else if !settings.speech.enabled {
                        println!("Speech is disabled; set [speech] enabled = true in the config.");
                    }
                }
                None => println!("Nothing to read yet."),
            },
            CommandResult::StopSpeaking => controller.stop_speaking(),
            CommandResult::SaveImage(path) => save_last_image(&controller, Path::new(&path)),
            CommandResult::ShowStatus => print_status(&controller, &settings, &state),
        }
    }

    controller.stop_speaking();
    Ok(())
}

fn print_prompt(state: &ReplState) {
    let mut tags = Vec::new();
    if state.deep {
        tags.push("deep".to_string());
    }
    if let Some((ref path, _)) = state.pending_image {
        tags.push(format!("image: {path}"));
    }
    if tags.is_empty() {
        print!("\n> ");
    } else {
        print!("\n[{}] > ", tags.join(", "));
    }
    let _ = std::io::stdout().flush();
}

fn print_status(controller: &ChatController, settings: &Settings, state: &ReplState) {
    let messages = controller.messages();
    println!("Model:        {}", settings.provider.text_model);
    println!("Image model:  {}", settings.provider.image_model);
    println!("Web search:   {}", on_off(settings.chat.web_grounding));
    println!("Deep mode:    {}", on_off(state.deep));
    println!("Speech:       {}", on_off(settings.speech.enabled));
    println!("Speaking:     {}", on_off(controller.is_speaking()));
    println!("Messages:     {}/{}", messages.len(), settings.chat.max_history);
    if let Some((ref path, _)) = state.pending_image {
        println!("Attached:     {path}");
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

fn save_last_image(controller: &ChatController, path: &Path) {
    let image = controller
        .messages()
        .iter()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .find_map(|m| m.image().cloned());
    let Some(image) = image else {
        println!("No image in this conversation yet.");
        return;
    };
    match media::save_image(&image, path) {
        Ok(bytes) => println!("Saved {} ({bytes} bytes).", path.display()),
        Err(e) => eprintln!("{e:#}"),
    }
}

// ── Turn rendering ──────────────────────────────────────────────────────

/// Drive one turn while printing its events. Ctrl-C abandons the turn.
/// Returns `None` when the turn was interrupted.
async fn run_turn<F>(
    controller: &ChatController,
    events: &mut UnboundedReceiver<ChatEvent>,
    turn: F,
) -> Result<Option<TurnOutcome>>
where
    F: Future<Output = anthara_core::error::Result<TurnOutcome>>,
{
    tokio::pin!(turn);
    let mut renderer = Renderer::new(controller);

    loop {
        tokio::select! {
            outcome = &mut turn => {
                while let Ok(event) = events.try_recv() {
                    renderer.handle(event);
                }
                let outcome = match outcome {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        eprintln!("{e}");
                        return Ok(None);
                    }
                };
                renderer.finish(&outcome);
                return Ok(Some(outcome));
            }
            Some(event) = events.recv() => renderer.handle(event),
            _ = tokio::signal::ctrl_c() => {
                println!("\n[interrupted]");
                return Ok(None);
            }
        }
    }
}

/// Prints live answer text as it grows, then the settled message.
struct Renderer<'a> {
    controller: &'a ChatController,
    current: Option<MessageId>,
    printed: String,
}

impl<'a> Renderer<'a> {
    fn new(controller: &'a ChatController) -> Self {
        Self {
            controller,
            current: None,
            printed: String::new(),
        }
    }

    fn handle(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::MessageAdded(id) => {
                if self
                    .controller
                    .message(id)
                    .is_some_and(|m| m.role == Role::Assistant)
                {
                    self.current = Some(id);
                    self.printed.clear();
                }
            }
            ChatEvent::MessageUpdated(id) if Some(id) == self.current => {
                if let Some(message) = self.controller.message(id) {
                    if message.streaming {
                        self.print_progress(&live_text(&message));
                    }
                }
            }
            ChatEvent::PhaseChanged(phase) => tracing::debug!("Phase {:?}", phase),
            _ => {}
        }
    }

    /// Print whatever extends what is already on screen. Text that rewrites
    /// the visible prefix waits for the settled message.
    fn print_progress(&mut self, text: &str) {
        if let Some(suffix) = text.strip_prefix(self.printed.as_str()) {
            if !suffix.is_empty() {
                print!("{suffix}");
                let _ = std::io::stdout().flush();
                self.printed.push_str(suffix);
            }
        }
    }

    fn finish(&mut self, outcome: &TurnOutcome) {
        let id = match outcome {
            TurnOutcome::Ignored => return,
            TurnOutcome::Completed(id) => *id,
            TurnOutcome::Failed { message_id, .. } => *message_id,
        };
        let Some(message) = self.controller.message(id) else {
            return;
        };

        let text = message.text();
        match text.strip_prefix(self.printed.as_str()) {
            Some(rest) => print!("{rest}"),
            None if self.printed.is_empty() => print!("{text}"),
            None => print!("\n\n{text}"),
        }
        println!();
        print_media(&message);
        print_trailer(&message);
    }
}

/// Displayable text of an in-flight answer: trailer hidden, citations
/// numbered against the sources seen so far.
fn live_text(message: &Message) -> String {
    let extracted = postprocess::extract_related(&message.text());
    postprocess::rewrite_citations(&extracted.main_content, &message.sources)
}

fn print_media(message: &Message) {
    for segment in &message.content {
        if let Segment::Media(media) = segment {
            let size = media::decoded_len(media)
                .map(|n| format!("{n} bytes"))
                .unwrap_or_else(|| "unreadable".to_string());
            println!("[image: {}, {size}] save it with /save-image <path>", media.mime_type);
        }
    }
}

fn print_trailer(message: &Message) {
    if !message.sources.is_empty() {
        println!("\nSources:");
        for (i, source) in message.sources.iter().enumerate() {
            if source.title == source.uri {
                println!("  [{}] {}", i + 1, source.uri);
            } else {
                println!("  [{}] {} - {}", i + 1, source.title, source.uri);
            }
        }
    }
    if !message.related_queries.is_empty() {
        println!("\nRelated (ask with /related <n>):");
        for (i, query) in message.related_queries.iter().enumerate() {
            println!("  {}. {}", i + 1, query);
        }
    }
    if message.flags.elaboration_offered {
        println!("\nWant more depth? Type /elaborate.");
    }
}
