/// Example questions offered while the conversation is empty.
pub const STARTER_PROMPTS: [&str; 4] = [
    "How to prepare for a Himalayan trek",
    "Relaxing hobbies to reduce stress and boost focus",
    "Startups' role in innovation",
    "Indian Nobel laureates and their achievements",
];

/// Numbered list of [`STARTER_PROMPTS`], ready to print.
pub fn starter_prompts_text() -> String {
    let mut text = String::from("Try one of these (/try <n>):");
    for (i, prompt) in STARTER_PROMPTS.iter().enumerate() {
        text.push_str(&format!("\n  {}. {}", i + 1, prompt));
    }
    text
}

/// Result of processing a slash command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Display a message to the user.
    Message(String),
    /// Clear the conversation.
    Clear,
    /// Quit the application.
    Quit,
    /// Toggle deep research for the following turns.
    ToggleDeep,
    /// Attach an image file to the next turn.
    AttachImage(String),
    /// Ask for a more detailed version of the last answer.
    Elaborate,
    /// Submit the Nth related question of the last answer (1-based).
    AskRelated(usize),
    /// Submit a starter prompt.
    AskStarter(String),
    /// Read the last answer aloud.
    Speak,
    /// Stop speech playback.
    StopSpeaking,
    /// Write the last generated image to a file.
    SaveImage(String),
    /// Show status (model, modes, conversation size).
    ShowStatus,
    /// Not a command - treat as regular input.
    NotACommand,
}

pub fn handle_command(input: &str) -> CommandResult {
    let input = input.trim();
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts[0];
    let arg = parts.get(1).map(|s| s.trim()).unwrap_or("");

    match cmd {
        "/help" | "/h" => show_help(),
        "/exit" | "/quit" | "/q" => CommandResult::Quit,
        "/clear" | "/new" => CommandResult::Clear,

        // Turn modifiers
        "/deep" => CommandResult::ToggleDeep,
        "/image" | "/attach" => {
            if arg.is_empty() {
                CommandResult::Message("Usage: /image <path>".into())
            } else {
                CommandResult::AttachImage(arg.to_string())
            }
        }

        // Follow-ups
        "/elaborate" | "/more" => CommandResult::Elaborate,
        "/related" | "/r" => match arg.parse::<usize>() {
            Ok(n) if n > 0 => CommandResult::AskRelated(n),
            _ => CommandResult::Message(
                "Usage: /related <n>  (n is the number shown next to the question)".into(),
            ),
        },

        "/try" => match arg.parse::<usize>() {
            Ok(n) if (1..=STARTER_PROMPTS.len()).contains(&n) => {
                CommandResult::AskStarter(STARTER_PROMPTS[n - 1].to_string())
            }
            _ => CommandResult::Message(starter_prompts_text()),
        },

        // Speech
        "/speak" | "/say" => CommandResult::Speak,
        "/stop" => CommandResult::StopSpeaking,

        "/save-image" => {
            if arg.is_empty() {
                CommandResult::Message("Usage: /save-image <path>".into())
            } else {
                CommandResult::SaveImage(arg.to_string())
            }
        }
        "/status" => CommandResult::ShowStatus,
        "/version" => CommandResult::Message(format!("Anthara CLI v{}", env!("CARGO_PKG_VERSION"))),

        _ => {
            if input.starts_with('/') {
                CommandResult::Message(format!("Unknown command: {cmd}. Type /help for commands."))
            } else {
                CommandResult::NotACommand
            }
        }
    }
}

fn show_help() -> CommandResult {
    let help_text = "\
Anthara commands

  ASKING
    <text>                    Ask a question, or describe an image to create
    /image <path>             Attach an image to the next message (to edit it)
    /deep                     Toggle deep research mode
    /related <n>, /r <n>      Ask the Nth related question of the last answer
    /elaborate, /more         Get a more detailed version of the last answer
    /try <n>                  Ask one of the example questions

  OUTPUT
    /speak                    Read the last answer aloud
    /stop                     Stop reading
    /save-image <path>        Save the last image in the conversation

  SESSION
    /clear, /new              Start a fresh conversation
    /status                   Show model, modes and conversation size
    /version                  Show version information
    /help, /h                 Show this help message
    /quit, /exit, /q          Quit";

    CommandResult::Message(help_text.into())
}
