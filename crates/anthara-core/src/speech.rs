use crate::config::SpeechSettings;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use tokio::process::{Child, Command};

/// Text-to-speech playback. Fire-and-forget: the core only ever asks
/// whether something is playing.
pub trait SpeechSynthesizer: Send + Sync {
    /// Start speaking `text`, replacing anything already playing.
    fn speak(&self, text: &str);
    fn cancel(&self);
    fn is_speaking(&self) -> bool;
}

/// Speech backend that never plays anything.
#[derive(Debug, Default)]
pub struct SilentSpeech;

impl SpeechSynthesizer for SilentSpeech {
    fn speak(&self, _text: &str) {}

    fn cancel(&self) {}

    fn is_speaking(&self) -> bool {
        false
    }
}

/// Speaks by running an external program (`espeak`, `say`, ...) with the
/// text as its last argument. Must be used inside a Tokio runtime.
pub struct CommandSpeech {
    program: String,
    args: Vec<String>,
    current: Mutex<Option<Child>>,
}

impl CommandSpeech {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current: Mutex::new(None),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn from_settings(settings: &SpeechSettings) -> Self {
        let mut args = settings.args.clone();
        if let Some(ref voice) = settings.voice {
            args.push("-v".to_string());
            args.push(voice.clone());
        }
        Self::new(settings.command.clone()).with_args(args)
    }

    fn stop_current(slot: &mut Option<Child>) {
        if let Some(mut child) = slot.take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!("Speech process already gone: {}", e);
            }
        }
    }
}

impl SpeechSynthesizer for CommandSpeech {
    fn speak(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let mut slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        Self::stop_current(&mut slot);

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(child) => *slot = Some(child),
            Err(e) => tracing::warn!("Failed to start speech command '{}': {}", self.program, e),
        }
    }

    fn cancel(&self) {
        let mut slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        Self::stop_current(&mut slot);
    }

    fn is_speaking(&self) -> bool {
        let mut slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(_) => {
                // Finished or unreadable; forget it
                *slot = None;
                false
            }
            None => false,
        }
    }
}
