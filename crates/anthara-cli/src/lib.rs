// Library interface for anthara-cli, so integration tests can reach the
// command parser and media helpers. main.rs declares the same files; the
// path attributes keep them from being loaded twice.

#[path = "commands.rs"]
pub mod commands;

#[path = "media.rs"]
pub mod media;

pub use commands::{handle_command, CommandResult};
