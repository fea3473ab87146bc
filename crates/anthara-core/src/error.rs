use thiserror::Error;

#[derive(Error, Debug)]
pub enum AntharaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Malformed provider output: {0}")]
    Malformed(String),

    #[error("Stream interrupted: {0}")]
    Stream(String),

    #[error("A turn is already in progress")]
    Busy,

    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AntharaError {
    /// Text shown inside the assistant message when a turn fails.
    pub fn user_notice(&self) -> String {
        match self {
            Self::Provider(msg) | Self::Stream(msg) => {
                format!("Something went wrong while answering: {msg}")
            }
            Self::Http(e) => format!("Could not reach the model service: {e}"),
            other => format!("Something went wrong while answering: {other}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, AntharaError>;
