/// Anthara - centralized constants.
/// Model ids, endpoints, text markers and limits live here.

// ─── Models ───────────────────────────────────────────────────────────────────

pub mod models {
    /// Streaming answers with search grounding
    pub const TEXT_MODEL: &str = "gemini-2.5-flash";
    /// Structured-output intent classification
    pub const CLASSIFIER_MODEL: &str = "gemini-2.5-flash";
    /// Single-shot image generation
    pub const IMAGE_MODEL: &str = "imagen-4.0-generate-001";
    /// Image editing (mixed text/image output)
    pub const EDIT_MODEL: &str = "gemini-2.5-flash-image-preview";
}

// ─── API Endpoints ────────────────────────────────────────────────────────────

pub mod endpoints {
    pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

    /// Environment variables checked for the credential, in order.
    pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
    pub const API_KEY_FALLBACK_ENVS: &[&str] = &["GOOGLE_API_KEY", "API_KEY"];
}

// ─── Text markers ─────────────────────────────────────────────────────────────

pub mod markers {
    /// Inline citation placeholder the model is told to emit after a claim.
    pub const CITATION_SENTINEL: &str = "~~source~~";

    /// Trailer carrying follow-up question suggestions.
    pub const RELATED_BEGIN: &str = "[RELATED_QUESTIONS]";
    pub const RELATED_END: &str = "[/RELATED_QUESTIONS]";
}

// ─── Default Settings ─────────────────────────────────────────────────────────

pub mod defaults {
    pub const MAX_HISTORY: usize = 100;
    pub const WEB_GROUNDING: bool = true;
    pub const CLASSIFY_INTENT: bool = true;
    pub const SPEECH_COMMAND: &str = "espeak";
    pub const IMAGE_MIME_TYPE: &str = "image/jpeg";
    /// Upper bound on related questions kept from a trailer.
    pub const MAX_RELATED_QUERIES: usize = 5;
}
