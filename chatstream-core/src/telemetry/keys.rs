/// Field names recorded on the `chat.stream` span.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_TURN_ID: &str = "turn.id";
pub const KEY_MODEL: &str = "llm.model";

pub const KEY_STATUS: &str = "stream.status";
pub const KEY_FRAGMENTS: &str = "stream.fragments";
pub const KEY_CHARS: &str = "stream.chars";
pub const KEY_MALFORMED: &str = "stream.malformed";
pub const KEY_LATENCY_MS: &str = "latency.ms";

/// Error-related (if applicable)
pub const KEY_ERROR_KIND: &str = "error.kind";
pub const KEY_ERROR_MESSAGE: &str = "error.message";
