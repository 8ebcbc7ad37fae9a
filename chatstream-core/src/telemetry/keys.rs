/// Span/Log attribute keys for chat exchanges.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_CONVERSATION_ID: &str = "conversation.id";
pub const KEY_REQUEST_ID: &str = "request.id";
pub const KEY_REPLY_ID: &str = "reply.id";
pub const KEY_ENDPOINT: &str = "endpoint";

pub const KEY_OUTCOME: &str = "exchange.outcome";
pub const KEY_CHUNKS: &str = "exchange.chunks";
pub const KEY_CHARS: &str = "exchange.chars";
pub const KEY_LATENCY_MS: &str = "latency.ms";

/// Error-related (if applicable)
pub const KEY_ERROR_KIND: &str = "error.kind";
pub const KEY_ERROR_MESSAGE: &str = "error.message";
