//! Provider-specific extraction of text fragments from event payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::error::{ChatError, CoreResult};

/// Turns one event's `data` string into the text to append, if any.
pub trait DeltaExtractor: Send {
    fn extract(&mut self, data: &str) -> CoreResult<Option<String>>;
}

impl<T: DeltaExtractor + ?Sized> DeltaExtractor for Box<T> {
    fn extract(&mut self, data: &str) -> CoreResult<Option<String>> {
        (**self).extract(data)
    }
}

/// Strips leading whitespace until the first fragment that still has content.
#[derive(Debug, Clone)]
pub struct TrimStart {
    at_start: bool,
}

impl Default for TrimStart {
    fn default() -> Self {
        Self { at_start: true }
    }
}

impl TrimStart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, text: &str) -> String {
        let text = if self.at_start { text.trim_start() } else { text };
        if !text.is_empty() {
            self.at_start = false;
        }
        text.to_string()
    }
}

/// Wire format selector for the upstream event payloads.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFormat {
    #[default]
    OpenAi,
    Anthropic,
}

impl ProviderFormat {
    pub fn extractor(self) -> Box<dyn DeltaExtractor> {
        match self {
            Self::OpenAi => Box::new(OpenAiDeltaExtractor::new()),
            Self::Anthropic => Box::new(AnthropicDeltaExtractor::new()),
        }
    }
}

fn parse_payload(data: &str) -> CoreResult<Value> {
    serde_json::from_str(data).map_err(|e| ChatError::MalformedPayload {
        message: e.to_string(),
        payload: truncate(data, 200),
    })
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn finish(trim: &mut TrimStart, raw: &str) -> Option<String> {
    let text = trim.apply(raw);
    trace!(len = text.len(), "fragment extracted");
    if text.is_empty() { None } else { Some(text) }
}

/// `choices[0].delta.content`, then `choices[0].text`.
#[derive(Debug, Default)]
pub struct OpenAiDeltaExtractor {
    trim: TrimStart,
}

impl OpenAiDeltaExtractor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeltaExtractor for OpenAiDeltaExtractor {
    fn extract(&mut self, data: &str) -> CoreResult<Option<String>> {
        let json = parse_payload(data)?;
        let choice = json.pointer("/choices/0");
        let raw = choice
            .and_then(|c| c.pointer("/delta/content"))
            .and_then(Value::as_str)
            .or_else(|| choice.and_then(|c| c.get("text")).and_then(Value::as_str))
            .unwrap_or("");
        Ok(finish(&mut self.trim, raw))
    }
}

/// Messages API `content_block_delta` events (`delta.text`), then the legacy
/// top-level `completion` field.
#[derive(Debug, Default)]
pub struct AnthropicDeltaExtractor {
    trim: TrimStart,
}

impl AnthropicDeltaExtractor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeltaExtractor for AnthropicDeltaExtractor {
    fn extract(&mut self, data: &str) -> CoreResult<Option<String>> {
        let json = parse_payload(data)?;
        let raw = json
            .pointer("/delta/text")
            .and_then(Value::as_str)
            .or_else(|| json.get("completion").and_then(Value::as_str))
            .unwrap_or("");
        Ok(finish(&mut self.trim, raw))
    }
}
