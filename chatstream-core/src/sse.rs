//! Incremental server-sent-events framing.
//!
//! Bytes are fed as they arrive; chunk boundaries need not line up with line or
//! event boundaries. Partial lines are kept as raw bytes so that a multi-byte
//! character split across two chunks still decodes correctly.

use tracing::trace;

/// One parsed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseRecord {
    /// A dispatched event. `data` lines are joined with `\n`.
    Event {
        event: Option<String>,
        id: Option<String>,
        data: String,
    },
    /// `retry:` control field. Consumers ignore it.
    ReconnectInterval(u64),
}

impl SseRecord {
    pub fn data(&self) -> Option<&str> {
        match self {
            Self::Event { data, .. } => Some(data.as_str()),
            Self::ReconnectInterval(_) => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
    /// Last byte consumed was `\r`; a following `\n` belongs to the same terminator.
    after_cr: bool,
    first_line: bool,
    event: Option<String>,
    id: Option<String>,
    data: String,
    has_data: bool,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            first_line: true,
            ..Default::default()
        }
    }

    /// Feed one chunk, returning every record completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseRecord> {
        let mut out = Vec::new();
        for &b in chunk {
            if self.after_cr {
                self.after_cr = false;
                if b == b'\n' {
                    continue;
                }
            }
            match b {
                b'\n' | b'\r' => {
                    self.after_cr = b == b'\r';
                    let line = std::mem::take(&mut self.buf);
                    if let Some(rec) = self.process_line(&line) {
                        out.push(rec);
                    }
                }
                _ => self.buf.push(b),
            }
        }
        out
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<SseRecord> {
        let mut line = String::from_utf8_lossy(raw).into_owned();
        if self.first_line {
            self.first_line = false;
            if let Some(rest) = line.strip_prefix('\u{FEFF}') {
                line = rest.to_string();
            }
        }

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line.as_str(), ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "id" => {
                if !value.contains('\0') {
                    self.id = Some(value.to_string());
                }
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|c| c.is_ascii_digit()) {
                    if let Ok(ms) = value.parse::<u64>() {
                        return Some(SseRecord::ReconnectInterval(ms));
                    }
                }
            }
            other => trace!(field = other, "ignoring unknown sse field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseRecord> {
        let event = self.event.take();
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        let data = std::mem::take(&mut self.data);
        trace!(event = ?event, len = data.len(), "frame parsed");
        Some(SseRecord::Event {
            event: event.filter(|e| !e.is_empty()),
            id: self.id.clone(),
            data,
        })
    }
}
