use serde::{Deserialize, Serialize};

/// How an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Cancelled,
    /// Failed before anything was merged; the snapshot was restored.
    RolledBack,
    /// Failed after partial content was merged; the partial reply stays.
    Truncated,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::RolledBack => "rolled_back",
            Self::Truncated => "truncated",
        }
    }
}

/// Record emitted once per finished exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeTrace {
    pub conversation_id: String,
    pub request_id: String,
    pub endpoint: String,
    /// Set once the response started streaming.
    pub reply_id: Option<String>,
    pub outcome: Outcome,
    pub chunks: u64,
    pub chars: u64,
    pub latency_ms: u64,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl ExchangeTrace {
    pub fn new(
        conversation_id: impl Into<String>,
        request_id: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            request_id: request_id.into(),
            endpoint: endpoint.into(),
            reply_id: None,
            outcome: Outcome::Completed,
            chunks: 0,
            chars: 0,
            latency_ms: 0,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn error(mut self, err: &crate::error::ChatError) -> Self {
        self.error_kind = Some(err.kind().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}
